//! Fixtures shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use image::codecs::gif::GifEncoder;
use image::{Delay, Rgba, RgbaImage};
use parking_lot::Mutex;

use crate::error::{LoadError, Result};
use crate::events::{Event, EventReceiver};
use crate::image::{AnimFrame, Frame, FrameDecoder, Image, StaticImage};
use crate::loader::ImageFactory;
use crate::models::SourceInfo;

pub fn write_png(path: &Path, width: u32, height: u32) {
    RgbaImage::from_pixel(width, height, Rgba([40, 80, 120, 255]))
        .save(path)
        .unwrap();
}

pub fn write_gif(path: &Path, frames: usize, delay_ms: u32) {
    let mut encoder = GifEncoder::new(File::create(path).unwrap());
    let frames = (0..frames).map(|i| {
        let shade = (i * 60 % 256) as u8;
        let pixels = RgbaImage::from_pixel(6, 4, Rgba([shade, 0, 255 - shade, 255]));
        image::Frame::from_parts(pixels, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1))
    });
    encoder.encode_frames(frames).unwrap();
}

/// An unbound still image with blank pixels; nothing is read from disk.
pub fn still_image(path: impl AsRef<Path>, width: u32, height: u32) -> Image {
    let info = SourceInfo::new(path.as_ref());
    Image::Static(StaticImage::new(info, Frame::new(RgbaImage::new(width, height))))
}

/// Frame decoder producing `count` 4x2 frames and counting its calls.
pub struct CountingFrames {
    count: usize,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingFrames {
    pub fn new(count: usize, delay: Duration) -> Self {
        Self {
            count,
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FrameDecoder for CountingFrames {
    fn decode_frames(&self, _path: &Path) -> Result<Vec<AnimFrame>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // widen the window for racing loaders
        std::thread::sleep(Duration::from_millis(20));
        Ok((0..self.count)
            .map(|i| AnimFrame {
                image: RgbaImage::from_pixel(4, 2, Rgba([i as u8, 0, 0, 255])),
                delay: self.delay,
            })
            .collect())
    }
}

/// Factory returning 4x4 stills, with per-path delays, failures and panics.
#[derive(Default)]
pub struct MockFactory {
    delays: HashMap<PathBuf, Duration>,
    failures: HashSet<PathBuf>,
    panics: HashSet<PathBuf>,
    decodes: Mutex<HashMap<PathBuf, usize>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, path: impl AsRef<Path>, ms: u64) -> Self {
        self.delays
            .insert(path.as_ref().to_path_buf(), Duration::from_millis(ms));
        self
    }

    pub fn with_failure(mut self, path: impl AsRef<Path>) -> Self {
        self.failures.insert(path.as_ref().to_path_buf());
        self
    }

    pub fn with_panic(mut self, path: impl AsRef<Path>) -> Self {
        self.panics.insert(path.as_ref().to_path_buf());
        self
    }

    /// How many times `path` reached the decoder.
    pub fn decodes(&self, path: &Path) -> usize {
        self.decodes.lock().get(path).copied().unwrap_or(0)
    }
}

impl ImageFactory for MockFactory {
    fn create_image(&self, path: &Path) -> Result<Image> {
        *self.decodes.lock().entry(path.to_path_buf()).or_default() += 1;
        if let Some(delay) = self.delays.get(path) {
            std::thread::sleep(*delay);
        }
        if self.panics.contains(path) {
            panic!("mock decoder panic for {:?}", path);
        }
        if self.failures.contains(path) {
            return Err(LoadError::Decode {
                path: path.to_path_buf(),
                message: "mock failure".to_string(),
            });
        }
        Ok(still_image(path, 4, 4))
    }
}

/// Wait for `n` events, panicking if they do not all arrive within `timeout`.
pub fn collect_events(rx: &EventReceiver, n: usize, timeout: Duration) -> Vec<Event> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::with_capacity(n);
    while events.len() < n {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(5)),
            Err(_) => panic!("expected {} events, got {}: {:?}", n, events.len(), events),
        }
    }
    events
}
