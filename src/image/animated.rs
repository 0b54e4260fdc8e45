//! Multi-frame sources with lazy loading and timer-driven playback.
//!
//! Frame data, the current frame pointer and the rotation share one lock per
//! instance. The playback timer is a dedicated thread that waits on a cancel
//! channel for the current frame's delay, so fires can never overlap.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{RecvTimeoutError, Sender};
use image::RgbaImage;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::{Frame, Rotation};
use crate::error::{LoadError, Result};
use crate::events::{Event, EventSender};
use crate::models::SourceInfo;

/// Delays at or below this are treated as unspecified.
const MIN_FRAME_DELAY: Duration = Duration::from_millis(10);

/// Delay used for frames with no usable delay.
const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

/// One decoded frame as reported by a `FrameDecoder`.
#[derive(Debug, Clone)]
pub struct AnimFrame {
    pub image: RgbaImage,
    pub delay: Duration,
}

/// Decodes every frame of an animated source.
pub trait FrameDecoder: Send + Sync {
    fn decode_frames(&self, path: &Path) -> Result<Vec<AnimFrame>>;
}

pub fn normalize_delay(delay: Duration) -> Duration {
    if delay <= MIN_FRAME_DELAY {
        DEFAULT_FRAME_DELAY
    } else {
        delay
    }
}

#[derive(Default)]
struct AnimationState {
    frames: Option<Arc<Vec<(Frame, Duration)>>>,
    current: usize,
    rotation: Rotation,
}

impl AnimationState {
    fn current_frame(&self) -> Option<Frame> {
        let frames = self.frames.as_ref()?;
        let (frame, _) = frames.get(self.current)?;
        Some(frame.rotated(self.rotation))
    }

    fn current_delay(&self) -> Option<Duration> {
        let frames = self.frames.as_ref()?;
        frames.get(self.current).map(|(_, delay)| *delay)
    }
}

struct Shared {
    info: SourceInfo,
    decoder: Arc<dyn FrameDecoder>,
    state: Mutex<AnimationState>,
}

impl Shared {
    /// Step to the next frame (wrapping) and report it with its delay.
    fn advance_frame(&self) -> Option<(Frame, Duration)> {
        let mut state = self.state.lock();
        let count = state.frames.as_ref()?.len();
        state.current = (state.current + 1) % count;
        let frame = state.current_frame()?;
        let delay = state.current_delay()?;
        Some((frame, delay))
    }
}

struct FrameTimer {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct AnimatedImage {
    shared: Arc<Shared>,
    timer: Mutex<Option<FrameTimer>>,
}

impl AnimatedImage {
    pub fn new(info: SourceInfo, decoder: Arc<dyn FrameDecoder>) -> Self {
        Self {
            shared: Arc::new(Shared {
                info,
                decoder,
                state: Mutex::new(AnimationState::default()),
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn info(&self) -> &SourceInfo {
        &self.shared.info
    }

    /// Decode all frames. Only the first call does any work; the lock is held
    /// across the decode so concurrent callers wait for the same result.
    pub fn load(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.frames.is_some() {
            return Ok(());
        }

        let path = self.shared.info.path();
        let decoded = self.shared.decoder.decode_frames(path)?;
        if decoded.is_empty() {
            return Err(LoadError::Decode {
                path: path.to_path_buf(),
                message: "animation has no frames".to_string(),
            });
        }

        let frames: Vec<(Frame, Duration)> = decoded
            .into_iter()
            .map(|f| (Frame::new(f.image), normalize_delay(f.delay)))
            .collect();
        debug!(?path, frames = frames.len(), "Loaded animation");

        state.frames = Some(Arc::new(frames));
        state.current = 0;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.state.lock().frames.is_some()
    }

    pub fn frame_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .frames
            .as_ref()
            .map_or(0, |f| f.len())
    }

    /// Position of the current frame; 0 while unloaded.
    pub fn frame_index(&self) -> usize {
        self.shared.state.lock().current
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.shared.state.lock().current_frame()
    }

    pub fn current_delay(&self) -> Option<Duration> {
        self.shared.state.lock().current_delay()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let state = self.shared.state.lock();
        state
            .frames
            .as_ref()
            .and_then(|f| f.first())
            .map_or((0, 0), |(frame, _)| frame.dimensions())
    }

    /// Compose `degrees` into the rotation applied to emitted frames.
    /// Ignored while unloaded.
    pub fn rotate(&self, degrees: i32) {
        let mut state = self.shared.state.lock();
        if state.frames.is_some() {
            state.rotation = state.rotation.compose(degrees);
        }
    }

    pub fn rotation(&self) -> Rotation {
        self.shared.state.lock().rotation
    }

    /// Move to the next frame, wrapping to 0, and return it with its delay.
    pub fn advance_frame(&self) -> Option<(Frame, Duration)> {
        self.shared.advance_frame()
    }

    pub fn is_playing(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Start playback from frame 0, emitting `FrameChanged` for `index`.
    /// Any running timer is stopped first. Returns false if unloaded.
    pub fn start_animation(&self, index: usize, events: EventSender) -> bool {
        if !self.is_loaded() {
            return false;
        }
        self.stop_animation();

        let (cancel_tx, cancel_rx) = flume::bounded::<()>(1);
        let shared = Arc::clone(&self.shared);

        let spawned = thread::Builder::new()
            .name(format!("anim-{}", index))
            .spawn(move || loop {
                let Some(delay) = shared.state.lock().current_delay() else {
                    break;
                };
                match cancel_rx.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some((frame, _next_delay)) = shared.advance_frame() else {
                            break;
                        };
                        trace!(index, "Animation frame advanced");
                        if events.send_blocking(Event::FrameChanged { index, frame }).is_err() {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        match spawned {
            Ok(handle) => {
                *self.timer.lock() = Some(FrameTimer {
                    cancel: cancel_tx,
                    handle,
                });
                debug!(index, path = ?self.shared.info.path(), "Animation started");
                true
            }
            Err(e) => {
                warn!(error = ?e, "Failed to spawn animation timer");
                false
            }
        }
    }

    /// Cancel playback and rewind to frame 0.
    pub fn stop_animation(&self) {
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            let _ = timer.cancel.try_send(());
            drop(timer.cancel);
            if timer.handle.thread().id() != thread::current().id() {
                let _ = timer.handle.join();
            }
        }

        let mut state = self.shared.state.lock();
        state.current = 0;
    }
}

impl Drop for AnimatedImage {
    fn drop(&mut self) {
        if self.timer.get_mut().is_some() {
            self.stop_animation();
        }
    }
}

impl fmt::Debug for AnimatedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimatedImage")
            .field("path", &self.shared.info.path())
            .field("loaded", &self.is_loaded())
            .field("frame_index", &self.frame_index())
            .finish()
    }
}
