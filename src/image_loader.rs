use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::LoadError;
use crate::image::{AnimFrame, FrameDecoder};

/// Decode only the first frame of `path`. Animations stop decoding after
/// frame 0; every other format decodes as a still.
pub fn decode_first_frame(path: &Path) -> Result<DynamicImage> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read image: {:?}", path))?;
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("Failed to guess image format")?;

    if reader.format() != Some(ImageFormat::Gif) {
        return reader
            .decode()
            .with_context(|| format!("Failed to decode image: {:?}", path));
    }

    let decoder = GifDecoder::new(reader.into_inner())
        .with_context(|| format!("Failed to decode GIF: {:?}", path))?;
    let first = decoder
        .into_frames()
        .next()
        .ok_or_else(|| anyhow!("GIF has no frames: {:?}", path))?
        .context("Failed to decode GIF frame")?;
    Ok(DynamicImage::ImageRgba8(first.into_buffer()))
}

/// Decode every frame of a GIF with its display delay.
pub fn decode_gif_frames(path: &Path) -> Result<Vec<AnimFrame>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read image: {:?}", path))?;
    let decoder = GifDecoder::new(Cursor::new(bytes))
        .with_context(|| format!("Failed to decode GIF: {:?}", path))?;

    let mut frames = Vec::new();
    for frame in decoder.into_frames() {
        let frame = frame.context("Failed to decode GIF frame")?;
        let delay = Duration::from(frame.delay());
        frames.push(AnimFrame {
            image: frame.into_buffer(),
            delay,
        });
    }

    if frames.is_empty() {
        return Err(anyhow!("GIF has no frames: {:?}", path));
    }
    Ok(frames)
}

pub fn read_dimensions(path: &Path) -> Result<(u32, u32)> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("Failed to read image: {:?}", path))?
        .with_guessed_format()
        .context("Failed to guess image format")?;
    reader
        .into_dimensions()
        .with_context(|| format!("Failed to read dimensions: {:?}", path))
}

/// `FrameDecoder` backed by the `image` crate's GIF decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct GifFrameDecoder;

impl FrameDecoder for GifFrameDecoder {
    fn decode_frames(&self, path: &Path) -> crate::error::Result<Vec<AnimFrame>> {
        decode_gif_frames(path).map_err(|e| LoadError::decode(path, e))
    }
}
