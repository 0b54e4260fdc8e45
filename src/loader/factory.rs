use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{LoadError, Result};
use crate::image::{AnimatedImage, Frame, FrameDecoder, Image, StaticImage};
use crate::image_loader::{self, GifFrameDecoder};
use crate::models::{MediaType, SourceInfo};

/// Turns a path into a decoded image.
///
/// Called from worker threads; implementations must not touch anything that
/// belongs to the owning context.
pub trait ImageFactory: Send + Sync {
    fn create_image(&self, path: &Path) -> Result<Image>;

    /// The first frame only, for thumbnails. Animated sources should not
    /// decode their remaining frames here.
    fn create_preview(&self, path: &Path) -> Result<Frame> {
        self.create_image(path)?
            .current_frame()
            .ok_or_else(|| LoadError::Decode {
                path: path.to_path_buf(),
                message: "image has no frame".to_string(),
            })
    }
}

/// Decodes stills and GIF animations with the `image` crate.
pub struct DefaultFactory {
    frames: Arc<dyn FrameDecoder>,
}

impl DefaultFactory {
    pub fn new() -> Self {
        Self {
            frames: Arc::new(GifFrameDecoder),
        }
    }

    pub fn with_frame_decoder(frames: Arc<dyn FrameDecoder>) -> Self {
        Self { frames }
    }
}

impl Default for DefaultFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageFactory for DefaultFactory {
    fn create_image(&self, path: &Path) -> Result<Image> {
        let info = SourceInfo::new(path);
        match info.media_type() {
            Some(MediaType::Animated) => {
                let animated = AnimatedImage::new(info, Arc::clone(&self.frames));
                animated.load()?;
                debug!(?path, frames = animated.frame_count(), "Decoded animation");
                Ok(Image::Animated(animated))
            }
            Some(MediaType::Still) => {
                let decoded = image_loader::decode_first_frame(path)
                    .map_err(|e| LoadError::decode(path, e))?;
                let frame = Frame::new(decoded.to_rgba8());
                debug!(?path, dims = ?frame.dimensions(), "Decoded image");
                Ok(Image::Static(StaticImage::new(info, frame)))
            }
            None => Err(LoadError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    fn create_preview(&self, path: &Path) -> Result<Frame> {
        if SourceInfo::new(path).media_type().is_none() {
            return Err(LoadError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        }
        let decoded =
            image_loader::decode_first_frame(path).map_err(|e| LoadError::decode(path, e))?;
        Ok(Frame::new(decoded.to_rgba8()))
    }
}
