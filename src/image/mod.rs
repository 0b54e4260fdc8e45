//! Decoded image objects produced by the factory and stored in the cache.
//!
//! - `Image` - unbound decode result, owned by the worker that produced it
//! - `ImageHandle` - an `Image` bound to the owning context, shareable with the cache
//! - `Frame` - immutable RGBA pixels for one emitted frame

pub mod animated;
pub mod static_image;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use image::{imageops, RgbaImage};

use crate::context::ContextId;
use crate::models::SourceInfo;

pub use animated::{AnimFrame, AnimatedImage, FrameDecoder};
pub use static_image::StaticImage;

/// Immutable RGBA pixels. Cloning shares the buffer.
#[derive(Clone)]
pub struct Frame {
    pixels: Arc<RgbaImage>,
}

impl Frame {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    /// Zero-sized sentinel returned for sources that are not loaded.
    pub fn empty() -> Self {
        Self::new(RgbaImage::new(0, 0))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Apply `rotation` without touching the stored pixels.
    pub fn rotated(&self, rotation: Rotation) -> Frame {
        match rotation.quarter_turns() {
            0 => self.clone(),
            1 => Frame::new(imageops::rotate90(self.as_rgba())),
            2 => Frame::new(imageops::rotate180(self.as_rgba())),
            _ => Frame::new(imageops::rotate270(self.as_rgba())),
        }
    }

    pub fn same_pixels(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.as_raw().len()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Clockwise rotation in quarter turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rotation(u8);

impl Rotation {
    /// Degrees are snapped to the nearest quarter turn.
    pub fn from_degrees(degrees: i32) -> Self {
        let quarters = (degrees as f64 / 90.0).round() as i64;
        Self(quarters.rem_euclid(4) as u8)
    }

    pub fn compose(self, degrees: i32) -> Self {
        let other = Self::from_degrees(degrees);
        Self((self.0 + other.0) % 4)
    }

    pub fn quarter_turns(self) -> u8 {
        self.0
    }

    pub fn degrees(self) -> u32 {
        self.0 as u32 * 90
    }
}

/// A decoded source, not yet bound to a context.
#[derive(Debug)]
pub enum Image {
    Static(StaticImage),
    Animated(AnimatedImage),
}

impl Image {
    pub fn info(&self) -> &SourceInfo {
        match self {
            Image::Static(img) => img.info(),
            Image::Animated(img) => img.info(),
        }
    }

    pub fn path(&self) -> &Path {
        self.info().path()
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, Image::Animated(_))
    }

    pub fn as_animated(&self) -> Option<&AnimatedImage> {
        match self {
            Image::Animated(img) => Some(img),
            Image::Static(_) => None,
        }
    }

    /// The frame to display, with rotation applied. `None` while an
    /// animated source is unloaded.
    pub fn current_frame(&self) -> Option<Frame> {
        match self {
            Image::Static(img) => Some(img.current_frame()),
            Image::Animated(img) => img.current_frame(),
        }
    }

    pub fn rotate(&self, degrees: i32) {
        match self {
            Image::Static(img) => img.rotate(degrees),
            Image::Animated(img) => img.rotate(degrees),
        }
    }

    /// Unrotated pixel size, `(0, 0)` while unloaded.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Image::Static(img) => img.dimensions(),
            Image::Animated(img) => img.dimensions(),
        }
    }

    /// Hand the image over to `owner`. This is the only way to obtain a
    /// handle that can be cached or turned into a surface.
    pub fn move_to(self, owner: ContextId) -> ImageHandle {
        ImageHandle {
            image: Arc::new(self),
            owner,
        }
    }
}

/// An image bound to its owning context.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    image: Arc<Image>,
    owner: ContextId,
}

impl ImageHandle {
    pub fn owner(&self) -> ContextId {
        self.owner
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn path(&self) -> &Path {
        self.image.path()
    }

    pub fn is_animated(&self) -> bool {
        self.image.is_animated()
    }

    pub fn as_animated(&self) -> Option<&AnimatedImage> {
        self.image.as_animated()
    }

    pub fn same_image(&self, other: &ImageHandle) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }

    /// Approximate decoded size, used for logging cache pressure.
    pub fn byte_len(&self) -> usize {
        let (w, h) = self.image.dimensions();
        (w as usize) * (h as usize) * 4
    }
}
