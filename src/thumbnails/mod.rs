//! Thumbnail pipeline.
//!
//! This module provides:
//! - `ThumbnailGenerator` - Two-pass scaling of a decoded source
//! - `ThumbnailCache` - Memory LRU with an optional disk layer
//! - `ThumbnailPool` - Fan-out worker pool keyed by slot index

pub mod cache;
pub mod generator;
pub mod pool;

use image::RgbaImage;

use crate::image::Frame;

pub use cache::ThumbnailCache;
pub use generator::ThumbnailGenerator;
pub use pool::{ThumbnailPool, ThumbnailRequest};

/// A scaled preview of one source.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub frame: Frame,
    /// Requested edge length; the longer side for fitted thumbnails.
    pub size: u32,
    pub squared: bool,
}

impl Thumbnail {
    pub fn new(pixels: RgbaImage, size: u32, squared: bool) -> Self {
        Self {
            frame: Frame::new(pixels),
            size,
            squared,
        }
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn memory_bytes(&self) -> usize {
        self.frame.byte_len()
    }
}
