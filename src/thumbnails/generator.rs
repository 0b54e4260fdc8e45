//! Thumbnail scaling.
//!
//! Two passes: a nearest-neighbour shrink to roughly twice the target, then a
//! CatmullRom resample to the exact size. Squared thumbnails fill the box and
//! are centre-cropped.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::trace;

use super::Thumbnail;
use crate::error::{LoadError, Result};
use crate::loader::ImageFactory;

pub struct ThumbnailGenerator;

impl ThumbnailGenerator {
    /// Decode the first frame of `path` through `factory` and scale it.
    pub fn generate(
        factory: &dyn ImageFactory,
        path: &Path,
        size: u32,
        squared: bool,
    ) -> Result<Thumbnail> {
        let frame = factory.create_preview(path)?;
        if frame.is_empty() {
            return Err(LoadError::Decode {
                path: path.to_path_buf(),
                message: "image is empty".to_string(),
            });
        }

        let scaled = Self::scale(frame.as_rgba(), size, squared);
        trace!(?path, dims = ?scaled.dimensions(), squared, "Generated thumbnail");
        Ok(Thumbnail::new(scaled, size, squared))
    }

    pub fn scale(src: &RgbaImage, size: u32, squared: bool) -> RgbaImage {
        let size = size.max(1);
        let (src_w, src_h) = src.dimensions();

        let (fast_w, fast_h) =
            Self::calculate_dimensions(src_w, src_h, size.saturating_mul(2), squared);
        let first = if src_w > fast_w || src_h > fast_h {
            imageops::resize(src, fast_w, fast_h, FilterType::Nearest)
        } else {
            src.clone()
        };

        let (w, h) = Self::calculate_dimensions(first.width(), first.height(), size, squared);
        let second = imageops::resize(&first, w, h, FilterType::CatmullRom);

        if !squared {
            return second;
        }
        let crop_w = size.min(w);
        let crop_h = size.min(h);
        let x = (w - crop_w) / 2;
        let y = (h - crop_h) / 2;
        imageops::crop_imm(&second, x, y, crop_w, crop_h).to_image()
    }

    /// Scale `(w, h)` into a `bound`-sided box preserving aspect ratio.
    /// `expand` covers the box instead of fitting inside it.
    fn calculate_dimensions(w: u32, h: u32, bound: u32, expand: bool) -> (u32, u32) {
        if w == 0 || h == 0 {
            return (bound, bound);
        }
        let sx = bound as f64 / w as f64;
        let sy = bound as f64 / h as f64;
        let scale = if expand { sx.max(sy) } else { sx.min(sy) };
        let out_w = (w as f64 * scale).round() as u32;
        let out_h = (h as f64 * scale).round() as u32;
        (out_w.max(1), out_h.max(1))
    }
}
