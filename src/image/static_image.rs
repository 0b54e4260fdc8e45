use parking_lot::Mutex;

use super::{Frame, Rotation};
use crate::models::SourceInfo;

/// A single-frame source. Pixels are stored unrotated.
#[derive(Debug)]
pub struct StaticImage {
    info: SourceInfo,
    pixels: Frame,
    rotation: Mutex<Rotation>,
}

impl StaticImage {
    pub fn new(info: SourceInfo, pixels: Frame) -> Self {
        Self {
            info,
            pixels,
            rotation: Mutex::new(Rotation::default()),
        }
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    pub fn current_frame(&self) -> Frame {
        let rotation = *self.rotation.lock();
        self.pixels.rotated(rotation)
    }

    pub fn rotate(&self, degrees: i32) {
        let mut rotation = self.rotation.lock();
        *rotation = rotation.compose(degrees);
    }

    pub fn rotation(&self) -> Rotation {
        *self.rotation.lock()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}
