//! Context affinity for render surfaces.
//!
//! Workers may decode anywhere, but surfaces are only built on the context
//! that owns them. `OwnerContext` and `Surface` are `!Send`, so neither can
//! leave the thread that created them; `ContextId` is the `Send` token workers
//! carry to bind their results.

use std::marker::PhantomData;
use std::thread::{self, ThreadId};

use crate::error::{LoadError, Result};
use crate::image::{Frame, ImageHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(ThreadId);

impl ContextId {
    pub fn current() -> Self {
        Self(thread::current().id())
    }
}

/// The single context allowed to build surfaces.
#[derive(Debug)]
pub struct OwnerContext {
    id: ContextId,
    _not_send: PhantomData<*const ()>,
}

impl OwnerContext {
    /// Claim the calling thread as the owning context.
    pub fn current() -> Self {
        Self {
            id: ContextId::current(),
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn is_current(&self) -> bool {
        ContextId::current() == self.id
    }

    /// Build a surface for the handle's current frame. Unloaded animations
    /// yield an empty surface.
    pub fn surface(&self, handle: &ImageHandle) -> Result<Surface> {
        if handle.owner() != self.id {
            return Err(LoadError::WrongContext);
        }
        let frame = handle.image().current_frame().unwrap_or_else(Frame::empty);
        self.surface_for_frame(frame)
    }

    /// Build a surface from loose frame data (animation ticks, thumbnails).
    pub fn surface_for_frame(&self, frame: Frame) -> Result<Surface> {
        if !self.is_current() {
            return Err(LoadError::WrongContext);
        }
        Ok(Surface {
            frame,
            _not_send: PhantomData,
        })
    }
}

/// Paintable pixels. Only exists on the owning context.
#[derive(Debug)]
pub struct Surface {
    frame: Frame,
    _not_send: PhantomData<*const ()>,
}

impl Surface {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.frame.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn pixels(&self) -> &[u8] {
        self.frame.as_rgba().as_raw()
    }
}
