//! Notifications sent from worker contexts to the owning context.
//!
//! Events are fire-and-forget; the receiver decides whether an index or
//! generation is still relevant.

use crate::image::Frame;
use crate::thumbnails::Thumbnail;

#[derive(Debug, Clone)]
pub enum Event {
    /// The source collection was replaced and the cache reset to `len` slots.
    CollectionChanged { len: usize },
    /// A requested load reached the cache (or was already there).
    LoadCompleted { index: usize, generation: u64 },
    /// A requested load could not be decoded. Terminal for that request.
    LoadFailed {
        index: usize,
        generation: u64,
        error: String,
    },
    /// A background neighbour load finished; `error` is set when it failed.
    Prefetched {
        index: usize,
        error: Option<String>,
    },
    ThumbnailReady { index: usize, thumbnail: Thumbnail },
    ThumbnailFailed { index: usize, error: String },
    /// A playing animation advanced.
    FrameChanged { index: usize, frame: Frame },
}

impl Event {
    /// Slot index the event refers to, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            Event::CollectionChanged { .. } => None,
            Event::LoadCompleted { index, .. }
            | Event::LoadFailed { index, .. }
            | Event::Prefetched { index, .. }
            | Event::ThumbnailReady { index, .. }
            | Event::ThumbnailFailed { index, .. }
            | Event::FrameChanged { index, .. } => Some(*index),
        }
    }
}

pub type EventSender = async_channel::Sender<Event>;
pub type EventReceiver = async_channel::Receiver<Event>;

pub fn channel() -> (EventSender, EventReceiver) {
    async_channel::unbounded()
}
