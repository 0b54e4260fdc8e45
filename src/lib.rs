//! Concurrent image and thumbnail loading for an image viewer.
//!
//! Full images are decoded on a small worker pool and land in an indexed
//! [`cache::ImageCache`]; the [`loader::LoadCoordinator`] tracks which slot
//! the user asked for last so that slower, superseded loads are never shown.
//! Thumbnails fan out on their own pool. Everything reports back to the
//! owning thread through one event queue, consumed by [`session::ViewSession`].

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod image;
pub mod image_loader;
pub mod loader;
pub mod models;
pub mod session;
pub mod thumbnails;

#[cfg(test)]
mod testing;

pub use crate::image::{Frame, Image, ImageHandle};
pub use cache::ImageCache;
pub use config::LoaderConfig;
pub use context::{ContextId, OwnerContext, Surface};
pub use error::{LoadError, Result};
pub use events::Event;
pub use loader::{DefaultFactory, ImageFactory, LoadCoordinator};
pub use models::SourceCollection;
pub use session::{ViewSession, ViewUpdate};
pub use thumbnails::{Thumbnail, ThumbnailPool};
