//! Full-image loading.
//!
//! - `LoadCoordinator` - load target, generations, worker pool, prefetch
//! - `ImageFactory` - decode collaborator called from the workers
//! - `task` - the single-shot load task

pub mod coordinator;
pub mod factory;
pub(crate) mod task;

pub use coordinator::LoadCoordinator;
pub use factory::{DefaultFactory, ImageFactory};
pub use task::LoadTarget;
