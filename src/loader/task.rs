//! The single-shot load task run by the load workers.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use tracing::{debug, trace, warn};

use super::factory::ImageFactory;
use crate::cache::SlotWrite;
use crate::context::ContextId;
use crate::error::{LoadError, Result};
use crate::events::Event;

/// What should be displayed: a slot, its source and the request generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    pub index: usize,
    pub path: PathBuf,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadKind {
    /// Moves the displayed target.
    Request,
    /// Warms a neighbouring slot.
    Prefetch,
}

pub(crate) struct LoadJob {
    pub target: LoadTarget,
    pub kind: LoadKind,
    pub slot: SlotWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The slot already held this source; nothing was decoded.
    Hit,
    /// Decoded; `accepted` is false when a newer request owns the slot.
    Decoded { accepted: bool },
}

/// Fast path on a cache hit, otherwise decode, bind to `owner` and commit.
///
/// An earlier load of the same source into the same slot (typically a
/// prefetch the user has just navigated to) is waited for and reused.
pub(crate) fn execute(
    target: &LoadTarget,
    slot: SlotWrite,
    factory: &dyn ImageFactory,
    owner: ContextId,
) -> Result<Outcome> {
    if slot.is_filled() {
        trace!(index = target.index, "Load fast path");
        return Ok(Outcome::Hit);
    }
    if slot.wait_for_earlier() && slot.is_filled() {
        trace!(index = target.index, "Reused in-flight load");
        return Ok(Outcome::Hit);
    }

    let decoded = panic::catch_unwind(AssertUnwindSafe(|| factory.create_image(&target.path)))
        .unwrap_or_else(|_| {
            Err(LoadError::Decode {
                path: target.path.clone(),
                message: "decoder panicked".to_string(),
            })
        })?;

    let handle = decoded.move_to(owner);
    let accepted = slot.commit(handle);
    debug!(
        index = target.index,
        generation = target.generation,
        accepted,
        "Load finished"
    );
    Ok(Outcome::Decoded { accepted })
}

/// Run a job and produce its terminal event.
pub(crate) fn run(job: LoadJob, factory: &dyn ImageFactory, owner: ContextId) -> Event {
    let LoadJob { target, kind, slot } = job;
    let result = execute(&target, slot, factory, owner);

    match (kind, result) {
        (LoadKind::Request, Ok(_)) => Event::LoadCompleted {
            index: target.index,
            generation: target.generation,
        },
        (LoadKind::Request, Err(e)) => {
            warn!(path = ?target.path, error = %e, "Failed to load image");
            Event::LoadFailed {
                index: target.index,
                generation: target.generation,
                error: e.to_string(),
            }
        }
        (LoadKind::Prefetch, Ok(_)) => Event::Prefetched {
            index: target.index,
            error: None,
        },
        (LoadKind::Prefetch, Err(e)) => {
            debug!(path = ?target.path, error = %e, "Prefetch failed");
            Event::Prefetched {
                index: target.index,
                error: Some(e.to_string()),
            }
        }
    }
}
