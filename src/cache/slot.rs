use std::path::{Path, PathBuf};

use crate::image::ImageHandle;

#[derive(Debug, Clone, Default)]
pub(super) enum SlotState {
    #[default]
    Empty,
    Loaded { handle: ImageHandle, path: PathBuf },
}

/// An outstanding reservation.
#[derive(Debug, Clone)]
pub(super) struct Claim {
    pub ticket: u64,
    pub path: PathBuf,
}

/// One cache position.
///
/// `stamp` is the newest generation that has claimed the slot and `claimed`
/// the source it asked for. Writes with an older stamp are stale and get
/// discarded unless they carry that same source. Outstanding reservations
/// pin the slot against trimming.
#[derive(Debug, Clone, Default)]
pub(super) struct Slot {
    pub state: SlotState,
    pub stamp: u64,
    pub claimed: Option<PathBuf>,
    pub pending: Vec<Claim>,
}

impl Slot {
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, SlotState::Loaded { .. })
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn handle(&self) -> Option<&ImageHandle> {
        match &self.state {
            SlotState::Loaded { handle, .. } => Some(handle),
            SlotState::Empty => None,
        }
    }

    pub fn holds(&self, wanted: &Path) -> bool {
        matches!(&self.state, SlotState::Loaded { path, .. } if path == wanted)
    }

    pub fn claim(&mut self, stamp: u64, ticket: u64, path: &Path) {
        if stamp >= self.stamp {
            self.stamp = stamp;
            self.claimed = Some(path.to_path_buf());
        }
        self.pending.push(Claim {
            ticket,
            path: path.to_path_buf(),
        });
    }

    pub fn release(&mut self, ticket: u64) {
        self.pending.retain(|c| c.ticket != ticket);
    }

    /// Whether a reservation older than `ticket` is loading `path`.
    pub fn loading_before(&self, ticket: u64, path: &Path) -> bool {
        self.pending
            .iter()
            .any(|c| c.ticket < ticket && c.path == path)
    }

    /// Store `handle` unless `stamp` is older than the slot's claim and the
    /// handle is not the claimed source.
    pub fn write(&mut self, handle: ImageHandle, stamp: u64) -> bool {
        let claimed_source = self.claimed.as_deref() == Some(handle.path());
        if stamp < self.stamp && !claimed_source {
            return false;
        }
        self.stamp = self.stamp.max(stamp);
        let path = handle.path().to_path_buf();
        self.state = SlotState::Loaded { handle, path };
        true
    }

    /// Drop the image unless a reservation is outstanding.
    pub fn evict(&mut self) -> bool {
        if self.is_pending() || !self.is_loaded() {
            return false;
        }
        self.state = SlotState::Empty;
        true
    }
}
