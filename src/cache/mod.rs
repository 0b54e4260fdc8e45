//! Indexed store of decoded image handles for the current collection.
//!
//! - Slots are addressed by collection index; out-of-range access is an error
//! - Writes carry a generation stamp so a slow, superseded load can never
//!   overwrite the result of a newer request for the same slot
//! - A superseded write is still kept when it carries the source the newest
//!   claim asked for, and a later reservation for that source can wait for
//!   it instead of decoding again
//! - Eviction only happens through `trim` and `reset`, and never touches a
//!   slot with an outstanding `SlotWrite` reservation
//!
//! The slot lock is held for bookkeeping only, never across a decode or a
//! listener call.

mod slot;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{LoadError, Result};
use crate::image::ImageHandle;
use slot::Slot;

/// Called with the slot index after its content changed.
pub type SlotListener = Box<dyn Fn(usize) + Send + Sync>;

struct CacheInner {
    slots: Vec<Slot>,
    /// Writes stamped below this belong to a previous collection.
    floor: u64,
    /// Bumped by `reset` so old reservations release nothing.
    epoch: u64,
    next_ticket: u64,
}

impl CacheInner {
    fn slot(&self, index: usize) -> Result<&Slot> {
        let len = self.slots.len();
        self.slots
            .get(index)
            .ok_or(LoadError::IndexOutOfRange { index, len })
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Slot> {
        let len = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or(LoadError::IndexOutOfRange { index, len })
    }
}

pub struct ImageCache {
    inner: RwLock<CacheInner>,
    listeners: Mutex<Vec<SlotListener>>,
    /// Counts released reservations; waiters sleep on `settled_cv`.
    settled: Mutex<u64>,
    settled_cv: Condvar,
}

impl ImageCache {
    pub fn new(len: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                slots: vec![Slot::default(); len],
                floor: 0,
                epoch: 0,
                next_ticket: 0,
            }),
            listeners: Mutex::new(Vec::new()),
            settled: Mutex::new(0),
            settled_cv: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loaded(&self, index: usize) -> Result<bool> {
        Ok(self.inner.read().slot(index)?.is_loaded())
    }

    /// Whether the slot is loaded with the decode of `path`.
    pub fn holds(&self, index: usize, path: &Path) -> Result<bool> {
        Ok(self.inner.read().slot(index)?.holds(path))
    }

    pub fn image(&self, index: usize) -> Result<Option<ImageHandle>> {
        Ok(self.inner.read().slot(index)?.handle().cloned())
    }

    /// Insert or replace unconditionally (last writer wins).
    pub fn set_image(&self, handle: ImageHandle, index: usize) -> Result<()> {
        {
            let mut inner = self.inner.write();
            let floor = inner.floor;
            let slot = inner.slot_mut(index)?;
            let stamp = slot.stamp.max(floor);
            slot.write(handle, stamp);
        }
        trace!(index, "Slot set");
        self.notify(index);
        Ok(())
    }

    /// Insert unless `stamp` is older than the slot's newest claim or the
    /// current collection. Returns whether the write was accepted.
    pub fn set_image_stamped(&self, handle: ImageHandle, index: usize, stamp: u64) -> Result<bool> {
        let accepted = {
            let mut inner = self.inner.write();
            let floor = inner.floor;
            let slot = inner.slot_mut(index)?;
            stamp >= floor && slot.write(handle, stamp)
        };
        if accepted {
            trace!(index, stamp, "Slot written");
            self.notify(index);
        } else {
            debug!(index, stamp, "Discarded stale slot write");
        }
        Ok(accepted)
    }

    /// Claim `index` for a write of `path` stamped `stamp` and pin it against
    /// trimming until the returned reservation is committed or dropped.
    pub fn reserve(self: &Arc<Self>, index: usize, stamp: u64, path: &Path) -> Result<SlotWrite> {
        let (epoch, ticket) = {
            let mut inner = self.inner.write();
            let epoch = inner.epoch;
            let ticket = inner.next_ticket;
            inner.slot_mut(index)?.claim(stamp, ticket, path);
            inner.next_ticket += 1;
            (epoch, ticket)
        };
        Ok(SlotWrite {
            cache: Arc::clone(self),
            index,
            stamp,
            epoch,
            ticket,
            path: path.to_path_buf(),
            released: false,
        })
    }

    fn release(&self, index: usize, epoch: u64, ticket: u64) {
        {
            let mut inner = self.inner.write();
            if inner.epoch == epoch {
                if let Ok(slot) = inner.slot_mut(index) {
                    slot.release(ticket);
                }
            }
        }
        self.settle();
    }

    fn settle(&self) {
        *self.settled.lock() += 1;
        self.settled_cv.notify_all();
    }

    pub fn is_pending(&self, index: usize) -> Result<bool> {
        Ok(self.inner.read().slot(index)?.is_pending())
    }

    /// Block until no reservation made before `ticket` is loading `path`
    /// into `index`. Returns whether there was anything to wait for.
    fn wait_for_earlier(&self, index: usize, epoch: u64, ticket: u64, path: &Path) -> bool {
        let busy = || {
            let inner = self.inner.read();
            inner.epoch == epoch
                && inner
                    .slot(index)
                    .is_ok_and(|slot| slot.loading_before(ticket, path))
        };

        let mut settled = self.settled.lock();
        if !busy() {
            return false;
        }
        while busy() {
            self.settled_cv.wait(&mut settled);
        }
        true
    }

    /// Evict loaded slots farther than `radius` from `center`, skipping
    /// reserved ones. Returns the evicted indices.
    pub fn trim(&self, center: usize, radius: usize) -> Vec<usize> {
        let mut inner = self.inner.write();
        let lo = center.saturating_sub(radius);
        let hi = center.saturating_add(radius);

        let mut evicted = Vec::new();
        for (index, slot) in inner.slots.iter_mut().enumerate() {
            if (index < lo || index > hi) && slot.evict() {
                evicted.push(index);
            }
        }
        if !evicted.is_empty() {
            debug!(center, radius, count = evicted.len(), "Trimmed image cache");
        }
        evicted
    }

    /// Replace every slot for a collection of `len` items. Writes stamped
    /// below `floor` are rejected from now on.
    pub fn reset(&self, len: usize, floor: u64) {
        let mut inner = self.inner.write();
        inner.slots = vec![Slot::default(); len];
        inner.floor = inner.floor.max(floor);
        inner.epoch += 1;
        debug!(len, floor = inner.floor, "Image cache reset");
        drop(inner);
        self.settle();
    }

    pub fn loaded_count(&self) -> usize {
        self.inner
            .read()
            .slots
            .iter()
            .filter(|s| s.is_loaded())
            .count()
    }

    pub fn loaded_indices(&self) -> Vec<usize> {
        self.inner
            .read()
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_loaded())
            .map(|(i, _)| i)
            .collect()
    }

    /// Register a listener for slot writes.
    pub fn on_slot_changed<F>(&self, listener: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Box::new(listener));
    }

    fn notify(&self, index: usize) {
        let listeners = self.listeners.lock();
        for listener in listeners.iter() {
            listener(index);
        }
    }
}

/// A pending write into one slot.
pub struct SlotWrite {
    cache: Arc<ImageCache>,
    index: usize,
    stamp: u64,
    epoch: u64,
    ticket: u64,
    path: PathBuf,
    released: bool,
}

impl SlotWrite {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the slot already holds the reserved source.
    pub fn is_filled(&self) -> bool {
        self.cache.holds(self.index, &self.path).unwrap_or(false)
    }

    /// Wait for earlier reservations loading the same source into this slot.
    /// Returns whether there was one.
    pub fn wait_for_earlier(&self) -> bool {
        self.cache
            .wait_for_earlier(self.index, self.epoch, self.ticket, &self.path)
    }

    /// Perform the stamped write. Returns false if it was stale.
    pub fn commit(mut self, handle: ImageHandle) -> bool {
        let accepted = if self.cache.inner.read().epoch == self.epoch {
            self.cache
                .set_image_stamped(handle, self.index, self.stamp)
                .unwrap_or(false)
        } else {
            false
        };
        self.cache.release(self.index, self.epoch, self.ticket);
        self.released = true;
        accepted
    }
}

impl Drop for SlotWrite {
    fn drop(&mut self) {
        if !self.released {
            self.cache.release(self.index, self.epoch, self.ticket);
        }
    }
}
