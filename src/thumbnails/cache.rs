//! Thumbnail caching with a memory layer and an optional disk layer.
//!
//! - Memory cache: LRU of decoded thumbnails bounded by a byte budget
//! - Disk cache: PNG files under the configured directory, usually
//!   XDG_CACHE_HOME/idxv/thumbs/
//!
//! Keys are an xxhash of (path, mtime, size, thumbnail size, squared), so a
//! modified source or a different thumbnail shape never hits a stale entry.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::generator::ThumbnailGenerator;
use super::Thumbnail;
use crate::loader::ImageFactory;
use crate::models::SourceInfo;

const MIN_MEMORY_MB: usize = 1;
const MAX_MEMORY_MB: usize = 512;

/// Bump when thumbnail generation changes shape or quality.
const THUMB_CACHE_VERSION: u8 = 1;

const DEFAULT_LRU_CAPACITY: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hash: u64,
}

impl CacheKey {
    pub fn new(path: &Path, mtime: i64, size: u64, thumb_size: u32, squared: bool) -> Self {
        let path_str = path.to_string_lossy();
        let mut data = Vec::with_capacity(path_str.len() + 22);
        data.push(THUMB_CACHE_VERSION);
        data.extend_from_slice(path_str.as_bytes());
        data.extend_from_slice(&mtime.to_le_bytes());
        data.extend_from_slice(&size.to_le_bytes());
        data.extend_from_slice(&thumb_size.to_le_bytes());
        data.push(squared as u8);
        Self {
            hash: xxh3_64(&data),
        }
    }

    /// Key for `path` as it is on disk now; `None` if it cannot be stat'ed.
    pub fn for_source(path: &Path, thumb_size: u32, squared: bool) -> Option<Self> {
        let meta = SourceInfo::new(path).metadata()?;
        Some(Self::new(path, meta.mtime, meta.size, thumb_size, squared))
    }

    pub fn disk_filename(&self) -> String {
        format!("{:016x}.png", self.hash)
    }
}

struct MemoryLayer {
    entries: LruCache<CacheKey, Thumbnail>,
    bytes: usize,
}

/// Shared by every thumbnail worker; clones refer to the same storage.
#[derive(Clone)]
pub struct ThumbnailCache {
    cache_dir: Option<PathBuf>,
    max_memory_bytes: usize,
    memory: Arc<Mutex<MemoryLayer>>,
    thumb_size: u32,
}

impl ThumbnailCache {
    pub fn new(cache_dir: Option<PathBuf>, max_memory_mb: usize, thumb_size: u32) -> Self {
        let max_memory_mb = max_memory_mb.clamp(MIN_MEMORY_MB, MAX_MEMORY_MB);

        if let Some(dir) = &cache_dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(?dir, error = ?e, "Failed to create cache directory");
            }
        }
        debug!(?cache_dir, max_memory_mb, thumb_size, "Initialized thumbnail cache");

        let capacity = NonZeroUsize::new(DEFAULT_LRU_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache_dir,
            max_memory_bytes: max_memory_mb * 1024 * 1024,
            memory: Arc::new(Mutex::new(MemoryLayer {
                entries: LruCache::new(capacity),
                bytes: 0,
            })),
            thumb_size: thumb_size.max(1),
        }
    }

    /// Memory-only cache.
    pub fn in_memory(max_memory_mb: usize, thumb_size: u32) -> Self {
        Self::new(None, max_memory_mb, thumb_size)
    }

    pub fn thumb_size(&self) -> u32 {
        self.thumb_size
    }

    /// Memory, then disk, then generate through `factory`.
    ///
    /// Sources that cannot be stat'ed are generated without caching.
    pub fn get_or_generate(
        &self,
        factory: &dyn ImageFactory,
        path: &Path,
        squared: bool,
    ) -> crate::error::Result<Thumbnail> {
        let Some(key) = CacheKey::for_source(path, self.thumb_size, squared) else {
            return ThumbnailGenerator::generate(factory, path, self.thumb_size, squared);
        };

        if let Some(hit) = self.get_from_memory(&key) {
            trace!(?path, "Memory cache hit");
            return Ok(hit);
        }

        if let Some(disk_path) = self.disk_path(&key) {
            if disk_path.exists() {
                match self.load_from_disk(&key, &disk_path, squared) {
                    Ok(hit) => {
                        trace!(?path, "Disk cache hit");
                        return Ok(hit);
                    }
                    Err(e) => {
                        debug!(?disk_path, error = %e, "Dropping unreadable cached thumbnail");
                        let _ = std::fs::remove_file(&disk_path);
                    }
                }
            }
        }

        debug!(?path, "Cache miss, generating thumbnail");
        let thumb = ThumbnailGenerator::generate(factory, path, self.thumb_size, squared)?;
        if let Some(disk_path) = self.disk_path(&key) {
            if let Err(e) = thumb.frame.as_rgba().save(&disk_path) {
                warn!(?disk_path, error = %e, "Failed to write thumbnail to disk");
            }
        }
        self.add_to_memory(key, thumb.clone());
        Ok(thumb)
    }

    pub fn get_from_memory(&self, key: &CacheKey) -> Option<Thumbnail> {
        self.memory.lock().entries.get(key).cloned()
    }

    /// Whether a thumbnail for `path` is cached in either layer.
    pub fn contains(&self, path: &Path, squared: bool) -> bool {
        let Some(key) = CacheKey::for_source(path, self.thumb_size, squared) else {
            return false;
        };
        if self.memory.lock().entries.contains(&key) {
            return true;
        }
        self.disk_path(&key).is_some_and(|p| p.exists())
    }

    pub fn disk_path(&self, key: &CacheKey) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|d| d.join(key.disk_filename()))
    }

    fn load_from_disk(&self, key: &CacheKey, disk_path: &Path, squared: bool) -> Result<Thumbnail> {
        let pixels = image::open(disk_path)
            .with_context(|| format!("Failed to open cached thumbnail {:?}", disk_path))?
            .to_rgba8();
        let thumb = Thumbnail::new(pixels, self.thumb_size, squared);
        self.add_to_memory(*key, thumb.clone());
        Ok(thumb)
    }

    fn add_to_memory(&self, key: CacheKey, thumb: Thumbnail) {
        let needed = thumb.memory_bytes();
        let mut memory = self.memory.lock();

        if let Some(old) = memory.entries.pop(&key) {
            memory.bytes = memory.bytes.saturating_sub(old.memory_bytes());
        }
        while memory.bytes + needed > self.max_memory_bytes {
            match memory.entries.pop_lru() {
                Some((_, evicted)) => {
                    memory.bytes = memory.bytes.saturating_sub(evicted.memory_bytes());
                    trace!(
                        evicted_bytes = evicted.memory_bytes(),
                        current_bytes = memory.bytes,
                        "Evicted thumbnail from memory cache"
                    );
                }
                None => break,
            }
        }

        // the key was popped above, so anything returned here hit the entry cap
        if let Some((_, evicted)) = memory.entries.push(key, thumb) {
            memory.bytes = memory.bytes.saturating_sub(evicted.memory_bytes());
        }
        memory.bytes += needed;
    }

    pub fn clear_memory(&self) {
        let mut memory = self.memory.lock();
        memory.entries.clear();
        memory.bytes = 0;
        debug!("Cleared memory cache");
    }

    /// Clear memory and remove cached files from the disk layer.
    pub fn clear_all(&self) -> Result<()> {
        self.clear_memory();
        let Some(dir) = &self.cache_dir else {
            return Ok(());
        };
        if dir.exists() {
            for entry in std::fs::read_dir(dir)?.flatten() {
                let path = entry.path();
                if path.is_file() && path.extension().is_some_and(|e| e == "png") {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
        debug!(?dir, "Cleared disk cache");
        Ok(())
    }

    pub fn memory_usage(&self) -> usize {
        self.memory.lock().bytes
    }

    pub fn memory_entry_count(&self) -> usize {
        self.memory.lock().entries.len()
    }

    pub fn max_memory(&self) -> usize {
        self.max_memory_bytes
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }
}
