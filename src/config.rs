//! Loader configuration.
//!
//! Defaults are compiled in; every field can be overridden from the
//! environment (`IDXV_*`) or through the builder-style setters.

use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tracing::warn;

/// Number of threads decoding full images.
const DEFAULT_LOAD_WORKERS: usize = 2;

/// Thumbnail edge length in pixels.
pub const DEFAULT_THUMB_SIZE: u32 = 128;

/// Largest accepted thumbnail edge.
pub const MAX_THUMB_SIZE: u32 = 1024;

/// Neighbours prefetched on each side of the displayed slot.
const DEFAULT_PRELOAD_RADIUS: usize = 1;

/// Loaded slots kept on each side of the displayed slot when trimming.
const DEFAULT_CACHE_RADIUS: usize = 3;

const DEFAULT_THUMB_MEMORY_MB: usize = 64;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub load_workers: usize,
    /// `None` sizes the pool from available parallelism.
    pub thumbnail_workers: Option<usize>,
    pub thumbnail_size: u32,
    pub preload_radius: usize,
    pub cache_radius: usize,
    pub thumbnail_memory_mb: usize,
    /// Disk layer for generated thumbnails; memory-only when unset.
    pub thumbnail_cache_dir: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            load_workers: DEFAULT_LOAD_WORKERS,
            thumbnail_workers: None,
            thumbnail_size: DEFAULT_THUMB_SIZE,
            preload_radius: DEFAULT_PRELOAD_RADIUS,
            cache_radius: DEFAULT_CACHE_RADIUS,
            thumbnail_memory_mb: DEFAULT_THUMB_MEMORY_MB,
            thumbnail_cache_dir: None,
        }
    }
}

impl LoaderConfig {
    /// Defaults overridden by any `IDXV_*` variables that parse.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_usize("IDXV_LOAD_WORKERS") {
            config.load_workers = v;
        }
        if let Some(v) = env_usize("IDXV_THUMB_WORKERS") {
            config.thumbnail_workers = Some(v);
        }
        if let Some(v) = env_usize("IDXV_THUMB_SIZE") {
            let size = u32::try_from(v).unwrap_or(u32::MAX);
            if size > MAX_THUMB_SIZE {
                warn!(size = v, max = MAX_THUMB_SIZE, "Clamping thumbnail size");
            }
            config.thumbnail_size = size.min(MAX_THUMB_SIZE);
        }
        if let Some(v) = env_usize("IDXV_PRELOAD_RADIUS") {
            config.preload_radius = v;
        }
        if let Some(v) = env_usize("IDXV_CACHE_RADIUS") {
            config.cache_radius = v;
        }
        if let Some(v) = env_usize("IDXV_THUMB_MEMORY_MB") {
            config.thumbnail_memory_mb = v;
        }
        config
    }

    pub fn load_workers(mut self, count: usize) -> Self {
        self.load_workers = count;
        self
    }

    pub fn thumbnail_workers(mut self, count: usize) -> Self {
        self.thumbnail_workers = Some(count);
        self
    }

    pub fn thumbnail_size(mut self, size: u32) -> Self {
        self.thumbnail_size = size.clamp(1, MAX_THUMB_SIZE);
        self
    }

    pub fn preload_radius(mut self, radius: usize) -> Self {
        self.preload_radius = radius;
        self
    }

    pub fn cache_radius(mut self, radius: usize) -> Self {
        self.cache_radius = radius;
        self
    }

    pub fn thumbnail_memory_mb(mut self, mb: usize) -> Self {
        self.thumbnail_memory_mb = mb;
        self
    }

    pub fn thumbnail_cache_dir(mut self, dir: PathBuf) -> Self {
        self.thumbnail_cache_dir = Some(dir);
        self
    }

    /// Use the XDG cache directory for thumbnails.
    pub fn with_default_thumbnail_dir(mut self) -> Result<Self> {
        self.thumbnail_cache_dir = Some(default_thumbnail_dir()?);
        Ok(self)
    }

    /// The cache radius never drops below the preload radius, otherwise
    /// prefetched neighbours would be trimmed on the next navigation.
    pub fn effective_cache_radius(&self) -> usize {
        self.cache_radius.max(self.preload_radius)
    }
}

pub fn default_thumbnail_dir() -> Result<PathBuf> {
    let proj_dirs =
        ProjectDirs::from("", "", "idxv").context("Failed to determine project directories")?;
    Ok(proj_dirs.cache_dir().join("thumbs"))
}

fn env_usize(key: &str) -> Option<usize> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            warn!(key, value = %raw, "Ignoring invalid config override");
            None
        }
    }
}
