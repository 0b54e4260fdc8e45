use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use once_cell::sync::OnceCell;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Still,
    Animated,
}

impl MediaType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "bmp" | "tiff" | "tif" => Some(Self::Still),
            "gif" => Some(Self::Animated),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Filesystem facts about a source, read on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMetadata {
    pub size: u64,
    /// Seconds since the Unix epoch, 0 if unavailable.
    pub mtime: i64,
}

/// Describes one source item. Everything beyond the path is resolved lazily.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    path: PathBuf,
    extension: String,
    metadata: OnceCell<Option<SourceMetadata>>,
    dimensions: OnceCell<Option<(u32, u32)>>,
}

impl SourceInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        Self {
            path,
            extension,
            metadata: OnceCell::new(),
            dimensions: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lower-cased extension without the dot, empty if none.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn media_type(&self) -> Option<MediaType> {
        MediaType::from_extension(&self.extension)
    }

    /// Size and mtime, `None` if the file cannot be stat'ed.
    pub fn metadata(&self) -> Option<SourceMetadata> {
        *self.metadata.get_or_init(|| {
            let meta = std::fs::metadata(&self.path).ok()?;
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            trace!(path = ?self.path, "Resolved source metadata");
            Some(SourceMetadata {
                size: meta.len(),
                mtime,
            })
        })
    }

    /// Pixel dimensions read from the file header.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        *self
            .dimensions
            .get_or_init(|| crate::image_loader::read_dimensions(&self.path).ok())
    }
}
