//! Ordered source collection.
//!
//! Indices are stable until the collection is replaced; the cache is sized
//! from `len()` and invalidated whenever a new collection is installed.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tokio::task;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::source_info::MediaType;

/// Configuration for directory scans.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Whether to descend into subdirectories.
    pub recursive: bool,
    /// Maximum directory depth when recursive (0 = unlimited).
    pub max_depth: usize,
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            recursive: false,
            max_depth: 0,
            follow_symlinks: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceCollection {
    dir: Option<PathBuf>,
    paths: Vec<PathBuf>,
}

impl SourceCollection {
    /// Use `paths` as given, in order.
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { dir: None, paths }
    }

    /// Collect supported images under `dir`, sorted by path.
    pub fn scan_dir(dir: &Path, config: &ScanConfig) -> Result<Self> {
        let mut walker = WalkDir::new(dir).follow_links(config.follow_symlinks);
        if !config.recursive {
            walker = walker.max_depth(1);
        } else if config.max_depth > 0 {
            walker = walker.max_depth(config.max_depth);
        }

        let mut paths = Vec::new();
        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to scan {:?}", dir))?;
            if entry.file_type().is_file() && MediaType::from_path(entry.path()).is_some() {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        info!("Discovered {} images in {:?}", paths.len(), dir);
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            paths,
        })
    }

    /// Scan on the blocking pool.
    pub async fn scan(dir: PathBuf, config: ScanConfig) -> Result<Self> {
        task::spawn_blocking(move || Self::scan_dir(&dir, &config))
            .await
            .context("Scan task panicked")?
    }

    /// Scan the directory containing `file` and locate it.
    pub fn for_file(file: &Path) -> Result<(Self, usize)> {
        let dir = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let collection = Self::scan_dir(dir, &ScanConfig::default())?;
        let index = collection
            .position_of(file)
            .ok_or_else(|| anyhow!("Not a supported image: {:?}", file))?;
        debug!(?file, index, "Located file in collection");
        Ok((collection, index))
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn position_of(&self, path: &Path) -> Option<usize> {
        self.paths.iter().position(|p| p == path).or_else(|| {
            // tolerate relative vs absolute spellings of the same file
            let wanted = path.canonicalize().ok()?;
            self.paths
                .iter()
                .position(|p| p.canonicalize().ok().as_deref() == Some(wanted.as_path()))
        })
    }

    /// Next index, wrapping to the start.
    pub fn next_index(&self, index: usize) -> Option<usize> {
        if self.paths.is_empty() {
            None
        } else {
            Some((index + 1) % self.paths.len())
        }
    }

    /// Previous index, wrapping to the end.
    pub fn prev_index(&self, index: usize) -> Option<usize> {
        if self.paths.is_empty() {
            None
        } else {
            let len = self.paths.len();
            Some((index % len + len - 1) % len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_png;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn test_scan_config_default() {
        let config = ScanConfig::default();
        assert!(!config.recursive);
        assert_eq!(config.max_depth, 0);
        assert!(!config.follow_symlinks);
    }

    #[test]
    fn test_scan_empty_dir() {
        let dir = tempdir().unwrap();
        let collection = SourceCollection::scan_dir(dir.path(), &ScanConfig::default()).unwrap();
        assert!(collection.is_empty());
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("b.png"), 2, 2);
        write_png(&dir.path().join("a.png"), 2, 2);
        File::create(dir.path().join("notes.txt")).unwrap();

        let collection = SourceCollection::scan_dir(dir.path(), &ScanConfig::default()).unwrap();
        assert_eq!(collection.len(), 2);
        assert!(collection.path(0).unwrap().ends_with("a.png"));
        assert!(collection.path(1).unwrap().ends_with("b.png"));
        assert!(collection.path(2).is_none());
    }

    #[test]
    fn test_scan_recursive() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        write_png(&dir.path().join("root.png"), 1, 1);
        write_png(&sub.join("nested.png"), 1, 1);

        let flat = SourceCollection::scan_dir(dir.path(), &ScanConfig::default()).unwrap();
        assert_eq!(flat.len(), 1);

        let config = ScanConfig {
            recursive: true,
            ..Default::default()
        };
        let deep = SourceCollection::scan_dir(dir.path(), &config).unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn test_for_file_locates_index() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 1, 1);
        write_png(&dir.path().join("b.png"), 1, 1);
        write_png(&dir.path().join("c.png"), 1, 1);

        let (collection, index) = SourceCollection::for_file(&dir.path().join("b.png")).unwrap();
        assert_eq!(collection.len(), 3);
        assert_eq!(index, 1);

        assert!(SourceCollection::for_file(&dir.path().join("missing.png")).is_err());
    }

    #[test]
    fn test_wrapping_navigation() {
        let collection =
            SourceCollection::from_paths(vec!["a.png".into(), "b.png".into(), "c.png".into()]);
        assert_eq!(collection.next_index(2), Some(0));
        assert_eq!(collection.prev_index(0), Some(2));
        assert_eq!(collection.next_index(0), Some(1));
        assert_eq!(SourceCollection::default().next_index(0), None);
    }

    #[tokio::test]
    async fn test_async_scan() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("one.png"), 1, 1);
        let collection = SourceCollection::scan(dir.path().to_path_buf(), ScanConfig::default())
            .await
            .unwrap();
        assert_eq!(collection.len(), 1);
    }
}
