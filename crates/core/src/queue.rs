//! Work items and the batch queue.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff"];
const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Lifecycle of one item's image transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

/// Lifecycle of one enrichment sub-task (description or tags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichStatus {
    Pending,
    Generating,
    Completed,
    Error,
    RateLimited,
}

impl EnrichStatus {
    /// Terminal rate-limit exhaustion is reported as a plain error.
    pub fn normalized(self) -> Self {
        match self {
            EnrichStatus::RateLimited => EnrichStatus::Error,
            other => other,
        }
    }
}

/// A single image in the processing queue.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub source_path: PathBuf,
    /// Assigned once before processing starts, never mutated afterwards.
    pub output_path: Option<PathBuf>,
    pub status: ItemStatus,
    pub description_status: EnrichStatus,
    pub tag_status: EnrichStatus,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub tag_categories: BTreeMap<String, Vec<String>>,
    pub error: Option<String>,
    pub description_error: Option<String>,
    pub tag_error: Option<String>,
    pub file_size: u64,
    pub processing_time: Duration,
    pub enrichment_time: Duration,
    pub api_cost: f64,
}

impl WorkItem {
    fn new(source_path: PathBuf, file_size: u64) -> Self {
        Self {
            source_path,
            output_path: None,
            status: ItemStatus::Pending,
            description_status: EnrichStatus::Pending,
            tag_status: EnrichStatus::Pending,
            description: None,
            tags: Vec::new(),
            tag_categories: BTreeMap::new(),
            error: None,
            description_error: None,
            tag_error: None,
            file_size,
            processing_time: Duration::ZERO,
            enrichment_time: Duration::ZERO,
            api_cost: 0.0,
        }
    }

    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Counts per status, for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total: usize,
    pub total_bytes: u64,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub with_description: usize,
    pub with_tags: usize,
}

/// The image queue. Mutations are rejected while a batch run holds the
/// processing lock.
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: Vec<WorkItem>,
    locked: bool,
    excludes: Option<GlobSet>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set glob patterns excluded from folder discovery.
    pub fn set_excludes(&mut self, patterns: &[String]) -> anyhow::Result<()> {
        if patterns.is_empty() {
            self.excludes = None;
            return Ok(());
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        self.excludes = Some(builder.build()?);
        Ok(())
    }

    pub fn add_image(&mut self, path: &Path) -> bool {
        if self.locked {
            tracing::warn!(path = %path.display(), "Queue locked, cannot add");
            return false;
        }
        let meta = match fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                tracing::warn!(path = %path.display(), "Not a file");
                return false;
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), "File does not exist");
                return false;
            }
        };
        if !has_supported_extension(path) {
            tracing::warn!(path = %path.display(), "Unsupported format");
            return false;
        }
        let size = meta.len();
        if size == 0 || size > MAX_FILE_SIZE {
            tracing::warn!(path = %path.display(), size, "File size out of range");
            return false;
        }
        if self.items.iter().any(|i| i.source_path == path) {
            tracing::warn!(path = %path.display(), "Already in queue");
            return false;
        }

        self.items.push(WorkItem::new(path.to_path_buf(), size));
        tracing::info!(path = %path.display(), "Added to queue");
        true
    }

    /// Discover compatible images under a folder and enqueue them.
    /// Returns the number actually added.
    pub fn add_folder(&mut self, folder: &Path, recursive: bool) -> usize {
        if self.locked {
            tracing::warn!(path = %folder.display(), "Queue locked, cannot add folder");
            return 0;
        }
        if !folder.is_dir() {
            tracing::warn!(path = %folder.display(), "Not a directory");
            return 0;
        }

        let mut discovered: Vec<PathBuf> = Vec::new();
        let max_depth = if recursive { usize::MAX } else { 1 };
        for entry in WalkDir::new(folder)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !has_supported_extension(path) {
                continue;
            }
            if let Some(excludes) = &self.excludes {
                if excludes.is_match(path) {
                    continue;
                }
            }
            discovered.push(path.to_path_buf());
        }
        discovered.sort();

        let added = discovered.iter().filter(|p| self.add_image(p)).count();
        tracing::info!(folder = %folder.display(), added, "Folder scan complete");
        added
    }

    pub fn remove(&mut self, index: usize) -> bool {
        if self.locked {
            tracing::warn!("Queue locked, cannot remove");
            return false;
        }
        if index >= self.items.len() {
            return false;
        }
        let removed = self.items.remove(index);
        tracing::info!(path = %removed.source_path.display(), "Removed from queue");
        true
    }

    pub fn clear(&mut self) -> bool {
        if self.locked {
            tracing::warn!("Queue locked, cannot clear");
            return false;
        }
        self.items.clear();
        true
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub(crate) fn items_mut(&mut self) -> &mut [WorkItem] {
        &mut self.items
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.items.len(),
            ..Default::default()
        };
        for item in &self.items {
            stats.total_bytes += item.file_size;
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::Processing => stats.processing += 1,
                ItemStatus::Completed => stats.completed += 1,
                ItemStatus::Failed => stats.failed += 1,
                ItemStatus::Skipped => stats.skipped += 1,
            }
            if item.description_status == EnrichStatus::Completed && item.description.is_some() {
                stats.with_description += 1;
            }
            if item.tag_status == EnrichStatus::Completed && !item.tags.is_empty() {
                stats.with_tags += 1;
            }
        }
        stats
    }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"not really an image, but bytes").unwrap();
        path
    }

    #[test]
    fn duplicate_add_returns_false_and_keeps_length() {
        let dir = tempfile::tempdir().unwrap();
        let img = touch(dir.path(), "a.jpg");

        let mut queue = WorkQueue::new();
        assert!(queue.add_image(&img));
        assert_eq!(queue.len(), 1);
        assert!(!queue.add_image(&img));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn rejects_missing_unsupported_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = WorkQueue::new();

        assert!(!queue.add_image(&dir.path().join("missing.jpg")));

        let txt = touch(dir.path(), "notes.txt");
        assert!(!queue.add_image(&txt));

        let empty = dir.path().join("empty.png");
        fs::write(&empty, b"").unwrap();
        assert!(!queue.add_image(&empty));

        assert!(queue.is_empty());
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let img = touch(dir.path(), "UPPER.JPG");
        let mut queue = WorkQueue::new();
        assert!(queue.add_image(&img));
    }

    #[test]
    fn folder_discovery_counts_and_depth() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.jpg");
        touch(dir.path(), "b.PNG");
        touch(dir.path(), "skip.txt");
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        touch(&sub, "c.tiff");

        let mut queue = WorkQueue::new();
        assert_eq!(queue.add_folder(dir.path(), false), 2);
        queue.clear();
        assert_eq!(queue.add_folder(dir.path(), true), 3);
    }

    #[test]
    fn excludes_filter_discovery() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "keep.jpg");
        touch(dir.path(), "draft-skip.jpg");

        let mut queue = WorkQueue::new();
        queue.set_excludes(&["**/draft-*".to_string()]).unwrap();
        assert_eq!(queue.add_folder(dir.path(), false), 1);
        assert_eq!(queue.items()[0].file_name(), "keep.jpg");
    }

    #[test]
    fn mutations_rejected_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let img = touch(dir.path(), "a.jpg");
        let other = touch(dir.path(), "b.jpg");

        let mut queue = WorkQueue::new();
        assert!(queue.add_image(&img));
        queue.set_locked(true);
        assert!(!queue.add_image(&other));
        assert!(!queue.remove(0));
        assert!(!queue.clear());
        assert_eq!(queue.len(), 1);
        queue.set_locked(false);
        assert!(queue.remove(0));
    }

    #[test]
    fn rate_limited_normalizes_to_error() {
        assert_eq!(EnrichStatus::RateLimited.normalized(), EnrichStatus::Error);
        assert_eq!(EnrichStatus::Completed.normalized(), EnrichStatus::Completed);
    }

    #[test]
    fn stats_aggregate_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.jpg");
        let b = touch(dir.path(), "b.jpg");
        let mut queue = WorkQueue::new();
        queue.add_image(&a);
        queue.add_image(&b);
        queue.items_mut()[0].status = ItemStatus::Completed;

        let stats = queue.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert!(stats.total_bytes > 0);
    }
}
