//! Duplicate index: content hash → event positions, per chronicle.
//!
//! An `EventIndex` is a snapshot of one file.  It records the file's length
//! and modification time when built; `EventIndexCache::maintain_event_index`
//! compares them against the file on every call and rebuilds on any
//! mismatch, so writes by other processes are detected rather than assumed
//! away.  Appends made through the cache (`record_append`) update the index
//! in place and refresh the stamp.
//!
//! The cache is an ordinary owned value.  Callers decide its lifetime and
//! which paths it covers.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use chronicle_contracts::{
    error::{ChronicleError, ChronicleResult},
    event::ChronicleEvent,
};
use chronicle_core::content_hash;

use crate::storage::read_chronicle_file;

/// Size and mtime of a chronicle file, or the absence of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn read(path: &Path) -> ChronicleResult<Self> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Self {
                len: meta.len(),
                modified: meta.modified().ok(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self {
                len: 0,
                modified: None,
            }),
            Err(e) => Err(ChronicleError::io("stat", path, e)),
        }
    }
}

/// Map from logical content hash to the positions (0-based, among parsed
/// events) where that content occurs.
#[derive(Debug, Clone)]
pub struct EventIndex {
    path: PathBuf,
    stamp: FileStamp,
    positions: HashMap<String, Vec<usize>>,
    event_count: usize,
}

impl EventIndex {
    /// Index the chronicle at `path` from scratch.
    pub fn build(path: &Path) -> ChronicleResult<Self> {
        // Stamp first: a concurrent append after this point makes the stamp
        // stale, which forces a rebuild on the next check.
        let stamp = FileStamp::read(path)?;
        let events = read_chronicle_file(path)?;

        let mut positions: HashMap<String, Vec<usize>> = HashMap::with_capacity(events.len());
        for (pos, event) in events.iter().enumerate() {
            positions.entry(content_hash(event)?).or_default().push(pos);
        }

        Ok(Self {
            path: path.to_path_buf(),
            stamp,
            positions,
            event_count: events.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of events indexed.
    pub fn len(&self) -> usize {
        self.event_count
    }

    pub fn is_empty(&self) -> bool {
        self.event_count == 0
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.positions.contains_key(hash)
    }

    /// Positions of events with this content hash, in file order.
    pub fn positions_of(&self, hash: &str) -> &[usize] {
        self.positions.get(hash).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True while the file still matches the snapshot.
    pub fn is_current(&self) -> ChronicleResult<bool> {
        Ok(FileStamp::read(&self.path)? == self.stamp)
    }

    fn insert(&mut self, event: &ChronicleEvent) -> ChronicleResult<()> {
        let hash = content_hash(event)?;
        self.positions.entry(hash).or_default().push(self.event_count);
        self.event_count += 1;
        Ok(())
    }
}

/// Caller-owned indexes keyed by chronicle path.
#[derive(Debug, Default)]
pub struct EventIndexCache {
    indexes: HashMap<PathBuf, EventIndex>,
    rebuilds: usize,
}

impl EventIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return an index for `path` that matches the file as it is now,
    /// rebuilding if the file's size or mtime moved since the last snapshot.
    pub fn maintain_event_index(&mut self, path: &Path) -> ChronicleResult<&EventIndex> {
        match self.indexes.entry(path.to_path_buf()) {
            Entry::Occupied(slot) if slot.get().is_current()? => Ok(slot.into_mut()),
            Entry::Occupied(mut slot) => {
                debug!(path = %path.display(), "chronicle changed on disk; rebuilding index");
                slot.insert(EventIndex::build(path)?);
                self.rebuilds += 1;
                Ok(slot.into_mut())
            }
            Entry::Vacant(slot) => {
                debug!(path = %path.display(), "building chronicle duplicate index");
                let index = slot.insert(EventIndex::build(path)?);
                self.rebuilds += 1;
                Ok(index)
            }
        }
    }

    /// Account for an event this process just appended to `path`.  Callers
    /// hold the chronicle lock across the write and this call.  A no-op when
    /// no index is cached for `path`.
    pub fn record_append(&mut self, path: &Path, event: &ChronicleEvent) -> ChronicleResult<()> {
        let Some(index) = self.indexes.get_mut(path) else {
            return Ok(());
        };
        index.insert(event)?;
        index.stamp = FileStamp::read(path)?;
        Ok(())
    }

    /// Drop the cached index for `path`.
    pub fn invalidate(&mut self, path: &Path) {
        self.indexes.remove(path);
    }

    /// How many full builds this cache has performed.
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }
}

/// O(1) average-case membership check against an index.
pub fn is_duplicate_using_index(event: &ChronicleEvent, index: &EventIndex) -> ChronicleResult<bool> {
    Ok(index.contains_hash(&content_hash(event)?))
}

/// Flag each event that is already indexed or repeats an earlier event of
/// the same batch.
pub fn batch_check_duplicates(
    events: &[ChronicleEvent],
    index: &EventIndex,
) -> ChronicleResult<Vec<bool>> {
    let mut seen_in_batch: HashSet<String> = HashSet::with_capacity(events.len());
    events
        .iter()
        .map(|event| {
            let hash = content_hash(event)?;
            let repeated = !seen_in_batch.insert(hash.clone());
            Ok(repeated || index.contains_hash(&hash))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    use chronicle_contracts::{Actor, EventPayload};

    use super::*;
    use crate::append::AppendOptions;
    use crate::causal::append_with_causal_chain;
    use crate::storage::append_line;

    fn build(n: i64) -> ChronicleEvent {
        ChronicleEvent::draft(
            Actor::new("executor", "e-1"),
            Utc.timestamp_opt(1_767_225_600, 0).unwrap() + Duration::seconds(n),
            EventPayload::Build {
                command: "cargo build".to_string(),
                success: true,
                duration_ms: 1_000 + n as u64,
                output_summary: None,
            },
        )
    }

    fn seeded(dir: &TempDir, count: i64) -> PathBuf {
        let path = dir.path().join("c.ndjson");
        for n in 0..count {
            append_with_causal_chain(&path, build(n), &AppendOptions::default()).unwrap();
        }
        path
    }

    #[test]
    fn index_finds_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = seeded(&dir, 3);
        let mut cache = EventIndexCache::new();

        let index = cache.maintain_event_index(&path).unwrap();
        assert_eq!(index.len(), 3);
        assert!(is_duplicate_using_index(&build(1), index).unwrap());
        assert!(!is_duplicate_using_index(&build(9), index).unwrap());
        assert_eq!(index.positions_of(&content_hash(&build(2)).unwrap()), &[2]);
    }

    #[test]
    fn unchanged_file_reuses_index() {
        let dir = TempDir::new().unwrap();
        let path = seeded(&dir, 2);
        let mut cache = EventIndexCache::new();

        cache.maintain_event_index(&path).unwrap();
        cache.maintain_event_index(&path).unwrap();
        assert_eq!(cache.rebuild_count(), 1);
    }

    #[test]
    fn foreign_append_forces_rebuild() {
        let dir = TempDir::new().unwrap();
        let path = seeded(&dir, 2);
        let mut cache = EventIndexCache::new();
        cache.maintain_event_index(&path).unwrap();

        // Another writer appends behind the cache's back.
        append_with_causal_chain(&path, build(7), &AppendOptions::default()).unwrap();

        let index = cache.maintain_event_index(&path).unwrap();
        assert_eq!(index.len(), 3);
        assert!(is_duplicate_using_index(&build(7), index).unwrap());
        assert_eq!(cache.rebuild_count(), 2);
    }

    #[test]
    fn cache_tracks_a_chronicle_from_missing_to_populated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("later.ndjson");
        let mut cache = EventIndexCache::new();

        let index = cache.maintain_event_index(&path).unwrap();
        assert!(index.is_empty(), "a missing chronicle indexes as empty");

        append_with_causal_chain(&path, build(1), &AppendOptions::default()).unwrap();
        assert_eq!(cache.maintain_event_index(&path).unwrap().len(), 1);

        cache.invalidate(&path);
        assert_eq!(cache.maintain_event_index(&path).unwrap().len(), 1);
        assert_eq!(cache.rebuild_count(), 3, "build, stale rebuild, post-invalidate build");
    }

    #[test]
    fn record_append_keeps_index_current() {
        let dir = TempDir::new().unwrap();
        let path = seeded(&dir, 1);
        let mut cache = EventIndexCache::new();
        cache.maintain_event_index(&path).unwrap();

        let stored = chronicle_core::link_event(build(5), None).unwrap();
        append_line(&path, &crate::storage::serialize_event(&stored).unwrap()).unwrap();
        cache.record_append(&path, &stored).unwrap();

        let index = cache.maintain_event_index(&path).unwrap();
        assert_eq!(index.len(), 2);
        assert!(is_duplicate_using_index(&build(5), index).unwrap());
        assert_eq!(cache.rebuild_count(), 1);
    }

    #[test]
    fn batch_flags_index_hits_and_in_batch_repeats() {
        let dir = TempDir::new().unwrap();
        let path = seeded(&dir, 2);
        let mut cache = EventIndexCache::new();
        let index = cache.maintain_event_index(&path).unwrap();

        let batch = vec![build(0), build(4), build(4), build(1), build(5)];
        let flags = batch_check_duplicates(&batch, index).unwrap();
        assert_eq!(flags, vec![true, false, true, true, false]);
    }

    #[test]
    fn missing_file_indexes_as_empty() {
        let dir = TempDir::new().unwrap();
        let mut cache = EventIndexCache::new();
        let index = cache.maintain_event_index(&dir.path().join("none.ndjson")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn invalidate_drops_index() {
        let dir = TempDir::new().unwrap();
        let path = seeded(&dir, 1);
        let mut cache = EventIndexCache::new();
        cache.maintain_event_index(&path).unwrap();
        cache.invalidate(&path);
        cache.maintain_event_index(&path).unwrap();
        assert_eq!(cache.rebuild_count(), 2);
    }
}
