//! In-memory index of trashed files, grounded on
//! `examples/original_source/src/chunkserver/chunkserver-common/chunk_trash_index.cc`.
//!
//! Rendered as an owned, instantiable object rather than a process-wide
//! singleton (spec.md §9: "tests must be able to instantiate fresh
//! instances"). `TrashManager` owns one and threads it through.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// `disk_path -> {deletion_time -> [file_path, ...]}`. A `BTreeMap` gives
/// the oldest-first iteration order `get_expired`/`get_older` need without
/// a separate multimap type.
#[derive(Default)]
pub struct TrashIndex {
    by_disk: HashMap<PathBuf, BTreeMap<i64, Vec<PathBuf>>>,
}

impl TrashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops and recreates the per-disk map, discarding any prior entries
    /// for `disk`. Used by `init()` before a rescan.
    pub fn reset(&mut self, disk: &Path) {
        self.by_disk.insert(disk.to_path_buf(), BTreeMap::new());
    }

    /// Inserts `(deletion_time, path)` under `disk`. Spec.md §3 requires
    /// `(time, path)` to be unique across disks (open question in spec.md
    /// §9); a duplicate overwrites in place rather than creating a second,
    /// unreachable entry, which would otherwise violate the invariant that
    /// every trash file maps to exactly one index entry.
    pub fn add(&mut self, deletion_time: i64, path: PathBuf, disk: &Path) {
        for (other_disk, entries) in self.by_disk.iter_mut() {
            if other_disk != disk {
                if let Some(paths) = entries.get_mut(&deletion_time) {
                    paths.retain(|p| p != &path);
                    if paths.is_empty() {
                        entries.remove(&deletion_time);
                    }
                }
            }
        }

        self.by_disk
            .entry(disk.to_path_buf())
            .or_default()
            .entry(deletion_time)
            .or_default()
            .push(path);
    }

    /// Removes `(deletion_time, path)` from `disk`'s map.
    pub fn remove_from_disk(&mut self, deletion_time: i64, path: &Path, disk: &Path) -> bool {
        let Some(entries) = self.by_disk.get_mut(disk) else {
            return false;
        };
        let Some(paths) = entries.get_mut(&deletion_time) else {
            return false;
        };
        let before = paths.len();
        paths.retain(|p| p != path);
        let removed = paths.len() != before;
        if paths.is_empty() {
            entries.remove(&deletion_time);
        }
        removed
    }

    /// Removes `(deletion_time, path)` without knowing which disk it's on.
    /// The reference implementation iterates disks but returns after the
    /// first match, silently missing duplicates on other disks (spec.md
    /// §9's open question). This sweeps every disk instead.
    pub fn remove(&mut self, deletion_time: i64, path: &Path) -> bool {
        let mut removed = false;
        let disks: Vec<PathBuf> = self.by_disk.keys().cloned().collect();
        for disk in disks {
            if self.remove_from_disk(deletion_time, path, &disk) {
                removed = true;
            }
        }
        removed
    }

    /// All entries with `deletion_time < time_limit`, oldest first, for
    /// `disk`, capped at `bulk`.
    pub fn get_expired(&self, disk: &Path, time_limit: i64, bulk: usize) -> Vec<(i64, PathBuf)> {
        let Some(entries) = self.by_disk.get(disk) else {
            return Vec::new();
        };
        let mut result = Vec::new();
        'outer: for (&time, paths) in entries.range(..time_limit) {
            for path in paths {
                if result.len() >= bulk {
                    break 'outer;
                }
                result.push((time, path.clone()));
            }
        }
        result
    }

    /// All entries with `deletion_time < time_limit` across every disk.
    pub fn get_expired_all_disks(&self, time_limit: i64, bulk: usize) -> Vec<(PathBuf, i64, PathBuf)> {
        let mut result = Vec::new();
        for (disk, entries) in self.by_disk.iter() {
            for (&time, paths) in entries.range(..time_limit) {
                for path in paths {
                    if result.len() >= bulk {
                        return result;
                    }
                    result.push((disk.clone(), time, path.clone()));
                }
            }
        }
        result
    }

    /// Oldest `step` entries for `disk`, used by `make_space`.
    pub fn get_older(&self, disk: &Path, step: usize) -> Vec<(i64, PathBuf)> {
        let Some(entries) = self.by_disk.get(disk) else {
            return Vec::new();
        };
        let mut result = Vec::new();
        'outer: for (&time, paths) in entries.iter() {
            for path in paths {
                if result.len() >= step {
                    break 'outer;
                }
                result.push((time, path.clone()));
            }
        }
        result
    }

    pub fn get_disk_paths(&self) -> Vec<PathBuf> {
        self.by_disk.keys().cloned().collect()
    }

    pub fn len_for_disk(&self, disk: &Path) -> usize {
        self.by_disk
            .get(disk)
            .map(|entries| entries.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_add_expire_remove() {
        let mut index = TrashIndex::new();
        let disk = PathBuf::from("/d");
        index.add(1_234_567_890, PathBuf::from("/d/.trash.bin/p/f"), &disk);

        let expired = index.get_expired(&disk, 1_234_567_891, 100);
        assert_eq!(
            expired,
            vec![(1_234_567_890, PathBuf::from("/d/.trash.bin/p/f"))]
        );

        assert!(index.remove(1_234_567_890, &PathBuf::from("/d/.trash.bin/p/f")));
        assert!(index.get_expired(&disk, 1_234_567_891, 100).is_empty());
    }

    #[test]
    fn get_expired_respects_time_limit_and_bulk() {
        let mut index = TrashIndex::new();
        let disk = PathBuf::from("/d");
        for i in 0..5 {
            index.add(1000 + i, PathBuf::from(format!("/d/.trash.bin/f{i}")), &disk);
        }

        let expired = index.get_expired(&disk, 1003, 2);
        assert_eq!(expired.len(), 2);
        for (time, _) in &expired {
            assert!(*time < 1003);
        }
    }

    #[test]
    fn remove_without_disk_sweeps_every_disk() {
        let mut index = TrashIndex::new();
        index.add(100, PathBuf::from("/a/.trash.bin/f"), &PathBuf::from("/other"));
        // force onto a second disk by direct insertion path
        index.add(100, PathBuf::from("/b/.trash.bin/f"), &PathBuf::from("/b"));

        assert!(index.remove(100, &PathBuf::from("/b/.trash.bin/f")));
        assert_eq!(index.len_for_disk(&PathBuf::from("/b")), 0);
    }
}
