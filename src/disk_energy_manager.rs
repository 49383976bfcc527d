//! Policy object selecting the disk for a newly created chunk (spec.md
//! §4.5). Grounded loosely on the pluggable-policy style the teacher uses
//! for its own verify/prune policy objects in `pbs-datastore`; no single
//! original_source file owns this concern, spec.md treats it as a thin
//! seam.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Total over every registered disk: returns `None` only when no disk is
/// currently writable. Implementations must tolerate disks flipping
/// writable/read-only between calls.
pub trait DiskEnergyManager: Send + Sync {
    fn disk_for_new_chunk(&self) -> Option<PathBuf>;
}

#[derive(Debug, Clone)]
struct DiskInfo {
    path: PathBuf,
    chunk_count: u64,
    writable: bool,
}

/// Default policy: balance chunk count across writable disks.
pub struct LoadBalancedDiskEnergyManager {
    disks: Mutex<Vec<DiskInfo>>,
}

impl LoadBalancedDiskEnergyManager {
    pub fn new(disks: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            disks: Mutex::new(
                disks
                    .into_iter()
                    .map(|path| DiskInfo {
                        path,
                        chunk_count: 0,
                        writable: true,
                    })
                    .collect(),
            ),
        }
    }

    pub fn set_writable(&self, disk: &Path, writable: bool) {
        let mut disks = self.disks.lock().unwrap();
        if let Some(entry) = disks.iter_mut().find(|d| d.path == disk) {
            entry.writable = writable;
        }
    }

    /// Called after a chunk is actually created on `disk`, so future
    /// selections account for it.
    pub fn record_chunk_created(&self, disk: &Path) {
        let mut disks = self.disks.lock().unwrap();
        if let Some(entry) = disks.iter_mut().find(|d| d.path == disk) {
            entry.chunk_count += 1;
        }
    }
}

impl DiskEnergyManager for LoadBalancedDiskEnergyManager {
    fn disk_for_new_chunk(&self) -> Option<PathBuf> {
        let disks = self.disks.lock().unwrap();
        disks
            .iter()
            .filter(|d| d.writable)
            .min_by_key(|d| d.chunk_count)
            .map(|d| d.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_least_loaded_writable_disk() {
        let dem = LoadBalancedDiskEnergyManager::new(vec![PathBuf::from("/d0"), PathBuf::from("/d1")]);
        dem.record_chunk_created(&PathBuf::from("/d0"));
        dem.record_chunk_created(&PathBuf::from("/d0"));
        dem.record_chunk_created(&PathBuf::from("/d1"));

        assert_eq!(dem.disk_for_new_chunk(), Some(PathBuf::from("/d1")));
    }

    #[test]
    fn skips_disks_that_have_gone_read_only() {
        let dem = LoadBalancedDiskEnergyManager::new(vec![PathBuf::from("/d0"), PathBuf::from("/d1")]);
        dem.set_writable(&PathBuf::from("/d1"), false);

        assert_eq!(dem.disk_for_new_chunk(), Some(PathBuf::from("/d0")));
    }

    #[test]
    fn returns_none_when_nothing_is_writable() {
        let dem = LoadBalancedDiskEnergyManager::new(vec![PathBuf::from("/d0")]);
        dem.set_writable(&PathBuf::from("/d0"), false);

        assert_eq!(dem.disk_for_new_chunk(), None);
    }
}
