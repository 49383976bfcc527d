//! Per-(inode, open handle) read state: the cache, the adviser, and the
//! FIFO of in-flight readahead requests (spec.md §3, §4.4).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::adviser::ReadaheadAdviser;
use super::cache::ReadCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Inqueued,
    Processing,
    Discarded,
    Finished,
}

struct PendingRequest {
    entry_id: u64,
    offset: u64,
    state: RequestState,
}

pub struct ReadRecord {
    pub cache: ReadCache,
    pub adviser: Mutex<ReadaheadAdviser>,
    pending: Mutex<VecDeque<PendingRequest>>,
    expired: AtomicBool,
}

impl ReadRecord {
    pub fn new(adviser: ReadaheadAdviser) -> Self {
        Self {
            cache: ReadCache::new(),
            adviser: Mutex::new(adviser),
            pending: Mutex::new(VecDeque::new()),
            expired: AtomicBool::new(false),
        }
    }

    /// True if some not-yet-finished request already targets `offset`;
    /// callers use this to avoid issuing a second fetch for the same
    /// position (spec.md §8's "at most one in-flight request per key").
    pub fn has_pending_for_offset(&self, offset: u64) -> bool {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.offset == offset && r.state != RequestState::Finished && r.state != RequestState::Discarded)
    }

    pub fn push_pending(&self, entry_id: u64, offset: u64) {
        self.pending.lock().unwrap().push_back(PendingRequest {
            entry_id,
            offset,
            state: RequestState::Inqueued,
        });
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Marks the request for `entry_id` finished and drains it along with
    /// any now-stale finished entries from the head, preserving FIFO
    /// notification order (spec.md §5).
    pub fn finish(&self, entry_id: u64) {
        let mut pending = self.pending.lock().unwrap();
        for req in pending.iter_mut() {
            if req.entry_id == entry_id {
                req.state = RequestState::Finished;
                break;
            }
        }
        while matches!(pending.front(), Some(r) if r.state == RequestState::Finished) {
            pending.pop_front();
        }
    }

    /// Marks every pending request Discarded; used when the record is
    /// released while requests are still in flight. Workers observe
    /// Discarded on their next check and skip real I/O, but waiters are
    /// still signaled through the cache's done condvar.
    pub fn discard_all_pending(&self) {
        let mut pending = self.pending.lock().unwrap();
        for req in pending.iter_mut() {
            req.state = RequestState::Discarded;
        }
    }

    pub fn mark_expired(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adviser() -> ReadaheadAdviser {
        ReadaheadAdviser::new(64 * 1024, 3, 4, 1000, 16 * 1024 * 1024)
    }

    #[test]
    fn finish_drains_in_fifo_order() {
        let record = ReadRecord::new(adviser());
        record.push_pending(1, 0);
        record.push_pending(2, 100);
        record.push_pending(3, 200);

        record.finish(1);
        assert_eq!(record.pending_len(), 2);

        // Finishing out of order still leaves head-drain semantics intact
        // once the head itself finishes.
        record.finish(3);
        assert_eq!(record.pending_len(), 2, "3 isn't head yet, stays queued");
        record.finish(2);
        assert_eq!(record.pending_len(), 0, "draining head cascades to the already-finished 3");
    }

    #[test]
    fn pending_offset_dedup_prevents_second_fetch() {
        let record = ReadRecord::new(adviser());
        record.push_pending(1, 4096);
        assert!(record.has_pending_for_offset(4096));
        record.finish(1);
        assert!(!record.has_pending_for_offset(4096));
    }
}
