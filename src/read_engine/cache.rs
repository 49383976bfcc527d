//! Per-ReadRecord read cache: an offset-ordered index, an LRU eviction
//! order, and a reserved list for entries evicted from the LRU while still
//! referenced (spec.md §3, §4.4).
//!
//! The reference design uses three intrusive linked structures sharing
//! embedded pointers. Spec.md §9 explicitly allows an arena-plus-indices
//! rendering as long as the membership invariants hold, which is what
//! this does: entries live in one `HashMap` keyed by a monotonic id, and
//! `by_offset`/`lru`/`reserved` each hold only ids, never entries, so "a
//! handle is exactly one of {looked-up+LRU, reserved}" is enforced by
//! construction rather than by discipline.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};

struct EntrySlot {
    offset: u64,
    requested_size: u64,
    buffer: Vec<u8>,
    done: bool,
    refcount: usize,
}

struct CacheState {
    entries: HashMap<u64, EntrySlot>,
    by_offset: BTreeMap<u64, u64>,
    lru: VecDeque<u64>,
    reserved: HashSet<u64>,
    next_id: u64,
    used_bytes: u64,
}

/// The result of [`ReadCache::query`]: the ids covering the requested
/// range in offset order, and the id of a newly inserted gap-filling
/// entry, if any.
pub struct QueryResult {
    pub covering: Vec<u64>,
    pub newly_inserted: Option<u64>,
}

pub struct ReadCache {
    state: Mutex<CacheState>,
    done_cv: Condvar,
}

impl ReadCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                by_offset: BTreeMap::new(),
                lru: VecDeque::new(),
                reserved: HashSet::new(),
                next_id: 1,
                used_bytes: 0,
            }),
            done_cv: Condvar::new(),
        }
    }

    /// Looks up entries covering `[offset, offset+size)` in ascending
    /// offset order, stopping at the first gap. If `insert_pending` and a
    /// gap remains, allocates a new (not-yet-`done`) entry there.
    pub fn query(&self, offset: u64, size: u64, insert_pending: bool) -> QueryResult {
        let mut state = self.state.lock().unwrap();
        let mut covering = Vec::new();
        let mut covered_up_to = offset;
        let target_end = offset + size;

        let candidates: Vec<(u64, u64)> = state
            .by_offset
            .range(..target_end)
            .map(|(&off, &id)| (off, id))
            .collect();

        for (entry_offset, id) in candidates {
            if entry_offset > covered_up_to {
                break;
            }
            let entry_len = state.entries.get(&id).map(|e| e.buffer_span()).unwrap_or(0);
            if entry_offset + entry_len <= covered_up_to {
                continue;
            }
            covering.push(id);
            covered_up_to = covered_up_to.max(entry_offset + entry_len);
            if covered_up_to >= target_end {
                break;
            }
        }

        let mut newly_inserted = None;
        if insert_pending && covered_up_to < target_end {
            let id = state.next_id;
            state.next_id += 1;
            let requested_size = target_end - covered_up_to;
            state.entries.insert(
                id,
                EntrySlot {
                    offset: covered_up_to,
                    requested_size,
                    buffer: Vec::new(),
                    done: false,
                    refcount: 0,
                },
            );
            state.by_offset.insert(covered_up_to, id);
            state.lru.push_back(id);
            covering.push(id);
            newly_inserted = Some(id);
        }

        QueryResult { covering, newly_inserted }
    }

    pub fn acquire(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.entries.get_mut(&id) {
            slot.refcount += 1;
        }
    }

    /// Releases a reference; if this drops refcount to 0 for an entry
    /// already sitting in the reserved list, frees it immediately.
    pub fn release(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        let should_free = match state.entries.get_mut(&id) {
            Some(slot) => {
                slot.refcount = slot.refcount.saturating_sub(1);
                slot.refcount == 0 && state.reserved.contains(&id)
            }
            None => false,
        };
        if should_free {
            state.reserved.remove(&id);
            if let Some(slot) = state.entries.remove(&id) {
                state.used_bytes -= slot.buffer.capacity() as u64;
            }
        }
    }

    /// Fills an entry's buffer and marks it done, waking any waiters.
    pub fn fill(&self, id: u64, buffer: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.entries.get_mut(&id) {
            let old_cap = slot.buffer.capacity() as u64;
            slot.buffer = buffer;
            slot.done = true;
            let new_cap = slot.buffer.capacity() as u64;
            state.used_bytes = state.used_bytes - old_cap + new_cap;
        }
        drop(state);
        self.done_cv.notify_all();
    }

    pub fn is_done(&self, id: u64) -> bool {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(&id)
            .map(|s| s.done)
            .unwrap_or(true)
    }

    /// Blocks the calling thread until `id` is done (or no longer exists).
    pub fn wait_until_done(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        while !state.entries.get(&id).map(|s| s.done).unwrap_or(true) {
            state = self.done_cv.wait(state).unwrap();
        }
    }

    /// Clones out a done entry's buffer, or `None` if not done / missing.
    pub fn read_buffer(&self, id: u64) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let slot = state.entries.get(&id)?;
        if slot.done {
            Some(slot.buffer.clone())
        } else {
            None
        }
    }

    pub fn offset_of(&self, id: u64) -> Option<u64> {
        self.state.lock().unwrap().entries.get(&id).map(|s| s.offset)
    }

    /// Erases up to `count` expired entries from the LRU head. An entry
    /// still referenced is moved to the reserved list instead of being
    /// freed outright (spec.md §4.4); a subsequent sweep of the reserved
    /// list here drops any whose refcount has since reached zero.
    pub fn collect_garbage(&self, count: usize) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut processed = 0;
        while processed < count {
            let Some(&id) = state.lru.front() else {
                break;
            };
            let Some(slot) = state.entries.get(&id) else {
                state.lru.pop_front();
                continue;
            };
            if !slot.done {
                break;
            }
            let offset = slot.offset;
            let refcount = slot.refcount;
            state.lru.pop_front();
            state.by_offset.remove(&offset);
            if refcount > 0 {
                state.reserved.insert(id);
            } else {
                if let Some(slot) = state.entries.remove(&id) {
                    state.used_bytes -= slot.buffer.capacity() as u64;
                }
            }
            processed += 1;
        }

        let reserved_ids: Vec<u64> = state.reserved.iter().copied().collect();
        for id in reserved_ids {
            let drop_now = state.entries.get(&id).map(|s| s.refcount == 0).unwrap_or(false);
            if drop_now {
                state.reserved.remove(&id);
                if let Some(slot) = state.entries.remove(&id) {
                    state.used_bytes -= slot.buffer.capacity() as u64;
                }
            }
        }

        processed
    }

    pub fn used_bytes(&self) -> u64 {
        self.state.lock().unwrap().used_bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EntrySlot {
    fn buffer_span(&self) -> u64 {
        if self.done {
            self.buffer.len() as u64
        } else {
            self.requested_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_reports_gap_when_nothing_cached() {
        let cache = ReadCache::new();
        let result = cache.query(0, 1024, true);
        assert_eq!(result.covering.len(), 1);
        assert!(result.newly_inserted.is_some());
    }

    #[test]
    fn covering_entries_span_the_requested_range_without_gaps() {
        let cache = ReadCache::new();
        let r1 = cache.query(0, 512, true);
        let id1 = r1.newly_inserted.unwrap();
        cache.fill(id1, vec![0u8; 512]);

        let r2 = cache.query(0, 1024, true);
        assert_eq!(r2.covering.len(), 2);
        let mut covered = 0u64;
        for id in &r2.covering {
            let offset = cache.offset_of(*id).unwrap();
            assert_eq!(offset, covered);
            covered = offset
                + if cache.is_done(*id) {
                    cache.read_buffer(*id).unwrap().len() as u64
                } else {
                    1024 - covered
                };
        }
        assert_eq!(covered, 1024);
    }

    #[test]
    fn memory_accounting_matches_sum_of_buffer_capacities() {
        let cache = ReadCache::new();
        let r1 = cache.query(0, 64, true);
        let id1 = r1.newly_inserted.unwrap();
        cache.fill(id1, vec![0u8; 64]);

        let r2 = cache.query(1000, 128, true);
        let id2 = r2.newly_inserted.unwrap();
        cache.fill(id2, vec![0u8; 128]);

        assert_eq!(cache.used_bytes(), 64 + 128);
    }

    #[test]
    fn referenced_entry_is_reserved_not_freed_on_collection() {
        let cache = ReadCache::new();
        let r = cache.query(0, 64, true);
        let id = r.newly_inserted.unwrap();
        cache.fill(id, vec![0u8; 64]);
        cache.acquire(id);

        cache.collect_garbage(10);
        assert!(cache.read_buffer(id).is_some(), "still referenced entry must survive GC");
        assert_eq!(cache.used_bytes(), 64);

        cache.release(id);
        assert!(cache.read_buffer(id).is_none(), "dropping last reference after eviction frees it");
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn unreferenced_done_entry_is_freed_by_collect_garbage() {
        let cache = ReadCache::new();
        let r = cache.query(0, 64, true);
        let id = r.newly_inserted.unwrap();
        cache.fill(id, vec![0u8; 64]);

        let processed = cache.collect_garbage(10);
        assert_eq!(processed, 1);
        assert_eq!(cache.used_bytes(), 0);
    }
}
