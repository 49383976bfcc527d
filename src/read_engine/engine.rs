//! Orchestrates no-cache and readahead read modes, global cache-memory
//! admission, and the adaptive cache-expiration controller (spec.md §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sfs_types::StatusCode;

use crate::config::ReadEngineConfig;

use super::adviser::ReadaheadAdviser;
use super::record::ReadRecord;

/// Supplies chunk bytes on a cache miss. A production chunkserver backs
/// this with the job pool/disk layer or the chunk reader; tests use a
/// simple closure-backed stub.
pub trait ChunkFetcher: Send + Sync {
    fn fetch(&self, offset: u64, size: u64) -> Result<Vec<u8>, StatusCode>;
}

impl<F> ChunkFetcher for F
where
    F: Fn(u64, u64) -> Result<Vec<u8>, StatusCode> + Send + Sync,
{
    fn fetch(&self, offset: u64, size: u64) -> Result<Vec<u8>, StatusCode> {
        self(offset, size)
    }
}

struct MemoryPool {
    used: AtomicU64,
    max: u64,
    almost_exceeded_ratio: f64,
}

impl MemoryPool {
    fn try_reserve(&self, bytes: u64) -> bool {
        loop {
            let used = self.used.load(Ordering::SeqCst);
            if used + bytes > self.max {
                return false;
            }
            if self
                .used
                .compare_exchange(used, used + bytes, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::SeqCst);
    }

    fn almost_exceeded(&self) -> bool {
        let used = self.used.load(Ordering::SeqCst) as f64;
        used >= self.max as f64 * self.almost_exceeded_ratio
    }
}

struct AdaptiveExpiration {
    current_ms: Mutex<u64>,
    configured_ms: u64,
    min_ms: u64,
    requested: AtomicU64,
    successful: AtomicU64,
    threshold_ticks: u32,
    low_rate: f64,
    high_rate: f64,
    ticks_seen: AtomicU64,
}

impl AdaptiveExpiration {
    fn record(&self, success: bool) {
        self.requested.fetch_add(1, Ordering::SeqCst);
        if success {
            self.successful.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Called once per engine tick; samples the success rate every
    /// `threshold_ticks` ticks and adjusts the effective expiration.
    fn tick(&self) {
        let ticks = self.ticks_seen.fetch_add(1, Ordering::SeqCst) + 1;
        if ticks % self.threshold_ticks as u64 != 0 {
            return;
        }

        let requested = self.requested.swap(0, Ordering::SeqCst);
        let successful = self.successful.swap(0, Ordering::SeqCst);
        if requested == 0 {
            return;
        }
        let rate = successful as f64 / requested as f64;

        let mut current = self.current_ms.lock().unwrap();
        if rate < self.low_rate {
            *current = (*current / 2).max(self.min_ms);
        } else if rate > self.high_rate {
            *current = (*current * 2).min(self.configured_ms);
        }
    }

    fn current(&self) -> u64 {
        *self.current_ms.lock().unwrap()
    }
}

/// Exponential backoff capped at `cap_ms`: `2^try` ms per spec.md §4.4/§8.
pub fn backoff_delay_ms(try_index: u32, cap_ms: u64) -> u64 {
    2u64.saturating_pow(try_index).min(cap_ms)
}

pub struct ReadEngine {
    config: ReadEngineConfig,
    records: Mutex<HashMap<u64, Arc<ReadRecord>>>,
    memory: MemoryPool,
    expiration: AdaptiveExpiration,
}

impl ReadEngine {
    pub fn new(config: ReadEngineConfig) -> Self {
        let expiration = AdaptiveExpiration {
            current_ms: Mutex::new(config.max_cache_expiration_ms),
            configured_ms: config.max_cache_expiration_ms,
            min_ms: config.min_cache_expiration_ms,
            requested: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            threshold_ticks: config.threshold_sample_ticks,
            low_rate: config.low_success_rate,
            high_rate: config.high_success_rate,
            ticks_seen: AtomicU64::new(0),
        };
        let memory = MemoryPool {
            used: AtomicU64::new(0),
            max: config.max_read_cache_size_bytes,
            almost_exceeded_ratio: config.memory_almost_exceeded_ratio,
        };
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            memory,
            expiration,
        }
    }

    fn record_for(&self, inode: u64) -> Arc<ReadRecord> {
        let mut records = self.records.lock().unwrap();
        records
            .entry(inode)
            .or_insert_with(|| {
                Arc::new(ReadRecord::new(ReadaheadAdviser::new(
                    self.config.init_window_bytes,
                    self.config.random_threshold,
                    self.config.opposite_request_threshold,
                    self.config.throughput_window_ms,
                    self.config.max_read_cache_size_bytes,
                )))
            })
            .clone()
    }

    pub fn release(&self, inode: u64) {
        let record = self.records.lock().unwrap().get(&inode).cloned();
        if let Some(record) = record {
            record.mark_expired();
            record.discard_all_pending();
        }
    }

    /// Runs one maintenance tick: cache GC plus the adaptive expiration
    /// sampler. A background thread calls this every `gc_tick_ms`.
    pub fn tick(&self, now_ms: u64) {
        let records: Vec<Arc<ReadRecord>> = self.records.lock().unwrap().values().cloned().collect();
        for record in &records {
            record.cache.collect_garbage(self.config.gc_batch_size_hint());
        }
        self.expiration.tick();
        let _ = now_ms;
    }

    /// Services `read(offset, size)` for `inode`. No-cache mode runs a
    /// single synchronous fetch; readahead mode consults and grows the
    /// per-record cache (spec.md §4.4).
    pub fn read(
        &self,
        inode: u64,
        offset: u64,
        size: u64,
        now_ms: u64,
        fetcher: &dyn ChunkFetcher,
    ) -> Result<Vec<u8>, StatusCode> {
        let record = self.record_for(inode);

        let window = {
            let mut adviser = record.adviser.lock().unwrap();
            adviser.feed(offset, size, now_ms);
            adviser.window()
        };
        let use_readahead = record.adviser.lock().unwrap().should_use_readahead()
            && self.expiration.current() > 0;

        if !use_readahead {
            return self.fetch_with_retry(offset, size, fetcher);
        }

        let target_end = offset + size;
        let planned_end = offset + window.max(size);
        let query = record.cache.query(offset, (planned_end - offset).max(size), true);

        let mut buffer = Vec::with_capacity(size as usize);
        for id in &query.covering {
            let entry_offset = record.cache.offset_of(*id).unwrap_or(offset);
            if entry_offset >= target_end {
                break;
            }

            if !record.cache.is_done(*id) {
                if record.has_pending_for_offset(entry_offset) {
                    record.cache.wait_until_done(*id);
                } else {
                    record.push_pending(*id, entry_offset);
                    let fetch_len = planned_end.saturating_sub(entry_offset).max(size);
                    match self.fetch_with_retry(entry_offset, fetch_len, fetcher) {
                        Ok(data) => record.cache.fill(*id, data),
                        Err(status) => {
                            record.finish(*id);
                            return Err(status);
                        }
                    }
                    record.finish(*id);
                }
            }

            if let Some(data) = record.cache.read_buffer(*id) {
                let overlap_start = entry_offset.max(offset);
                let overlap_end = (entry_offset + data.len() as u64).min(target_end);
                if overlap_end > overlap_start {
                    let rel_start = (overlap_start - entry_offset) as usize;
                    let rel_end = (overlap_end - entry_offset) as usize;
                    buffer.extend_from_slice(&data[rel_start..rel_end.min(data.len())]);
                }
            }
        }

        Ok(buffer)
    }

    fn fetch_with_retry(&self, offset: u64, size: u64, fetcher: &dyn ChunkFetcher) -> Result<Vec<u8>, StatusCode> {
        if !self.memory.try_reserve(size) {
            self.expiration.record(false);
            log::warn!("read cache memory pool exhausted, rejecting {size}-byte reservation");
            return Err(StatusCode::OutOfMemory);
        }

        for attempt in 0..=self.config.max_retries {
            match fetcher.fetch(offset, size) {
                Ok(data) => {
                    self.memory.release(size);
                    self.expiration.record(true);
                    return Ok(data);
                }
                Err(StatusCode::ENoEnt) | Err(StatusCode::EInval) => {
                    self.memory.release(size);
                    self.expiration.record(false);
                    return Err(StatusCode::EBadF);
                }
                Err(status) if attempt < self.config.max_retries => {
                    self.expiration.record(false);
                    log::debug!("read at offset {offset} failed with {status:?}, retrying (attempt {attempt})");
                    std::thread::sleep(Duration::from_millis(backoff_delay_ms(
                        attempt,
                        self.config.retry_backoff_cap_ms,
                    )));
                    continue;
                }
                Err(status) => {
                    self.memory.release(size);
                    self.expiration.record(false);
                    return Err(status);
                }
            }
        }
        unreachable!("loop always returns within max_retries+1 iterations")
    }

    pub fn memory_almost_exceeded(&self) -> bool {
        self.memory.almost_exceeded()
    }

    pub fn used_cache_memory(&self) -> u64 {
        self.memory.used.load(Ordering::SeqCst)
    }

    pub fn effective_cache_expiration_ms(&self) -> u64 {
        self.expiration.current()
    }
}

impl ReadEngineConfig {
    fn gc_batch_size_hint(&self) -> usize {
        64
    }
}
