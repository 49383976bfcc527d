//! Per-request orchestrator translating a (chunk, offset, size) read into
//! transfers from one or more chunkservers (spec.md §4.6).
//!
//! Grounded on the teacher's dual sync/async chunk-reader split
//! (`pbs-datastore/src/local_chunk_reader.rs` for the blocking path,
//! `pbs-datastore/src/cached_chunk_reader.rs` for the async,
//! cache-backed one) - this is the async side, since locating a chunk
//! means asking the (out-of-scope) master over the network, which is
//! naturally a future rather than a blocking call.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use sfs_types::{ChunkId, StatusCode};

use crate::config::ChunkReaderConfig;
use sfs_tools::async_lru_cache::{AsyncCacher, AsyncLruCache};

/// A chunkserver address capable of serving a chunk, ranked by the
/// locator (e.g. media-label affinity, load).
pub type ChunkLocation = Vec<String>;

/// Resolves which chunkservers currently hold a chunk. Backed by the
/// (out-of-scope) master protocol in production.
pub trait ChunkLocator: Send + Sync {
    fn locate(&self, chunk: ChunkId) -> Box<dyn Future<Output = Result<Option<ChunkLocation>, Error>> + Send>;
}

/// Fetches chunk bytes from one specific chunkserver.
pub trait ChunkServerFetch: Send + Sync {
    fn fetch(
        &self,
        chunkserver: &str,
        chunk: ChunkId,
        offset: u32,
        size: u32,
    ) -> Box<dyn Future<Output = Result<Vec<u8>, StatusCode>> + Send>;
}

struct LocationCacher<L> {
    locator: Arc<L>,
}

impl<L: ChunkLocator + 'static> AsyncCacher<u64, ChunkLocation> for LocationCacher<L> {
    fn fetch(&self, key: u64) -> Box<dyn Future<Output = Result<Option<ChunkLocation>, Error>> + Send> {
        let locator = self.locator.clone();
        Box::new(async move { Box::into_pin(locator.locate(chunk_id_from_key(key))).await })
    }
}

fn chunk_id_from_key(key: u64) -> ChunkId {
    ChunkId {
        chunk_id: key,
        version: 0,
        chunk_type: sfs_types::ChunkPartType::Standard,
    }
}

/// Execution counters surfaced as runtime tweaks (spec.md §4.6).
#[derive(Default)]
pub struct ChunkReaderCounters {
    pub executions: AtomicU64,
    pub executions_needing_extra_ops: AtomicU64,
    pub executions_finished_by_extra_ops: AtomicU64,
}

pub struct ChunkReader<L, F> {
    config: ChunkReaderConfig,
    location_cache: AsyncLruCache<u64, ChunkLocation>,
    cacher: LocationCacher<L>,
    fetch: Arc<F>,
    counters: ChunkReaderCounters,
}

impl<L: ChunkLocator + 'static, F: ChunkServerFetch + 'static> ChunkReader<L, F> {
    pub fn new(config: ChunkReaderConfig, locator: Arc<L>, fetch: Arc<F>, cache_capacity: usize) -> Self {
        Self {
            config,
            location_cache: AsyncLruCache::new(cache_capacity),
            cacher: LocationCacher { locator },
            fetch,
            counters: ChunkReaderCounters::default(),
        }
    }

    async fn location(&self, chunk: ChunkId, now_tick: u64, force_refresh: bool) -> Result<ChunkLocation, StatusCode> {
        if force_refresh {
            self.location_cache.invalidate(chunk.chunk_id);
        }
        let max_age = self.config.refresh_ticks;
        match self
            .location_cache
            .access(chunk.chunk_id, now_tick, max_age, &self.cacher)
            .await
        {
            Ok(Some(location)) if !location.is_empty() => Ok(location),
            Ok(_) => Err(StatusCode::NoChunkServers),
            Err(_) => Err(StatusCode::CantConnect),
        }
    }

    /// Reads `[offset, offset+size)` of `chunk`, fetching from the first
    /// chunkserver in the current wave to answer; a lagging wave gets a
    /// second, wider wave up to `total_read_timeout_ms` overall.
    pub async fn read(&self, chunk: ChunkId, offset: u32, size: u32, now_tick: u64) -> Result<Vec<u8>, StatusCode> {
        self.counters.executions.fetch_add(1, Ordering::Relaxed);

        let mut force_refresh = false;
        let total_timeout = Duration::from_millis(self.config.total_read_timeout_ms);
        let wave_timeout = Duration::from_millis(self.config.wave_read_timeout_ms);

        let deadline = tokio::time::Instant::now() + total_timeout;
        let mut last_error = StatusCode::Timeout;
        let mut used_extra_wave = false;

        loop {
            let location = self.location(chunk, now_tick, force_refresh).await?;

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(last_error);
            }
            let this_wave_timeout = wave_timeout.min(remaining);

            match self.run_wave(&location, chunk, offset, size, this_wave_timeout).await {
                Ok(data) => {
                    if used_extra_wave {
                        self.counters
                            .executions_finished_by_extra_ops
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(data);
                }
                Err(status) => {
                    last_error = status;
                    force_refresh = true;
                    if !used_extra_wave {
                        self.counters
                            .executions_needing_extra_ops
                            .fetch_add(1, Ordering::Relaxed);
                        used_extra_wave = true;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(last_error);
                    }
                }
            }
        }
    }

    async fn run_wave(
        &self,
        location: &ChunkLocation,
        chunk: ChunkId,
        offset: u32,
        size: u32,
        wave_timeout: Duration,
    ) -> Result<Vec<u8>, StatusCode> {
        let fetches = location.iter().map(|cs| {
            let fetch = self.fetch.clone();
            let cs = cs.clone();
            async move { Box::into_pin(fetch.fetch(&cs, chunk, offset, size)).await }
        });

        let mut futures: Vec<_> = fetches.map(Box::pin).collect();

        let mut last_error = StatusCode::Timeout;
        loop {
            if futures.is_empty() {
                return Err(last_error);
            }
            match tokio::time::timeout(wave_timeout, futures::future::select_all(futures)).await {
                Err(_elapsed) => return Err(StatusCode::Timeout),
                Ok((Ok(data), _index, _remaining)) => return Ok(data),
                Ok((Err(status), _index, remaining)) => {
                    last_error = status;
                    futures = remaining;
                }
            }
        }
    }

    pub fn counters(&self) -> &ChunkReaderCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StaticLocator {
        servers: Vec<String>,
    }

    impl ChunkLocator for StaticLocator {
        fn locate(&self, _chunk: ChunkId) -> Box<dyn Future<Output = Result<Option<ChunkLocation>, Error>> + Send> {
            let servers = self.servers.clone();
            Box::new(async move { Ok(Some(servers)) })
        }
    }

    struct FirstServerWins {
        calls: Mutex<Vec<String>>,
    }

    impl ChunkServerFetch for FirstServerWins {
        fn fetch(
            &self,
            chunkserver: &str,
            _chunk: ChunkId,
            _offset: u32,
            size: u32,
        ) -> Box<dyn Future<Output = Result<Vec<u8>, StatusCode>> + Send> {
            let cs = chunkserver.to_string();
            Box::new(async move { Ok(vec![cs.len() as u8; size as usize]) })
        }
    }

    impl FirstServerWins {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    fn chunk() -> ChunkId {
        ChunkId {
            chunk_id: 42,
            version: 1,
            chunk_type: sfs_types::ChunkPartType::Standard,
        }
    }

    #[tokio::test]
    async fn reads_from_a_located_chunkserver() {
        let locator = Arc::new(StaticLocator {
            servers: vec!["cs1".to_string(), "cs2".to_string()],
        });
        let fetch = Arc::new(FirstServerWins::new());
        let reader = ChunkReader::new(ChunkReaderConfig::default(), locator, fetch, 16);

        let data = reader.read(chunk(), 0, 64, 0).await.unwrap();
        assert_eq!(data.len(), 64);
        assert_eq!(reader.counters().executions.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn no_chunkservers_located_is_reported() {
        let locator = Arc::new(StaticLocator { servers: vec![] });
        let fetch = Arc::new(FirstServerWins::new());
        let reader = ChunkReader::new(ChunkReaderConfig::default(), locator, fetch, 16);

        let result = reader.read(chunk(), 0, 64, 0).await;
        assert_eq!(result, Err(StatusCode::NoChunkServers));
    }
}
