//! Runtime-tunable knobs for the core, modeled on the reference daemon's
//! `cfg_get(KEY, default)` accessor pattern. Loading an actual config file
//! is out of scope; callers build a [`CoreConfig`] however they like (env,
//! file, hardcoded) and pass it down.

/// Job pool tunables (spec.md §4.2, §6).
#[derive(Debug, Clone)]
pub struct JobPoolConfig {
    /// `NR_OF_HDD_WORKERS_PER_NETWORK_WORKER`
    pub workers_per_network_worker: usize,
    /// `BGJOBSCNT_PER_NETWORK_WORKER`, used to size the jobs PCQ.
    pub jobs_queue_capacity_bytes: usize,
}

impl Default for JobPoolConfig {
    fn default() -> Self {
        Self {
            workers_per_network_worker: 2,
            jobs_queue_capacity_bytes: 1000,
        }
    }
}

/// Trash manager tunables (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct TrashConfig {
    /// Gate on `TrashManager::collect_garbage`, matching the reference's
    /// `ChunkTrashManager::isEnabled` check at the top of `collectGarbage()`.
    pub enabled: bool,
    pub free_space_threshold_gb: u64,
    pub expiration_seconds: u64,
    pub gc_batch_size: usize,
    pub gc_space_recovery_batch_size: usize,
    /// Open question in spec.md §9: disabled by default, matching the
    /// reference implementation's `collect_garbage` leaving the call
    /// commented out.
    pub clean_empty_folders: bool,
}

impl Default for TrashConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            free_space_threshold_gb: 10,
            expiration_seconds: 259_200,
            gc_batch_size: 1000,
            gc_space_recovery_batch_size: 10,
            clean_empty_folders: false,
        }
    }
}

/// Read engine tunables (spec.md §4.4, §6).
#[derive(Debug, Clone)]
pub struct ReadEngineConfig {
    pub init_window_bytes: u64,
    pub random_threshold: u32,
    pub opposite_request_threshold: u32,
    pub max_readahead_requests: u32,
    pub throughput_window_ms: u64,
    pub max_read_cache_size_bytes: u64,
    /// Fraction of `max_read_cache_size_bytes` above which new prefetch is
    /// suppressed (spec.md §4.4: 0.8).
    pub memory_almost_exceeded_ratio: f64,
    pub gc_tick_ms: u64,
    pub threshold_sample_ticks: u32,
    pub low_success_rate: f64,
    pub high_success_rate: f64,
    pub min_cache_expiration_ms: u64,
    pub max_cache_expiration_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_cap_ms: u64,
}

impl Default for ReadEngineConfig {
    fn default() -> Self {
        Self {
            init_window_bytes: 64 * 1024,
            random_threshold: 3,
            opposite_request_threshold: 4,
            max_readahead_requests: 30,
            throughput_window_ms: 1000,
            max_read_cache_size_bytes: 256 * 1024 * 1024,
            memory_almost_exceeded_ratio: 0.8,
            gc_tick_ms: 333,
            threshold_sample_ticks: 180,
            low_success_rate: 0.3,
            high_success_rate: 0.8,
            min_cache_expiration_ms: 1,
            max_cache_expiration_ms: 60_000,
            max_retries: 5,
            retry_backoff_cap_ms: 10_000,
        }
    }
}

/// Chunk reader / plan executor tunables (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct ChunkReaderConfig {
    pub refresh_ticks: u64,
    pub total_read_timeout_ms: u64,
    pub wave_read_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub bandwidth_overuse_allowance: f64,
}

impl Default for ChunkReaderConfig {
    fn default() -> Self {
        Self {
            refresh_ticks: 15,
            total_read_timeout_ms: 2000,
            wave_read_timeout_ms: 500,
            connect_timeout_ms: 2000,
            bandwidth_overuse_allowance: 1.0,
        }
    }
}

/// Top-level handle bundling every component's config, passed down
/// explicitly rather than read from global state (spec.md §9's note on
/// grouping singleton/global values into an explicit engine context).
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub job_pool: JobPoolConfig,
    pub trash: TrashConfig,
    pub read_engine: ReadEngineConfig,
    pub chunk_reader: ChunkReaderConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            job_pool: JobPoolConfig::default(),
            trash: TrashConfig::default(),
            read_engine: ReadEngineConfig::default(),
            chunk_reader: ChunkReaderConfig::default(),
        }
    }
}
