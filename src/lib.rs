//! This crate implements the chunkserver's core storage engine: the parts
//! of a SaunaFS chunkserver that accept, schedule and execute chunk I/O,
//! independent of the wire protocol used to reach it.
//!
//! # Components
//!
//! The [`job_pool`] module runs a fixed pool of worker threads that pull
//! disk operations (open/close/read/write/replicate/...) off a shared
//! queue and report completion through per-job callbacks. Work is handed
//! to it through a [`pcqueue::ProducerConsumerQueue`], a bounded FIFO
//! admitted by byte length rather than item count, matching the network
//! worker's backpressure model.
//!
//! The [`trash`] module implements deferred chunk deletion: a chunk slated
//! for removal is moved into a per-disk `.trash.bin` directory instead of
//! being unlinked immediately, and a [`trash::TrashIndex`] tracks when
//! each trashed file becomes eligible for permanent removal.
//!
//! The [`read_engine`] module implements the chunkserver's readahead
//! cache: an adviser that grows or shrinks a readahead window based on
//! observed access patterns, and a cache that stores in-flight and
//! completed read results under a global memory budget.
//!
//! The [`disk_energy_manager`] module is the policy seam that picks which
//! local disk should receive a newly created chunk.
//!
//! The [`chunk_reader`] module is the client-facing counterpart: given a
//! chunk id, it locates the chunkservers currently holding it and races
//! wave-based fetches against them, independent of local disk I/O.
//!
//! [`config`] bundles the runtime-tunable defaults for all of the above,
//! mirroring the chunkserver's own `cfg_get(key, default)` configuration
//! style.

pub mod chunk_reader;
pub mod config;
pub mod disk_energy_manager;
pub mod job_pool;
pub mod pcqueue;
pub mod read_engine;
pub mod trash;

pub use sfs_types::{ChunkId, ChunkPartType, StatusCode, TrashGcStatus};
