//! Shared wire-level types for the chunkserver core: the status code alphabet
//! returned by every job, chunk identity, and the small number of structs
//! that cross module boundaries (garbage collection stats, chunk part kind).
//!
//! This crate intentionally knows nothing about disks, threads or sockets -
//! it only defines the vocabulary the other crates exchange.

use serde::{Deserialize, Serialize};

pub mod status;
pub use status::StatusCode;

/// Fixed chunk size used throughout the storage engine (64 MiB).
pub const CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Block size client reads are aligned to.
pub const BLOCK_SIZE: u32 = 64 * 1024;

/// Redundancy role of a chunk part on disk.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPartType {
    /// A full, non-erasure-coded copy of the chunk.
    Standard,
    /// One data or parity part of an erasure-coded chunk.
    ErasureCoded { part_index: u8, parts: u8 },
}

/// Identifies one physical chunk file: (chunk_id, version, part kind) is
/// unique per disk.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    pub chunk_id: u64,
    pub version: u32,
    pub chunk_type: ChunkPartType,
}

/// Outcome of a garbage collection sweep over the chunk trash, mirroring the
/// counters operators expect from a GC run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrashGcStatus {
    /// Entries removed because they exceeded the expiration window.
    pub expired_removed: u64,
    /// Entries removed to free space below the configured threshold.
    pub space_reclaimed_removed: u64,
    /// Entries that could not be removed (filesystem error).
    pub removal_failures: u64,
    /// Bytes freed by this sweep (best effort, based on stat() at removal).
    pub bytes_freed: u64,
}
