//! Generic concurrency and caching primitives shared by the chunkserver
//! core. Nothing in this crate knows about chunks, disks or the master
//! protocol - it is deliberately the bottom of the dependency graph, the
//! same role `pbs-tools` plays for the rest of its workspace.

pub mod async_lru_cache;
pub mod lru_cache;
