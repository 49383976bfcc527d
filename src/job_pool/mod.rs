//! Bounded worker-thread pool executing chunk I/O jobs (spec.md §4.2).

mod disk;
mod job;
mod pool;

pub use disk::Disk;
pub use job::{
    ChunkOpArgs, CloseArgs, GetBlocksArgs, JobArgs, JobCallback, JobKind, JobOutcome, JobState,
    OpenArgs, PrefetchArgs, ReadArgs, ReplicateArgs, WriteArgs,
};
pub use pool::JobPool;
