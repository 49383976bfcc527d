//! Typed job payloads and outcomes.
//!
//! The reference job pool stores a `void*` allocated by `malloc` per job
//! and lets the op kind decide how to interpret it (spec.md §9's design
//! note). Here each op kind carries its own struct inside a tagged
//! [`JobArgs`] enum instead, so the compiler - not a cast - enforces that
//! a worker interprets a job's payload correctly.

use sfs_types::ChunkId;
use sfs_types::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Exit,
    Invalid,
    ChunkOp,
    Open,
    Close,
    Read,
    Prefetch,
    Write,
    Replicate,
    GetBlocks,
}

#[derive(Debug, Clone)]
pub struct ChunkOpArgs {
    pub chunk: ChunkId,
    pub new_version: u32,
    pub truncate_to: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct OpenArgs {
    pub chunk: ChunkId,
}

#[derive(Debug, Clone)]
pub struct CloseArgs {
    pub chunk: ChunkId,
}

#[derive(Debug, Clone)]
pub struct ReadArgs {
    pub chunk: ChunkId,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct PrefetchArgs {
    pub chunk: ChunkId,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct WriteArgs {
    pub chunk: ChunkId,
    pub offset: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ReplicateArgs {
    pub chunk: ChunkId,
    pub source_chunkserver: String,
}

#[derive(Debug, Clone)]
pub struct GetBlocksArgs {
    pub chunk: ChunkId,
}

/// A job's typed payload, tagged by [`JobKind`].
#[derive(Debug, Clone)]
pub enum JobArgs {
    ChunkOp(ChunkOpArgs),
    Open(OpenArgs),
    Close(CloseArgs),
    Read(ReadArgs),
    Prefetch(PrefetchArgs),
    Write(WriteArgs),
    Replicate(ReplicateArgs),
    GetBlocks(GetBlocksArgs),
}

impl JobArgs {
    pub fn kind(&self) -> JobKind {
        match self {
            JobArgs::ChunkOp(_) => JobKind::ChunkOp,
            JobArgs::Open(_) => JobKind::Open,
            JobArgs::Close(_) => JobKind::Close,
            JobArgs::Read(_) => JobKind::Read,
            JobArgs::Prefetch(_) => JobKind::Prefetch,
            JobArgs::Write(_) => JobKind::Write,
            JobArgs::Replicate(_) => JobKind::Replicate,
            JobArgs::GetBlocks(_) => JobKind::GetBlocks,
        }
    }
}

/// The result handed to a job's callback. Every op completes with a
/// [`StatusCode`]; `Read` and `GetBlocks` additionally carry a payload.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Status(StatusCode),
    Read { status: StatusCode, data: Vec<u8> },
    Blocks { status: StatusCode, block_count: u32 },
}

impl JobOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            JobOutcome::Status(s) => *s,
            JobOutcome::Read { status, .. } => *status,
            JobOutcome::Blocks { status, .. } => *status,
        }
    }
}

/// Per-job bookkeeping state (spec.md §3's `Job` entity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Enabled,
    Disabled,
    InProgress,
}

pub type JobCallback = Box<dyn FnOnce(u32, JobOutcome) + Send>;

pub(crate) struct JobEntry {
    pub state: JobState,
    pub callback: Option<JobCallback>,
}
