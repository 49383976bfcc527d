//! The local-disk contract the job pool dispatches to. Actual chunk file
//! I/O and on-disk layout are out of scope (spec.md §1, §6); this trait is
//! the seam a real disk-layer implementation plugs into.

use sfs_types::StatusCode;

use super::job::{ChunkOpArgs, CloseArgs, GetBlocksArgs, OpenArgs, PrefetchArgs, ReadArgs, ReplicateArgs, WriteArgs};

pub trait Disk: Send + Sync {
    fn chunk_op(&self, args: &ChunkOpArgs) -> StatusCode;
    fn open(&self, args: &OpenArgs) -> StatusCode;
    fn close(&self, args: &CloseArgs) -> StatusCode;
    fn read(&self, args: &ReadArgs) -> (StatusCode, Vec<u8>);
    fn prefetch(&self, args: &PrefetchArgs) -> StatusCode;
    fn write(&self, args: &WriteArgs) -> StatusCode;
    fn replicate(&self, args: &ReplicateArgs) -> StatusCode;
    fn get_blocks(&self, args: &GetBlocksArgs) -> (StatusCode, u32);
}
