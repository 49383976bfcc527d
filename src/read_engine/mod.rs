//! Readahead-driven read cache engine (spec.md §4.4).

mod adviser;
mod cache;
mod engine;
mod record;

pub use adviser::ReadaheadAdviser;
pub use cache::ReadCache;
pub use engine::{backoff_delay_ms, ChunkFetcher, ReadEngine};
pub use record::ReadRecord;
