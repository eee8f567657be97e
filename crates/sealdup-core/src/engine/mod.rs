//! Batch orchestration: the process-wide [`EngineContext`], per-session
//! [`Session`]s driving batches through the dedup pipeline, and the
//! [`ChunkReader`] that reconstructs stored chunks.

pub mod batch;
pub mod context;
pub mod reader;
mod records;
pub mod session;

pub use batch::{BatchPhase, BatchReport, ChunkBatch, ChunkRecord, OfflineReport, TailReport};
pub use context::EngineContext;
pub use reader::ChunkReader;
pub use session::Session;
