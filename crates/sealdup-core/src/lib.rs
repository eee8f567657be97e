pub mod boundary;
pub mod buffer;
pub mod cache;
pub mod compress;
pub mod config;
pub mod container;
pub mod crypto;
pub mod delta;
pub mod engine;
pub mod error;
pub mod features;
pub mod format;
mod hash;
pub mod index;
pub mod persist;
pub mod policy;
pub mod recipe;
pub mod sketch;
pub mod stats;

pub use engine::{ChunkBatch, ChunkReader, EngineContext, Session};

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;
