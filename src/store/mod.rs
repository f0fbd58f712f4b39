//! Persistence layer: the scan checkpoint.

pub mod checkpoint;

pub use checkpoint::{CheckpointStore, FileCheckpoint};
