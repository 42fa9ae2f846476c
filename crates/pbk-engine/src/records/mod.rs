//! Batched record streaming out of, and skip-if-exists writes into, the datastore

pub mod reader;
pub mod writer;

pub use reader::{stream_records, ReadOptions};
pub use writer::{apply_records, MergePolicy, WriteStats};
