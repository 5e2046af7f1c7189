//! # cm-store
//!
//! The media store proper: the metadata index worker and the facade that
//! orchestrates hashing, local files, the index, and cloud offload.

pub mod index;
pub mod memory;
pub mod store;

pub use index::{InsertOutcome, MetadataIndex, DEFAULT_INDEX_KEY};
pub use memory::MemoryKvStore;
pub use store::{MediaStore, DEFAULT_OFFLOAD_TIMEOUT};
