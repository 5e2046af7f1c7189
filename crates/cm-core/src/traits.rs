//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the store.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::models::CardRecord;

/// Device persistent key-value store. Holds the serialized metadata index
/// and, for the card store, serialized card records.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
}

/// Remote object storage for offloading locally stored images.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait CloudOffload: Send + Sync {
    /// Uploads the file and returns its durable URL. The remote object name
    /// is derived from `content_hash`, so re-uploading is idempotent.
    async fn upload(&self, local_path: &Path, content_hash: &str) -> Result<String>;
}

/// Card-data persistence contract used by the migration orchestrator.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait CardStore: Send + Sync {
    async fn load_primary(&self) -> Result<Option<CardRecord>>;
    async fn save_primary(&self, card: CardRecord) -> Result<()>;
    async fn load_exchanged(&self) -> Result<Vec<CardRecord>>;
    async fn save_exchanged(&self, cards: Vec<CardRecord>) -> Result<()>;
}
