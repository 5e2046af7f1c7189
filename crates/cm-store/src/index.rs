//! # Metadata Index
//!
//! Persisted `id -> ImageRecord` map, stored as one JSON blob under a fixed
//! key of the device key-value store.
//!
//! Every call is served by a single worker task that owns the key-value
//! handle. The worker reads the full map, applies the change, and writes
//! the full map back before taking the next request, so read-modify-write
//! cycles from concurrent callers can never interleave.

use cm_core::{ImageRecord, KeyValueStore, MediaError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Key the index blob is stored under.
pub const DEFAULT_INDEX_KEY: &str = "media.index.v1";

const QUEUE_DEPTH: usize = 64;

type Entries = BTreeMap<String, ImageRecord>;
type Reply<T> = oneshot::Sender<Result<T>>;

/// Result of [`MetadataIndex::insert_unique`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// A live record with the same content hash was already indexed.
    Existing(ImageRecord),
}

enum Command {
    Get { id: String, reply: Reply<Option<ImageRecord>> },
    List { reply: Reply<Vec<ImageRecord>> },
    FindByHash { hash: String, reply: Reply<Option<ImageRecord>> },
    Put { record: ImageRecord, reply: Reply<()> },
    InsertUnique { record: ImageRecord, reply: Reply<InsertOutcome> },
    SetCloudUrl { id: String, url: String, reply: Reply<Option<ImageRecord>> },
    Delete { id: String, reply: Reply<Option<ImageRecord>> },
}

/// Cloneable handle to the index worker.
#[derive(Clone)]
pub struct MetadataIndex {
    tx: mpsc::Sender<Command>,
}

impl MetadataIndex {
    /// Starts the worker. Must be called from within a tokio runtime; the
    /// worker stops once every handle has been dropped.
    pub fn spawn(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let worker = IndexWorker {
            kv,
            key: key.into(),
        };
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| MediaError::Index("index worker stopped".to_string()))?;
        rx.await
            .map_err(|_| MediaError::Index("index worker dropped the request".to_string()))?
    }

    pub async fn get(&self, id: &str) -> Result<Option<ImageRecord>> {
        let id = id.to_string();
        self.call(|reply| Command::Get { id, reply }).await
    }

    pub async fn list_all(&self) -> Result<Vec<ImageRecord>> {
        self.call(|reply| Command::List { reply }).await
    }

    /// Live record with this content hash. Entries whose file is gone are
    /// treated as absent.
    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<ImageRecord>> {
        let hash = hash.to_string();
        self.call(|reply| Command::FindByHash { hash, reply }).await
    }

    /// Inserts or replaces the record under its id.
    pub async fn put(&self, record: ImageRecord) -> Result<()> {
        self.call(|reply| Command::Put { record, reply }).await
    }

    /// Inserts the record unless a live record with the same hash exists,
    /// checked and applied as one step.
    pub async fn insert_unique(&self, record: ImageRecord) -> Result<InsertOutcome> {
        self.call(|reply| Command::InsertUnique { record, reply }).await
    }

    /// Sets the cloud URL of an existing record and returns the updated
    /// record; `None` when the id is unknown. URLs are only ever set here,
    /// never cleared.
    pub async fn set_cloud_url(&self, id: &str, url: &str) -> Result<Option<ImageRecord>> {
        let (id, url) = (id.to_string(), url.to_string());
        self.call(|reply| Command::SetCloudUrl { id, url, reply }).await
    }

    /// Removes the entry, returning it if it existed.
    pub async fn delete(&self, id: &str) -> Result<Option<ImageRecord>> {
        let id = id.to_string();
        self.call(|reply| Command::Delete { id, reply }).await
    }
}

async fn is_live(record: &ImageRecord) -> bool {
    file_exists(&record.original_path).await
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn live_with_hash<'a>(entries: &'a Entries, hash: &str) -> Option<&'a ImageRecord> {
    for record in entries.values().filter(|r| r.content_hash == hash) {
        if is_live(record).await {
            return Some(record);
        }
    }
    None
}

struct IndexWorker {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl IndexWorker {
    async fn run(self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        debug!(key = %self.key, "index: worker stopped");
    }

    async fn load(&self) -> Result<Entries> {
        match self.kv.get(&self.key).await? {
            None => Ok(Entries::new()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                warn!(key = %self.key, error = %e, "index: blob does not parse");
                MediaError::Index(format!("corrupt index blob: {e}"))
            }),
        }
    }

    async fn save(&self, entries: &Entries) -> Result<()> {
        let raw = serde_json::to_string(entries)
            .map_err(|e| MediaError::Index(format!("serialize index: {e}")))?;
        self.kv.set(&self.key, raw).await
    }

    async fn handle(&self, command: Command) {
        // A caller that gave up on its reply is not an error.
        match command {
            Command::Get { id, reply } => {
                let _ = reply.send(self.load().await.map(|mut e| e.remove(&id)));
            }
            Command::List { reply } => {
                let _ = reply.send(self.load().await.map(|e| e.into_values().collect()));
            }
            Command::FindByHash { hash, reply } => {
                let _ = reply.send(self.find_by_hash(&hash).await);
            }
            Command::Put { record, reply } => {
                let _ = reply.send(self.put(record).await);
            }
            Command::InsertUnique { record, reply } => {
                let _ = reply.send(self.insert_unique(record).await);
            }
            Command::SetCloudUrl { id, url, reply } => {
                let _ = reply.send(self.set_cloud_url(&id, url).await);
            }
            Command::Delete { id, reply } => {
                let _ = reply.send(self.delete(&id).await);
            }
        }
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<ImageRecord>> {
        let entries = self.load().await?;
        Ok(live_with_hash(&entries, hash).await.cloned())
    }

    async fn put(&self, record: ImageRecord) -> Result<()> {
        let mut entries = self.load().await?;
        entries.insert(record.id.clone(), record);
        self.save(&entries).await
    }

    async fn insert_unique(&self, record: ImageRecord) -> Result<InsertOutcome> {
        let mut entries = self.load().await?;
        if let Some(existing) = live_with_hash(&entries, &record.content_hash).await {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        if entries.contains_key(&record.id) {
            return Err(MediaError::Index(format!("id {} already indexed", record.id)));
        }
        entries.insert(record.id.clone(), record);
        self.save(&entries).await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn set_cloud_url(&self, id: &str, url: String) -> Result<Option<ImageRecord>> {
        let mut entries = self.load().await?;
        let Some(record) = entries.get_mut(id) else {
            return Ok(None);
        };
        record.cloud_url = Some(url);
        let updated = record.clone();
        self.save(&entries).await?;
        Ok(Some(updated))
    }

    async fn delete(&self, id: &str) -> Result<Option<ImageRecord>> {
        let mut entries = self.load().await?;
        let removed = entries.remove(id);
        if removed.is_some() {
            self.save(&entries).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKvStore;
    use chrono::Utc;
    use cm_core::ImageSource;
    use std::path::PathBuf;

    fn record(id: &str, hash: &str, path: PathBuf) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            content_hash: hash.to_string(),
            original_path: path,
            thumbnail_path: None,
            cloud_url: None,
            width: 0,
            height: 0,
            file_size_bytes: 5,
            mime_type: "image/jpeg".to_string(),
            created_at: Utc::now(),
            source: ImageSource::Library,
        }
    }

    fn index() -> (MetadataIndex, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        (MetadataIndex::spawn(kv.clone(), DEFAULT_INDEX_KEY), kv)
    }

    #[tokio::test]
    async fn put_get_list_delete() {
        let (index, kv) = index();
        index.put(record("a_1", "a", "/nope/a.jpg".into())).await.unwrap();
        index.put(record("b_1", "b", "/nope/b.jpg".into())).await.unwrap();

        assert_eq!(index.get("a_1").await.unwrap().unwrap().content_hash, "a");
        assert_eq!(index.list_all().await.unwrap().len(), 2);
        assert!(kv.get(DEFAULT_INDEX_KEY).await.unwrap().unwrap().contains("b_1"));

        assert!(index.delete("a_1").await.unwrap().is_some());
        assert!(index.delete("a_1").await.unwrap().is_none());
        assert!(index.get("a_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_hash_skips_entries_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("live.jpg");
        tokio::fs::write(&live, b"x").await.unwrap();

        let (index, _) = index();
        index.put(record("stale_1", "h", dir.path().join("gone.jpg"))).await.unwrap();
        assert!(index.find_by_hash("h").await.unwrap().is_none());

        index.put(record("live_1", "h", live)).await.unwrap();
        assert_eq!(index.find_by_hash("h").await.unwrap().unwrap().id, "live_1");
    }

    #[tokio::test]
    async fn insert_unique_returns_the_live_winner() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.jpg");
        tokio::fs::write(&first, b"x").await.unwrap();

        let (index, _) = index();
        let outcome = index.insert_unique(record("h_1", "h", first)).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let outcome = index
            .insert_unique(record("h_2", "h", dir.path().join("second.jpg")))
            .await
            .unwrap();
        assert!(matches!(outcome, InsertOutcome::Existing(r) if r.id == "h_1"));
        assert_eq!(index.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_puts_on_distinct_ids_are_all_kept() {
        let (index, _) = index();
        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let index = index.clone();
                tokio::spawn(async move {
                    index
                        .put(record(&format!("id_{i}"), &format!("h{i}"), "/nope".into()))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(index.list_all().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn cloud_url_is_set_only_on_known_ids() {
        let (index, _) = index();
        index.put(record("a_1", "a", "/nope/a.jpg".into())).await.unwrap();

        let updated = index.set_cloud_url("a_1", "https://cdn/a.jpg").await.unwrap();
        assert_eq!(updated.unwrap().cloud_url.as_deref(), Some("https://cdn/a.jpg"));
        assert!(index.set_cloud_url("ghost", "https://cdn/g.jpg").await.unwrap().is_none());
        assert!(index.get("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_blob_is_an_error_not_an_empty_index() {
        let (index, kv) = index();
        kv.set(DEFAULT_INDEX_KEY, "{not json".to_string()).await.unwrap();

        let err = index.list_all().await.unwrap_err();
        assert!(matches!(err, MediaError::Index(_)));
        let err = index.put(record("a_1", "a", "/nope".into())).await.unwrap_err();
        assert!(matches!(err, MediaError::Index(_)));
        assert_eq!(kv.get(DEFAULT_INDEX_KEY).await.unwrap().as_deref(), Some("{not json"));
    }
}
