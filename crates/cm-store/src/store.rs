//! # Media Store Facade
//!
//! Orchestrates hashing, the local file store, the metadata index, and the
//! optional cloud offload. It is the only component that mutates the
//! managed directory or the index; everyone else goes through it.

use chrono::{DateTime, Utc};
use cm_core::{
    encode_data_uri, CloudOffload, ImagePayload, ImageRecord, MediaError, ResolvedUri, Result,
    SaveOptions, SaveOutcome, StoreStats,
};
use cm_storage_local::hasher::{self, UNIQUE_PREFIX};
use cm_storage_local::{formats, thumbnail, LocalFileStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::index::{InsertOutcome, MetadataIndex};

/// Upper bound on a single cloud upload.
pub const DEFAULT_OFFLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Staging files younger than this may belong to an in-flight save.
const STALE_STAGING_AGE: Duration = Duration::from_secs(600);

/// Length of the hash prefix used in ids and file names.
const ID_HASH_LEN: usize = 16;

/// Length of the random suffix that keeps concurrent saves apart.
const ID_NONCE_LEN: usize = 8;

pub struct MediaStore {
    files: LocalFileStore,
    index: MetadataIndex,
    cloud: Option<Arc<dyn CloudOffload>>,
    offload_timeout: Duration,
}

/// `{hash prefix}_{creation millis}_{nonce}`.
fn make_id(hash: &str, created_at: DateTime<Utc>, nonce: &str) -> String {
    let hash = hash.strip_prefix(UNIQUE_PREFIX).unwrap_or(hash);
    let short: String = hash.chars().take(ID_HASH_LEN).collect();
    format!("{}_{}_{}", short, created_at.timestamp_millis(), nonce)
}

fn new_nonce() -> String {
    let mut nonce = Uuid::new_v4().simple().to_string();
    nonce.truncate(ID_NONCE_LEN);
    nonce
}

impl MediaStore {
    pub fn new(files: LocalFileStore, index: MetadataIndex) -> Self {
        Self {
            files,
            index,
            cloud: None,
            offload_timeout: DEFAULT_OFFLOAD_TIMEOUT,
        }
    }

    pub fn with_cloud(mut self, cloud: Arc<dyn CloudOffload>, offload_timeout: Duration) -> Self {
        self.cloud = Some(cloud);
        self.offload_timeout = offload_timeout;
        self
    }

    pub fn files(&self) -> &LocalFileStore {
        &self.files
    }

    /// Stores an image and returns its record.
    ///
    /// With `dedupe`, content that hashes like an existing live record
    /// returns that record untouched: no file write, no upload. Read,
    /// write, and index failures fail the call with nothing indexed;
    /// offload failures only demote the outcome to `LocalOnly`.
    pub async fn save(&self, payload: &ImagePayload, options: SaveOptions) -> Result<SaveOutcome> {
        // 1. Identity
        let hash = if options.dedupe {
            hasher::digest_payload(payload).await?
        } else {
            hasher::unique_token()
        };

        // 2. Dedup
        if options.dedupe {
            if let Some(existing) = self.index.find_by_hash(&hash).await? {
                debug!(id = %existing.id, hash = %hash, "media_store: dedup hit");
                return Ok(SaveOutcome::Existing(existing));
            }
        }

        // 3. Materialize
        // Two in-flight saves of the same content must never share a path:
        // the loser of the index race deletes everything it wrote.
        let created_at = Utc::now();
        let mut id = make_id(&hash, created_at, &new_nonce());
        while self.index.get(&id).await?.is_some() {
            id = make_id(&hash, created_at, &new_nonce());
        }
        let stored = self.files.write(payload, &id).await?;
        let (width, height) = thumbnail::probe_dimensions(&stored.path).await;

        let thumbnail_path = if options.generate_thumbnail {
            match self
                .files
                .write_thumbnail(&stored.path, &id, options.thumbnail)
                .await
            {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(id = %id, error = %e, "media_store: thumbnail skipped");
                    None
                }
            }
        } else {
            None
        };

        let record = ImageRecord {
            id,
            content_hash: hash,
            original_path: stored.path,
            thumbnail_path,
            cloud_url: None,
            width,
            height,
            file_size_bytes: stored.size_bytes,
            mime_type: stored.mime_type,
            created_at,
            source: options.source,
        };

        // 4. Index
        let inserted = if options.dedupe {
            self.index.insert_unique(record.clone()).await
        } else {
            self.index
                .put(record.clone())
                .await
                .map(|()| InsertOutcome::Inserted)
        };
        match inserted {
            Ok(InsertOutcome::Inserted) => {
                info!(id = %record.id, size = record.file_size_bytes, "media_store: saved");
            }
            Ok(InsertOutcome::Existing(winner)) => {
                debug!(id = %winner.id, "media_store: lost dedup race, keeping winner");
                self.discard_files(&record).await;
                return Ok(SaveOutcome::Existing(winner));
            }
            Err(e) => {
                warn!(id = %record.id, error = %e, "media_store: index write failed");
                self.discard_files(&record).await;
                return Err(e);
            }
        }

        // 5. Offload
        if !options.offload_to_cloud {
            return Ok(SaveOutcome::Stored(record));
        }
        Ok(self.offload_record(record).await)
    }

    /// Uploads a stored record that is not yet offloaded. The caller-level
    /// retry for a save that came back `LocalOnly`.
    pub async fn offload(&self, id: &str) -> Result<SaveOutcome> {
        let record = self
            .index
            .get(id)
            .await?
            .ok_or_else(|| MediaError::NotFound("image".to_string(), id.to_string()))?;

        if record.cloud_url.is_some() {
            return Ok(SaveOutcome::Offloaded(record));
        }
        if !self.files.exists(&record.original_path).await {
            return Err(MediaError::NotFound("image file".to_string(), id.to_string()));
        }
        Ok(self.offload_record(record).await)
    }

    async fn offload_record(&self, record: ImageRecord) -> SaveOutcome {
        let Some(cloud) = &self.cloud else {
            return SaveOutcome::LocalOnly {
                record,
                reason: "no cloud offload configured".to_string(),
            };
        };

        let uploaded = timeout(
            self.offload_timeout,
            cloud.upload(&record.original_path, &record.content_hash),
        )
        .await;
        let url = match uploaded {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                warn!(id = %record.id, error = %e, "media_store: offload failed, keeping local copy");
                return SaveOutcome::LocalOnly {
                    record,
                    reason: e.to_string(),
                };
            }
            Err(_) => {
                warn!(id = %record.id, timeout = ?self.offload_timeout, "media_store: offload timed out");
                return SaveOutcome::LocalOnly {
                    record,
                    reason: format!("upload timed out after {:?}", self.offload_timeout),
                };
            }
        };

        match self.index.set_cloud_url(&record.id, &url).await {
            Ok(Some(updated)) => {
                info!(id = %updated.id, url = %url, "media_store: offloaded");
                SaveOutcome::Offloaded(updated)
            }
            Ok(None) => SaveOutcome::LocalOnly {
                record,
                reason: "record deleted during upload".to_string(),
            },
            Err(e) => {
                warn!(id = %record.id, error = %e, "media_store: could not record cloud url");
                SaveOutcome::LocalOnly {
                    record,
                    reason: e.to_string(),
                }
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<ImageRecord>> {
        self.index.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<ImageRecord>> {
        self.index.list_all().await
    }

    /// Where the image can be read right now: the cloud URL when preferred
    /// and present, otherwise the local file if it exists, otherwise the
    /// cloud URL if there is one. `None` means "image missing".
    pub async fn resolve_uri(&self, id: &str, prefer_cloud: bool) -> Result<Option<ResolvedUri>> {
        let Some(record) = self.index.get(id).await? else {
            return Ok(None);
        };

        if prefer_cloud {
            if let Some(url) = &record.cloud_url {
                return Ok(Some(ResolvedUri::Cloud(url.clone())));
            }
        }
        if self.files.exists(&record.original_path).await {
            return Ok(Some(ResolvedUri::Local(record.original_path)));
        }
        if let Some(url) = record.cloud_url {
            return Ok(Some(ResolvedUri::Cloud(url)));
        }

        debug!(id = %id, "media_store: image missing");
        Ok(None)
    }

    /// The stored bytes as a data URI; `None` for unknown ids or missing files.
    pub async fn resolve_base64(&self, id: &str) -> Result<Option<String>> {
        let Some(record) = self.index.get(id).await? else {
            return Ok(None);
        };

        let bytes = match self.files.read(&record.original_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(id = %id, error = %e, "media_store: image missing");
                return Ok(None);
            }
        };

        let mime = if record.mime_type.is_empty() {
            formats::mime_for_path(&record.original_path)
        } else {
            record.mime_type
        };
        Ok(Some(encode_data_uri(&mime, &bytes)))
    }

    /// Removes the files, then the index entry. Returns whether the id was
    /// indexed; deleting twice is fine.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let Some(record) = self.index.get(id).await? else {
            return Ok(false);
        };

        self.files.delete(&record.original_path).await?;
        if let Some(thumb) = &record.thumbnail_path {
            self.files.delete(thumb).await?;
        }
        let removed = self.index.delete(id).await?.is_some();
        info!(id = %id, "media_store: deleted");
        Ok(removed)
    }

    /// Prunes index entries whose original file no longer exists and sweeps
    /// stale staging files. Full scan; meant for startup, not every call.
    pub async fn reconcile_orphans(&self) -> Result<usize> {
        match self.files.sweep_temp_files(STALE_STAGING_AGE).await {
            Ok(0) => {}
            Ok(swept) => info!(swept, "media_store: removed stale staging files"),
            Err(e) => warn!(error = %e, "media_store: staging sweep failed"),
        }

        let mut pruned = 0;
        for record in self.index.list_all().await? {
            if self.files.exists(&record.original_path).await {
                continue;
            }
            if self.index.delete(&record.id).await?.is_some() {
                if let Some(thumb) = &record.thumbnail_path {
                    if let Err(e) = self.files.delete(thumb).await {
                        warn!(id = %record.id, error = %e, "media_store: orphan thumbnail left behind");
                    }
                }
                info!(id = %record.id, "media_store: pruned orphan");
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    /// Counters from the index alone; files are not checked.
    pub async fn stats(&self) -> Result<StoreStats> {
        let records = self.index.list_all().await?;
        let cloud_images = records.iter().filter(|r| r.is_offloaded()).count();
        Ok(StoreStats {
            total_images: records.len(),
            total_bytes: records.iter().map(|r| r.file_size_bytes).sum(),
            cloud_images,
            local_only_images: records.len() - cloud_images,
        })
    }

    /// Best-effort removal of files written for a record that never made it
    /// into the index. Ids are never reused, so no other record owns them.
    async fn discard_files(&self, record: &ImageRecord) {
        let mut paths = vec![record.original_path.clone()];
        paths.extend(record.thumbnail_path.clone());

        for path in paths {
            if let Err(e) = self.files.delete(&path).await {
                warn!(path = %path.display(), error = %e, "media_store: could not discard file");
            }
        }
    }
}
