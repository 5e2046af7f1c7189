//! # cm-storage-local
//! cardmedia/crates/cm-plugins/cm-storage-local/src/lib.rs
//! Local filesystem half of the media store.
//! Features: one flat managed directory, content hashing, staged writes, and thumbnailing.

pub mod formats;
pub mod hasher;
pub mod thumbnail;

use cm_core::{ImagePayload, MediaError, Result, ThumbnailSpec};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// Name prefix of staging files inside the managed directory.
pub const TEMP_PREFIX: &str = ".cm-tmp-";

/// Bytes read from a source file to sniff its format.
const SNIFF_LEN: usize = 32;

/// A file materialized into the managed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mime_type: String,
    pub extension: String,
}

/// Staging file inside the managed directory. It is either promoted to its
/// target or removed; dropping an unsettled one removes it too.
pub(crate) struct TempFile {
    path: PathBuf,
    settled: bool,
}

impl TempFile {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the staged file to `target`. A failed rename removes the stage.
    async fn promote(mut self, target: &Path) -> Result<()> {
        match fs::rename(&self.path, target).await {
            Ok(()) => {
                self.settled = true;
                Ok(())
            }
            Err(e) => {
                warn!(from = %self.path.display(), to = %target.display(), error = %e, "local_store: rename failed");
                self.discard().await;
                Err(MediaError::Write(format!("{}: {}", target.display(), e)))
            }
        }
    }

    /// Marks a stage that was renamed by blocking code.
    pub(crate) fn promoted(mut self) {
        self.settled = true;
    }

    async fn discard(mut self) {
        if fs::remove_file(&self.path).await.is_ok() {
            debug!(path = %self.path.display(), "local_store: removed staging file");
        }
        self.settled = true;
    }
}

impl Drop for TempFile {
    // Only reached for a cancelled write or inside the blocking thumbnail
    // worker; every other path settles the stage asynchronously.
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if std::fs::remove_file(&self.path).is_ok() {
            debug!(path = %self.path.display(), "local_store: removed staging file");
        }
    }
}

pub struct LocalFileStore {
    /// Managed directory for all images (e.g., "./data/media")
    root_path: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Creates the managed directory. Idempotent.
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.root_path).await.map_err(|e| {
            warn!(root = %self.root_path.display(), error = %e, "local_store: create_dir_all failed");
            MediaError::Write(format!("{}: {}", self.root_path.display(), e))
        })
    }

    pub fn original_path(&self, id: &str, extension: &str) -> PathBuf {
        self.root_path.join(format!("{}.{}", id, extension))
    }

    pub fn thumbnail_path(&self, id: &str) -> PathBuf {
        self.root_path.join(format!("{}_thumb.jpg", id))
    }

    fn temp_file(&self) -> TempFile {
        TempFile {
            path: self
                .root_path
                .join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4().simple())),
            settled: false,
        }
    }

    /// Materializes `payload` as `{root}/{target_id}.{ext}`.
    ///
    /// The bytes are staged in a temporary file inside the managed directory
    /// and renamed into place, so the target either appears complete or not
    /// at all. The staging file is gone on every exit path.
    pub async fn write(&self, payload: &ImagePayload, target_id: &str) -> Result<StoredFile> {
        self.ensure_dir().await?;
        let staging = self.temp_file();
        let format = match stage(payload, staging.path()).await {
            Ok(format) => format,
            Err(e) => {
                staging.discard().await;
                return Err(e);
            }
        };

        let target = self.original_path(target_id, &format.extension);
        staging.promote(&target).await?;

        let size_bytes = fs::metadata(&target).await.map(|m| m.len()).unwrap_or(0);
        debug!(id = %target_id, path = %target.display(), size = size_bytes, "local_store: stored original");

        Ok(StoredFile {
            path: target,
            size_bytes,
            mime_type: format.mime_type,
            extension: format.extension,
        })
    }

    /// Renders a JPEG thumbnail of an already stored original.
    pub async fn write_thumbnail(
        &self,
        original: &Path,
        target_id: &str,
        spec: ThumbnailSpec,
    ) -> Result<PathBuf> {
        self.ensure_dir().await?;
        let path =
            thumbnail::render(original, self.temp_file(), self.thumbnail_path(target_id), spec)
                .await?;
        debug!(id = %target_id, path = %path.display(), "local_store: stored thumbnail");
        Ok(path)
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
            .await
            .map_err(|e| MediaError::Read(format!("{}: {}", path.display(), e)))
    }

    /// Whether `path` currently resolves to a regular file.
    pub async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
    }

    /// Removes a file if present. Returns whether anything was removed;
    /// a missing file is not an error.
    pub async fn delete(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "local_store: deleted file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MediaError::Write(format!("delete {}: {}", path.display(), e))),
        }
    }

    /// Removes staging files at least `older_than` old, left behind by a
    /// process that died mid-write.
    pub async fn sweep_temp_files(&self, older_than: Duration) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.root_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(MediaError::Read(format!(
                    "{}: {}",
                    self.root_path.display(),
                    e
                )))
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MediaError::Read(e.to_string()))?
        {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }
            let age = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map(|modified| now.duration_since(modified).unwrap_or_default())
                .unwrap_or_default();
            if age >= older_than && self.delete(&entry.path()).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "local_store: swept stale staging files");
        }
        Ok(removed)
    }
}

async fn read_head(source: &Path) -> Result<Vec<u8>> {
    let mut file = fs::File::open(source)
        .await
        .map_err(|e| MediaError::Read(format!("{}: {}", source.display(), e)))?;
    let mut head = vec![0u8; SNIFF_LEN];
    let n = file
        .read(&mut head)
        .await
        .map_err(|e| MediaError::Read(format!("{}: {}", source.display(), e)))?;
    head.truncate(n);
    Ok(head)
}

/// Fills the staging file and returns the detected format. Both payload
/// kinds are synced to disk before the caller promotes the stage.
async fn stage(payload: &ImagePayload, staging: &Path) -> Result<formats::Format> {
    match payload {
        ImagePayload::File(source) => {
            let head = read_head(source).await?;
            let format = formats::for_path(source, &head);
            fs::copy(source, staging).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MediaError::Read(format!("{}: {}", source.display(), e))
                } else {
                    MediaError::Write(format!("copy {}: {}", source.display(), e))
                }
            })?;
            sync_file(staging).await?;
            Ok(format)
        }
        ImagePayload::Inline { .. } => {
            let bytes = payload.decode_inline()?;
            let format = formats::for_inline(payload.declared_mime(), &bytes);
            write_synced(staging, &bytes).await?;
            Ok(format)
        }
    }
}

async fn sync_file(path: &Path) -> Result<()> {
    let write_err = |e: std::io::Error| MediaError::Write(format!("{}: {}", path.display(), e));
    let file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(write_err)?;
    file.sync_all().await.map_err(write_err)
}

async fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let write_err = |e: std::io::Error| MediaError::Write(format!("{}: {}", path.display(), e));
    let mut file = fs::File::create(path).await.map_err(write_err)?;
    file.write_all(data).await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> LocalFileStore {
        LocalFileStore::new(tmp.path().join("media"))
    }

    async fn staging_files(root: &Path) -> usize {
        let mut count = 0;
        let mut entries = fs::read_dir(root).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn inline_payload_is_promoted_under_target_id() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let payload = ImagePayload::inline("data:image/png;base64,aGVsbG8=");

        let stored = store.write(&payload, "abc_1").await.unwrap();

        assert_eq!(stored.path, store.root().join("abc_1.png"));
        assert_eq!(stored.mime_type, "image/png");
        assert_eq!(stored.size_bytes, 5);
        assert_eq!(fs::read(&stored.path).await.unwrap(), b"hello");
        assert_eq!(staging_files(store.root()).await, 0);
    }

    #[tokio::test]
    async fn file_payload_is_copied_not_moved() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let source = tmp.path().join("IMG_0001.JPG");
        fs::write(&source, b"jpeg bytes").await.unwrap();

        let stored = store.write(&ImagePayload::file(&source), "def_2").await.unwrap();

        assert_eq!(stored.path, store.root().join("def_2.jpg"));
        assert_eq!(stored.mime_type, "image/jpeg");
        assert!(source.exists());
        assert_eq!(fs::read(&stored.path).await.unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn staged_file_copy_is_synced_before_promotion() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("scan.png");
        fs::write(&source, b"png bytes").await.unwrap();
        let staging = tmp.path().join("stage");

        let format = stage(&ImagePayload::file(&source), &staging).await.unwrap();

        assert_eq!(format.extension, "png");
        assert_eq!(fs::read(&staging).await.unwrap(), b"png bytes");
        assert!(matches!(
            sync_file(&tmp.path().join("missing")).await.unwrap_err(),
            MediaError::Write(_)
        ));
    }

    #[tokio::test]
    async fn failed_promotion_is_a_write_error_and_removes_the_stage() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let blocker = store.original_path("blk_1", "png");
        fs::create_dir_all(blocker.join("occupied")).await.unwrap();

        let err = store
            .write(&ImagePayload::inline("data:image/png;base64,aGVsbG8="), "blk_1")
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Write(_)));
        assert_eq!(staging_files(store.root()).await, 0);
    }

    #[tokio::test]
    async fn settled_stage_is_left_alone_on_drop() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.ensure_dir().await.unwrap();
        let staging = store.temp_file();
        let path = staging.path().to_path_buf();
        fs::write(&path, b"kept").await.unwrap();

        staging.promoted();

        assert_eq!(fs::read(&path).await.unwrap(), b"kept");
    }

    #[tokio::test]
    async fn vanished_source_is_a_read_error_and_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let err = store
            .write(&ImagePayload::file(tmp.path().join("gone.jpg")), "x_1")
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Read(_)));
        let mut entries = fs::read_dir(store.root()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undecodable_inline_payload_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let err = store
            .write(&ImagePayload::inline("%%%"), "bad_1")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidPayload(_)));
        assert_eq!(staging_files(store.root()).await, 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let stored = store
            .write(&ImagePayload::inline("aGVsbG8="), "del_1")
            .await
            .unwrap();

        assert!(store.delete(&stored.path).await.unwrap());
        assert!(!store.delete(&stored.path).await.unwrap());
        assert!(!store.exists(&stored.path).await);
    }

    #[tokio::test]
    async fn sweep_removes_only_staging_files() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.ensure_dir().await.unwrap();
        let keep = store
            .write(&ImagePayload::inline("aGVsbG8="), "keep_1")
            .await
            .unwrap();
        fs::write(store.root().join(format!("{}crashed", TEMP_PREFIX)), b"partial")
            .await
            .unwrap();

        assert_eq!(store.sweep_temp_files(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(store.sweep_temp_files(Duration::ZERO).await.unwrap(), 1);
        assert!(store.exists(&keep.path).await);
    }

    #[tokio::test]
    async fn sweep_of_missing_directory_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(store(&tmp).sweep_temp_files(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn thumbnail_is_bounded_and_dimensions_are_probed() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let source = tmp.path().join("wide.png");
        image::RgbImage::from_pixel(400, 200, image::Rgb([200, 40, 40]))
            .save(&source)
            .unwrap();
        let stored = store.write(&ImagePayload::file(&source), "wide_1").await.unwrap();

        assert_eq!(thumbnail::probe_dimensions(&stored.path).await, (400, 200));

        let thumb = store
            .write_thumbnail(&stored.path, "wide_1", ThumbnailSpec::default())
            .await
            .unwrap();
        assert_eq!(thumb, store.thumbnail_path("wide_1"));
        let (w, h) = thumbnail::probe_dimensions(&thumb).await;
        assert_eq!((w, h), (250, 125));
        assert_eq!(staging_files(store.root()).await, 0);
    }

    #[tokio::test]
    async fn thumbnail_of_non_image_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let stored = store
            .write(&ImagePayload::inline("data:image/jpeg;base64,aGVsbG8="), "fake_1")
            .await
            .unwrap();

        assert!(store
            .write_thumbnail(&stored.path, "fake_1", ThumbnailSpec::default())
            .await
            .is_err());
        assert_eq!(thumbnail::probe_dimensions(&stored.path).await, (0, 0));
        assert!(!store.exists(&store.thumbnail_path("fake_1")).await);
    }
}
