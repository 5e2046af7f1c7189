//! Shared fixtures for the end-to-end tests: a media store over a real
//! SQLite index in a temp directory, sample images, and a stand-in bucket.

use axum::http::StatusCode;
use axum::Router;
use cm_cloud_http::{HttpCloudConfig, HttpCloudOffload};
use cm_kv_sqlite::SqliteKvStore;
use cm_storage_local::LocalFileStore;
use cm_store::{MediaStore, MetadataIndex, DEFAULT_INDEX_KEY};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub kv: Arc<SqliteKvStore>,
    pub store: Arc<MediaStore>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// A store whose cloud client targets `endpoint`.
    pub async fn with_cloud(endpoint: String) -> Self {
        Self::build(Some(endpoint)).await
    }

    async fn build(endpoint: Option<String>) -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("cards.db").display());
        let kv = Arc::new(SqliteKvStore::connect(&url).await.unwrap());
        let store = Self::open_store(&dir, kv.clone(), endpoint);
        Self {
            dir,
            kv,
            store: Arc::new(store),
        }
    }

    fn open_store(dir: &TempDir, kv: Arc<SqliteKvStore>, endpoint: Option<String>) -> MediaStore {
        let index = MetadataIndex::spawn(kv, DEFAULT_INDEX_KEY);
        let store = MediaStore::new(LocalFileStore::new(dir.path().join("media")), index);
        match endpoint {
            Some(endpoint) => {
                let cloud = HttpCloudOffload::new(HttpCloudConfig {
                    endpoint,
                    bucket: "cards".to_string(),
                    public_base_url: None,
                    api_token: None,
                    timeout: Duration::from_secs(5),
                })
                .unwrap();
                store.with_cloud(Arc::new(cloud), Duration::from_secs(5))
            }
            None => store,
        }
    }

    /// A second store over the same directory and database, as after an
    /// app restart.
    pub fn reopen(&self) -> MediaStore {
        Self::open_store(&self.dir, self.kv.clone(), None)
    }

    pub fn media_dir(&self) -> PathBuf {
        self.dir.path().join("media")
    }

    /// Writes `bytes` to a file outside the managed directory.
    pub fn source_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Originals in the managed directory, thumbnails and staging excluded.
    pub fn stored_originals(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(self.media_dir()) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                let name = p.file_name().unwrap().to_string_lossy().to_string();
                !name.starts_with('.') && !name.contains("_thumb")
            })
            .collect();
        files.sort();
        files
    }
}

/// Encoded PNG whose pixels depend on `seed`.
pub fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([seed, (x % 256) as u8, (y % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Starts a bucket stand-in answering every request with `status`.
pub async fn spawn_bucket(status: StatusCode) -> String {
    let app = Router::new().fallback(move || async move { status });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
