//! # cm-cloud-http
//!
//! HTTP implementation of `CloudOffload`. Objects are PUT to
//! `{endpoint}/{bucket}/images/{hash}.{ext}`; the name depends only on the
//! content hash, so uploading the same image twice overwrites one object.

use async_trait::async_trait;
use cm_core::error::{MediaError, Result};
use cm_core::traits::CloudOffload;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Object-name prefix inside the bucket.
pub const OBJECT_PREFIX: &str = "images";

pub struct HttpCloudConfig {
    /// Base URL of the object endpoint (e.g., "https://storage.example.com")
    pub endpoint: String,
    pub bucket: String,
    /// Base of the URLs handed back to callers; defaults to `endpoint`
    pub public_base_url: Option<String>,
    pub api_token: Option<SecretString>,
    pub timeout: Duration,
}

pub struct HttpCloudOffload {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    public_base_url: String,
    api_token: Option<SecretString>,
}

impl HttpCloudOffload {
    pub fn new(config: HttpCloudConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(MediaError::Config("cloud bucket must not be empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MediaError::Config(format!("http client: {e}")))?;

        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let public_base_url = config
            .public_base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| endpoint.clone());

        Ok(Self {
            client,
            endpoint,
            bucket: config.bucket,
            public_base_url,
            api_token: config.api_token,
        })
    }

    /// `images/{hash}.{ext}`, with the extension taken from the local file.
    pub fn object_name(local_path: &Path, content_hash: &str) -> String {
        let ext = local_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_ascii_lowercase();
        format!("{}/{}.{}", OBJECT_PREFIX, content_hash, ext)
    }

    fn upload_url(&self, object: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, object)
    }

    fn public_url(&self, object: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket, object)
    }
}

#[async_trait]
impl CloudOffload for HttpCloudOffload {
    async fn upload(&self, local_path: &Path, content_hash: &str) -> Result<String> {
        let object = Self::object_name(local_path, content_hash);
        let body = fs::read(local_path)
            .await
            .map_err(|e| MediaError::Offload(format!("{}: {}", local_path.display(), e)))?;
        let mime = mime_guess::from_path(local_path).first_or_octet_stream();

        let mut request = self
            .client
            .put(self.upload_url(&object))
            .header(CONTENT_TYPE, mime.essence_str())
            .body(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            warn!(object = %object, error = %e, "cloud_http: transport failure");
            MediaError::Offload(format!("transport: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(object = %object, status = %status, "cloud_http: upload rejected");
            return Err(MediaError::Offload(format!("HTTP {status}")));
        }

        debug!(object = %object, "cloud_http: uploaded");
        Ok(self.public_url(&object))
    }
}
