//! # Domain Models
//!
//! These structs represent the core entities of the card media store.
//! Image records are keyed by an id derived from the content hash plus the
//! creation timestamp, so ids stay stable while file locations may change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where an image came from. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Camera,
    Library,
    #[default]
    External,
}

/// The persisted metadata unit of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    /// Digest of the raw image bytes, or a pseudo-hash when dedup was off
    pub content_hash: String,
    /// Full-resolution asset inside the managed directory
    pub original_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<PathBuf>,
    /// Present once the asset has been offloaded; never cleared afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_url: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub file_size_bytes: u64,
    #[serde(default)]
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub source: ImageSource,
}

impl ImageRecord {
    /// Path consumers should display: the thumbnail when one exists.
    pub fn display_path(&self) -> &Path {
        self.thumbnail_path
            .as_deref()
            .unwrap_or(self.original_path.as_path())
    }

    pub fn is_offloaded(&self) -> bool {
        self.cloud_url.is_some()
    }
}

/// Target size and JPEG quality of a generated thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSpec {
    pub max_dimension: u32,
    pub quality: u8,
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        Self {
            max_dimension: 250,
            quality: 80,
        }
    }
}

/// Knobs for a single save call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub offload_to_cloud: bool,
    pub generate_thumbnail: bool,
    pub dedupe: bool,
    pub thumbnail: ThumbnailSpec,
    pub source: ImageSource,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            offload_to_cloud: false,
            generate_thumbnail: false,
            dedupe: true,
            thumbnail: ThumbnailSpec::default(),
            source: ImageSource::External,
        }
    }
}

impl SaveOptions {
    pub fn with_offload(mut self, offload: bool) -> Self {
        self.offload_to_cloud = offload;
        self
    }

    pub fn with_thumbnail(mut self, spec: ThumbnailSpec) -> Self {
        self.generate_thumbnail = true;
        self.thumbnail = spec;
        self
    }

    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    pub fn with_source(mut self, source: ImageSource) -> Self {
        self.source = source;
        self
    }
}

/// Result of a successful save. Failures are the `Err` side of the call.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// A live record with identical content already existed; nothing written.
    Existing(ImageRecord),
    /// Stored locally; offload was not requested.
    Stored(ImageRecord),
    /// Stored locally and offloaded.
    Offloaded(ImageRecord),
    /// Stored locally; offload was requested but did not happen.
    LocalOnly { record: ImageRecord, reason: String },
}

impl SaveOutcome {
    pub fn record(&self) -> &ImageRecord {
        match self {
            SaveOutcome::Existing(record)
            | SaveOutcome::Stored(record)
            | SaveOutcome::Offloaded(record)
            | SaveOutcome::LocalOnly { record, .. } => record,
        }
    }

    pub fn into_record(self) -> ImageRecord {
        match self {
            SaveOutcome::Existing(record)
            | SaveOutcome::Stored(record)
            | SaveOutcome::Offloaded(record)
            | SaveOutcome::LocalOnly { record, .. } => record,
        }
    }

    /// Succeeded, but with less than what was asked for.
    pub fn is_degraded(&self) -> bool {
        matches!(self, SaveOutcome::LocalOnly { .. })
    }
}

/// Where a stored image can currently be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedUri {
    Local(PathBuf),
    Cloud(String),
}

impl fmt::Display for ResolvedUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedUri::Local(path) => write!(f, "{}", path.display()),
            ResolvedUri::Cloud(url) => f.write_str(url),
        }
    }
}

/// Aggregate counters derived from the index alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_images: usize,
    pub total_bytes: u64,
    pub cloud_images: usize,
    pub local_only_images: usize,
}

/// A user's business card as persisted by the card-data layer.
///
/// Only the image-bearing fields are modelled; everything else round-trips
/// through `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Legacy inline avatar payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_image_id: Option<String>,

    /// Legacy inline contact QR code payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_image_id: Option<String>,

    /// Legacy inline gallery payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gallery_base64: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gallery_image_ids: Option<Vec<String>>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
