//! Image payloads as handed over by the acquisition layer: either a file
//! reference or an inline base64 value (optionally wrapped in a data URI).

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use std::path::PathBuf;
use url::Url;

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    /// A readable file on the local file system
    File(PathBuf),
    /// Base64 data; `mime` is set when the value carried a data-URI header
    Inline { mime: Option<String>, data: String },
}

impl ImagePayload {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ImagePayload::File(path.into())
    }

    /// Wraps an inline value, splitting off a `data:<mime>;base64,` header.
    ///
    /// Bare base64 (no header) is kept as-is; a JPEG encoded this way
    /// starts with `/9j/`, which is why inline values are never guessed
    /// to be paths.
    pub fn inline(value: impl Into<String>) -> Self {
        let value = value.into();
        match split_data_uri(&value) {
            Some((mime, data)) => ImagePayload::Inline {
                mime,
                data: data.to_string(),
            },
            None => ImagePayload::Inline {
                mime: None,
                data: value,
            },
        }
    }

    /// Interprets a URI from a picker: `data:` URIs are inline,
    /// `file://` URIs (percent-decoded) and anything else are local paths.
    pub fn from_uri(uri: &str) -> Self {
        if uri.starts_with("data:") {
            return ImagePayload::inline(uri);
        }
        if uri.starts_with("file:") {
            if let Some(path) = Url::parse(uri).ok().and_then(|u| u.to_file_path().ok()) {
                return ImagePayload::File(path);
            }
        }
        match uri.strip_prefix("file://") {
            Some(path) => ImagePayload::File(PathBuf::from(path)),
            None => ImagePayload::File(PathBuf::from(uri)),
        }
    }

    /// MIME type declared by a data-URI header, if any.
    pub fn declared_mime(&self) -> Option<&str> {
        match self {
            ImagePayload::Inline { mime, .. } => mime.as_deref(),
            ImagePayload::File(_) => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, ImagePayload::Inline { .. })
    }

    /// Decodes an inline payload to raw bytes. File payloads are read by the
    /// file store, not here.
    pub fn decode_inline(&self) -> Result<Vec<u8>> {
        let ImagePayload::Inline { data, .. } = self else {
            return Err(MediaError::InvalidPayload(
                "file payloads have no inline data".to_string(),
            ));
        };

        let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .or_else(|_| STANDARD_NO_PAD.decode(compact.as_bytes()))
            .map_err(|e| MediaError::InvalidPayload(format!("base64 decode failed: {e}")))?;

        if bytes.is_empty() {
            return Err(MediaError::InvalidPayload("empty payload".to_string()));
        }
        Ok(bytes)
    }
}

/// Encodes bytes as a `data:<mime>;base64,` URI.
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    let mime = if mime.is_empty() {
        "application/octet-stream"
    } else {
        mime
    };
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

fn split_data_uri(value: &str) -> Option<(Option<String>, &str)> {
    let rest = value.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let header = header.strip_suffix(";base64")?;
    let mime = (!header.is_empty()).then(|| header.to_string());
    Some((mime, data))
}
