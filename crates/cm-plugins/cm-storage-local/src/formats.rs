//! Extension and MIME type derivation for stored files.

use std::path::Path;

/// Used when neither a header, an extension, nor the bytes reveal a format.
pub const FALLBACK_EXTENSION: &str = "jpg";
pub const FALLBACK_MIME: &str = "image/jpeg";

/// File format of a payload about to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub extension: String,
    pub mime_type: String,
}

impl Format {
    fn fallback() -> Self {
        Self {
            extension: FALLBACK_EXTENSION.to_string(),
            mime_type: FALLBACK_MIME.to_string(),
        }
    }
}

/// Format of an inline payload: declared MIME first, then sniffed bytes.
pub fn for_inline(declared_mime: Option<&str>, bytes: &[u8]) -> Format {
    if let Some(mime) = declared_mime {
        if let Some(ext) = extension_for_mime(mime) {
            return Format {
                extension: ext.to_string(),
                mime_type: mime.to_string(),
            };
        }
    }
    sniff(bytes).unwrap_or_else(Format::fallback)
}

/// Format of a file payload: its extension first, then sniffed bytes.
pub fn for_path(path: &Path, head: &[u8]) -> Format {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext {
        Some(ext) if !ext.is_empty() => Format {
            mime_type: mime_guess::from_ext(&ext)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            extension: ext,
        },
        _ => sniff(head).unwrap_or_else(Format::fallback),
    }
}

/// MIME type of an already stored file, from its extension.
pub fn mime_for_path(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "image/bmp" => Some("bmp"),
        _ => None,
    }
}

fn sniff(bytes: &[u8]) -> Option<Format> {
    let format = image::guess_format(bytes).ok()?;
    let extension = format.extensions_str().first()?;
    Some(Format {
        extension: extension.to_string(),
        mime_type: format.to_mime_type().to_string(),
    })
}
