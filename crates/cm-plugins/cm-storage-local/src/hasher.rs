//! Content hashing. The digest depends only on the decoded bytes, never on
//! the file name or the container the bytes arrived in.

use cm_core::{ImagePayload, MediaError, Result};
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

/// Prefix of the pseudo-hashes handed out when dedup is disabled.
pub const UNIQUE_PREFIX: &str = "nodedup-";

/// SHA-256 of `bytes`, hex encoded (64 chars).
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Reads or decodes the payload and digests the resulting bytes.
pub async fn digest_payload(payload: &ImagePayload) -> Result<String> {
    let bytes = match payload {
        ImagePayload::File(path) => fs::read(path)
            .await
            .map_err(|e| MediaError::Read(format!("{}: {}", path.display(), e)))?,
        ImagePayload::Inline { .. } => payload.decode_inline()?,
    };
    Ok(digest_bytes(&bytes))
}

/// A hash-shaped token that never collides with a real digest, so records
/// saved with dedup disabled are never matched by a later lookup.
pub fn unique_token() -> String {
    format!("{}{}", UNIQUE_PREFIX, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_hex() {
        let a = digest_bytes(b"card photo");
        assert_eq!(a, digest_bytes(b"card photo"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, digest_bytes(b"other photo"));
    }

    #[tokio::test]
    async fn file_and_data_uri_hash_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let from_file = digest_payload(&ImagePayload::file(&path)).await.unwrap();
        let from_uri = digest_payload(&ImagePayload::inline("data:image/jpeg;base64,aGVsbG8="))
            .await
            .unwrap();
        assert_eq!(from_file, from_uri);
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let err = digest_payload(&ImagePayload::file("/definitely/not/here.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Read(_)));
    }

    #[test]
    fn unique_tokens_differ() {
        assert_ne!(unique_token(), unique_token());
        assert!(unique_token().starts_with(UNIQUE_PREFIX));
    }
}
