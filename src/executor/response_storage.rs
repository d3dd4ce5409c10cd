//! Binary response storage.
//!
//! Known binary media types are stored out of line from the JSON output
//! mapping: small bodies inline as base64, large ones spilled to a temp
//! file, so a multi-megabyte PDF response never gets JSON-serialized whole.

use super::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::io::Write;

/// Media types the executor recognizes as binary rather than routing
/// through the JSON object/array/primitive handlers.
const BINARY_MEDIA_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/msword",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
];

pub const DEFAULT_INLINE_THRESHOLD_BYTES: usize = 512 * 1024;

#[must_use]
pub fn is_binary_media_type(content_type: &str) -> bool {
    let base = content_type.split(';').next().unwrap_or(content_type).trim();
    BINARY_MEDIA_TYPES.iter().any(|known| *known == base)
}

/// Store `bytes` either inline (base64, below the threshold) or spilled to
/// a temp file (at or above it), returning the response-mapping object.
pub fn store(content_type: &str, bytes: &[u8], threshold_bytes: usize) -> Result<serde_json::Value> {
    let size_bytes = bytes.len();
    if size_bytes < threshold_bytes {
        Ok(serde_json::json!({
            "content_type": content_type,
            "encoding": "base64",
            "data": BASE64.encode(bytes),
            "size_bytes": size_bytes,
        }))
    } else {
        let mut file = tempfile::NamedTempFile::new().map_err(|e| Error::Http {
            message: format!("failed to create temp file for binary response: {e}"),
        })?;
        file.write_all(bytes).map_err(|e| Error::Http {
            message: format!("failed to write binary response to temp file: {e}"),
        })?;
        let (_, path) = file.keep().map_err(|e| Error::Http {
            message: format!("failed to persist temp file: {e}"),
        })?;
        Ok(serde_json::json!({
            "content_type": content_type,
            "encoding": "file",
            "file_path": path.display().to_string(),
            "size_bytes": size_bytes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_binary_types() {
        assert!(is_binary_media_type("application/pdf"));
        assert!(is_binary_media_type("image/png; charset=binary"));
        assert!(!is_binary_media_type("application/json"));
    }

    #[test]
    fn small_body_stores_inline() {
        let out = store("application/pdf", b"small", 1024).unwrap();
        assert_eq!(out["encoding"], "base64");
        assert_eq!(out["size_bytes"], 5);
    }

    #[test]
    fn large_body_spills_to_file() {
        let bytes = vec![0u8; 2048];
        let out = store("image/png", &bytes, 1024).unwrap();
        assert_eq!(out["encoding"], "file");
        assert!(out["file_path"].as_str().unwrap().len() > 0);
    }
}
