use std::path::Path;

use super::error::{Result, StorageError};
use super::types::ObjectMetadata;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// Extension (lowercase) to MIME type
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("pdf", "application/pdf"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("md", "text/markdown"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
];

/// Guess the Content-Type of a file from its extension
///
/// Falls back to "application/octet-stream" for unknown types.
pub fn detect_content_type(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    extension
        .and_then(|ext| {
            CONTENT_TYPES
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, mime)| *mime)
        })
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// Parse "key1=value1,key2=value2" into object metadata
///
/// A `content-type` entry sets the content type instead of a user
/// metadata field. Malformed pairs are skipped.
pub fn parse_metadata(metadata_str: &str) -> ObjectMetadata {
    metadata_str
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let (key, value) = (key.trim(), value.trim());
            (!key.is_empty() && !value.is_empty()).then_some((key, value))
        })
        .fold(ObjectMetadata::default(), |mut metadata, (key, value)| {
            if key.eq_ignore_ascii_case("content-type") {
                metadata.content_type = Some(value.to_string());
            } else {
                metadata
                    .user_metadata
                    .insert(key.to_string(), value.to_string());
            }
            metadata
        })
}

/// S3 rejects upper-case bucket names, so every name is lowered before use
pub fn normalize_bucket_name(bucket: &str) -> String {
    bucket.to_lowercase()
}

/// Fail with a validation error naming `what` when `value` is empty
pub fn require(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(StorageError::validation(format!("{} is empty", what)));
    }
    Ok(())
}

/// Join non-empty path segments with single slashes
pub fn join_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
