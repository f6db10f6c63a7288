use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub name: String,
    pub creation_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub e_tag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub storage_class: Option<String>,
}

/// One page of a bucket listing
///
/// `next_token` is the marker (V1) or continuation token (V2) to pass back
/// to fetch the following page. It is only meaningful when `truncated` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectListing {
    pub bucket: String,
    pub prefix: Option<String>,
    pub objects: Vec<ObjectSummary>,
    pub truncated: bool,
    pub next_token: Option<String>,
}

/// Parameters for a single listing page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListRequest {
    pub bucket: String,
    pub prefix: Option<String>,
    /// Marker (V1) or continuation token (V2)
    pub token: Option<String>,
    pub max_keys: Option<i32>,
}

impl ListRequest {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionSummary {
    pub key: String,
    pub version_id: Option<String>,
    pub is_latest: bool,
    pub is_delete_marker: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionListing {
    pub versions: Vec<VersionSummary>,
    pub truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_version_id_marker: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VersioningStatus {
    /// Versioning was never configured on the bucket
    Off,
    Enabled,
    Suspended,
}

/// An object key with an optional version, the unit of a multi-object delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: Option<String>,
}

impl ObjectVersion {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: None,
        }
    }

    pub fn with_version(key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: Some(version_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletedObject {
    pub key: String,
    pub version_id: Option<String>,
    pub delete_marker: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteFailure {
    pub key: String,
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteObjectsResult {
    pub deleted: Vec<DeletedObject>,
    pub errors: Vec<DeleteFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CopyResult {
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PutResult {
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
}

/// Content type and user metadata attached to an uploaded object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
}

impl ObjectMetadata {
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Default::default()
        }
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
    pub content_length: u64,
    pub e_tag: Option<String>,
    pub user_metadata: HashMap<String, String>,
}

/// Request body for a single PUT
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectBody {
    Bytes(Vec<u8>),
    File(std::path::PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorsRule {
    pub id: Option<String>,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age_seconds: Option<i32>,
}

impl CorsRule {
    /// Allow any origin to read and write, which browser uploads need
    pub fn permissive() -> Self {
        Self {
            id: Some("allow-all".to_string()),
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "PUT", "POST", "DELETE", "HEAD"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: vec!["*".to_string()],
            expose_headers: vec!["ETag".to_string()],
            max_age_seconds: Some(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleRule {
    pub id: Option<String>,
    pub prefix: String,
    pub enabled: bool,
    pub expiration_days: Option<i32>,
    pub abort_incomplete_multipart_days: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HttpMethod {
    Get,
    Put,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    pub method: HttpMethod,
    pub expires_at: DateTime<Utc>,
}
