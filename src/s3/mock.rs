//! In-memory `ObjectBackend` that records every call, for unit tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use super::backend::ObjectBackend;
use super::error::{Result, StorageError};
use super::multipart::{CompletedPart, PartSpec};
use super::types::{
    Bucket, CopyResult, CorsRule, DeleteObjectsResult, DeletedObject, HttpMethod, LifecycleRule,
    ListRequest, ObjectBody, ObjectListing, ObjectMetadata, ObjectRef, ObjectSummary,
    ObjectVersion, PutResult, StoredObject, VersionListing, VersionSummary, VersioningStatus,
};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    BucketExists { bucket: String },
    CreateBucket { bucket: String },
    BucketLocation { bucket: String },
    ListBuckets,
    DeleteBucket { bucket: String },
    PutBucketCors { bucket: String, rules: Vec<CorsRule> },
    GetBucketCors { bucket: String },
    DeleteBucketCors { bucket: String },
    GetBucketPolicy { bucket: String },
    DeleteBucketPolicy { bucket: String },
    PutBucketLifecycle { bucket: String },
    GetBucketLifecycle { bucket: String },
    BucketVersioning { bucket: String },
    ListObjects { request: ListRequest },
    ListObjectsV2 { request: ListRequest },
    ListObjectVersions { bucket: String },
    PutObject { bucket: String, key: String, metadata: ObjectMetadata },
    GetObject { bucket: String, key: String },
    CopyObject { source: ObjectRef, destination: ObjectRef },
    DeleteObject { bucket: String, key: String },
    DeleteVersion { bucket: String, key: String, version_id: String },
    DeleteObjects { bucket: String, objects: Vec<ObjectVersion>, quiet: bool },
    CreateMultipartUpload { bucket: String, key: String },
    UploadPart { upload_id: String, part: PartSpec },
    CompleteMultipartUpload { upload_id: String, parts: Vec<CompletedPart> },
    AbortMultipartUpload { upload_id: String },
    Presign {
        bucket: String,
        key: String,
        method: HttpMethod,
        start: SystemTime,
        expires_in: Duration,
    },
}

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, BTreeMap<String, (Vec<u8>, ObjectMetadata)>>,
    versioning: HashMap<String, VersioningStatus>,
    versions: HashMap<String, Vec<VersionSummary>>,
    cors: HashMap<String, Vec<CorsRule>>,
    lifecycle: HashMap<String, Vec<LifecycleRule>>,
    policies: HashMap<String, String>,
    uploads: HashMap<String, (String, String, BTreeMap<i32, Vec<u8>>)>,
    next_upload: u32,
    failing_parts: HashMap<i32, u32>,
    fail_everything: bool,
    version_page_size: Option<usize>,
    stalled_version_listing: bool,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<State>,
}

fn not_found(operation: &'static str, what: String) -> StorageError {
    StorageError::Backend {
        operation,
        message: format!("service error: NoSuchKey: {} does not exist", what),
    }
}

fn page(
    request: &ListRequest,
    objects: &BTreeMap<String, (Vec<u8>, ObjectMetadata)>,
) -> ObjectListing {
    let prefix = request.prefix.clone().unwrap_or_default();
    let limit = request
        .max_keys
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_PAGE_SIZE);

    let mut matching = objects
        .iter()
        .filter(|(key, _)| key.starts_with(&prefix))
        .filter(|(key, _)| request.token.as_ref().is_none_or(|t| key.as_str() > t.as_str()));

    let summaries: Vec<ObjectSummary> = matching
        .by_ref()
        .take(limit)
        .map(|(key, (content, _))| ObjectSummary {
            key: key.clone(),
            size: content.len() as u64,
            e_tag: Some(format!("\"{}\"", content.len())),
            last_modified: None,
            storage_class: Some("STANDARD".to_string()),
        })
        .collect();
    let truncated = matching.next().is_some();

    ObjectListing {
        bucket: request.bucket.clone(),
        prefix: request.prefix.clone(),
        next_token: if truncated {
            summaries.last().map(|s| s.key.clone())
        } else {
            None
        },
        objects: summaries,
        truncated,
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .buckets
            .entry(bucket.to_string())
            .or_default();
        self
    }

    pub fn with_object(self, bucket: &str, key: &str, content: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), (content.to_vec(), ObjectMetadata::default()));
        self
    }

    pub fn with_versioning(self, bucket: &str, status: VersioningStatus) -> Self {
        self.state
            .lock()
            .unwrap()
            .versioning
            .insert(bucket.to_string(), status);
        self
    }

    pub fn with_versions(self, bucket: &str, versions: Vec<VersionSummary>) -> Self {
        self.state
            .lock()
            .unwrap()
            .versions
            .insert(bucket.to_string(), versions);
        self
    }

    pub fn with_policy(self, bucket: &str, policy: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .policies
            .insert(bucket.to_string(), policy.to_string());
        self
    }

    /// Return at most `size` entries per version listing page
    pub fn with_version_page_size(self, size: usize) -> Self {
        self.state.lock().unwrap().version_page_size = Some(size);
        self
    }

    /// Report version listings as truncated without any next markers
    pub fn with_stalled_version_listing(self) -> Self {
        self.state.lock().unwrap().stalled_version_listing = true;
        self
    }

    /// Make every upload of `part_number` fail
    pub fn fail_part(self, part_number: i32) -> Self {
        self.flaky_part(part_number, u32::MAX)
    }

    /// Make the first `times` uploads of `part_number` fail
    pub fn flaky_part(self, part_number: i32, times: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_parts
            .insert(part_number, times);
        self
    }

    /// Make every call fail as if the service were unreachable
    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().fail_everything = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|(content, _)| content.clone())
    }

    pub fn object_metadata(&self, bucket: &str, key: &str) -> Option<ObjectMetadata> {
        self.state
            .lock()
            .unwrap()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|(_, metadata)| metadata.clone())
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.state.lock().unwrap().buckets.contains_key(bucket)
    }

    pub fn version_count(&self, bucket: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .versions
            .get(bucket)
            .map_or(0, Vec::len)
    }

    fn record(&self, call: Call) -> Result<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.fail_everything {
            return Err(StorageError::Backend {
                operation: "mock",
                message: "dispatch failure: connection refused".to_string(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl ObjectBackend for MockBackend {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let state = self.record(Call::BucketExists {
            bucket: bucket.to_string(),
        })?;
        Ok(state.buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.record(Call::CreateBucket {
            bucket: bucket.to_string(),
        })?;
        state.buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn bucket_location(&self, bucket: &str) -> Result<Option<String>> {
        let _state = self.record(Call::BucketLocation {
            bucket: bucket.to_string(),
        })?;
        Ok(Some("us-east-1".to_string()))
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let state = self.record(Call::ListBuckets)?;
        Ok(state
            .buckets
            .keys()
            .map(|name| Bucket {
                name: name.clone(),
                creation_date: None,
            })
            .collect())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.record(Call::DeleteBucket {
            bucket: bucket.to_string(),
        })?;
        let not_empty = state.buckets.get(bucket).is_some_and(|o| !o.is_empty())
            || state.versions.get(bucket).is_some_and(|v| !v.is_empty());
        if not_empty {
            return Err(StorageError::Backend {
                operation: "delete_bucket",
                message: "service error: BucketNotEmpty".to_string(),
            });
        }
        state.buckets.remove(bucket);
        Ok(())
    }

    async fn put_bucket_cors(&self, bucket: &str, rules: &[CorsRule]) -> Result<()> {
        let mut state = self.record(Call::PutBucketCors {
            bucket: bucket.to_string(),
            rules: rules.to_vec(),
        })?;
        state.cors.insert(bucket.to_string(), rules.to_vec());
        Ok(())
    }

    async fn get_bucket_cors(&self, bucket: &str) -> Result<Vec<CorsRule>> {
        let state = self.record(Call::GetBucketCors {
            bucket: bucket.to_string(),
        })?;
        Ok(state.cors.get(bucket).cloned().unwrap_or_default())
    }

    async fn delete_bucket_cors(&self, bucket: &str) -> Result<()> {
        let mut state = self.record(Call::DeleteBucketCors {
            bucket: bucket.to_string(),
        })?;
        state.cors.remove(bucket);
        Ok(())
    }

    async fn get_bucket_policy(&self, bucket: &str) -> Result<Option<String>> {
        let state = self.record(Call::GetBucketPolicy {
            bucket: bucket.to_string(),
        })?;
        Ok(state.policies.get(bucket).cloned())
    }

    async fn delete_bucket_policy(&self, bucket: &str) -> Result<()> {
        let mut state = self.record(Call::DeleteBucketPolicy {
            bucket: bucket.to_string(),
        })?;
        state.policies.remove(bucket);
        Ok(())
    }

    async fn put_bucket_lifecycle(&self, bucket: &str, rules: &[LifecycleRule]) -> Result<()> {
        let mut state = self.record(Call::PutBucketLifecycle {
            bucket: bucket.to_string(),
        })?;
        state.lifecycle.insert(bucket.to_string(), rules.to_vec());
        Ok(())
    }

    async fn get_bucket_lifecycle(&self, bucket: &str) -> Result<Vec<LifecycleRule>> {
        let state = self.record(Call::GetBucketLifecycle {
            bucket: bucket.to_string(),
        })?;
        Ok(state.lifecycle.get(bucket).cloned().unwrap_or_default())
    }

    async fn bucket_versioning(&self, bucket: &str) -> Result<VersioningStatus> {
        let state = self.record(Call::BucketVersioning {
            bucket: bucket.to_string(),
        })?;
        Ok(state
            .versioning
            .get(bucket)
            .copied()
            .unwrap_or(VersioningStatus::Off))
    }

    async fn list_objects(&self, request: &ListRequest) -> Result<ObjectListing> {
        let state = self.record(Call::ListObjects {
            request: request.clone(),
        })?;
        let objects = state
            .buckets
            .get(&request.bucket)
            .ok_or_else(|| not_found("list_objects", request.bucket.clone()))?;
        Ok(page(request, objects))
    }

    async fn list_objects_v2(&self, request: &ListRequest) -> Result<ObjectListing> {
        let state = self.record(Call::ListObjectsV2 {
            request: request.clone(),
        })?;
        let objects = state
            .buckets
            .get(&request.bucket)
            .ok_or_else(|| not_found("list_objects_v2", request.bucket.clone()))?;
        Ok(page(request, objects))
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        key_marker: Option<&str>,
        version_id_marker: Option<&str>,
    ) -> Result<VersionListing> {
        let state = self.record(Call::ListObjectVersions {
            bucket: bucket.to_string(),
        })?;

        // Ordered by (key, version id); a page starts after the marker pair
        let mut remaining: Vec<VersionSummary> = state
            .versions
            .get(bucket)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|v| match key_marker {
                Some(key) => {
                    let marker = (key, version_id_marker.unwrap_or_default());
                    (v.key.as_str(), v.version_id.as_deref().unwrap_or_default()) > marker
                }
                None => true,
            })
            .collect();
        remaining.sort_by(|a, b| (&a.key, &a.version_id).cmp(&(&b.key, &b.version_id)));

        let limit = state.version_page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        let truncated = remaining.len() > limit || state.stalled_version_listing;
        remaining.truncate(limit);

        let last = remaining.last().filter(|_| !state.stalled_version_listing);
        Ok(VersionListing {
            next_key_marker: last.filter(|_| truncated).map(|v| v.key.clone()),
            next_version_id_marker: last
                .filter(|_| truncated)
                .and_then(|v| v.version_id.clone()),
            versions: remaining,
            truncated,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        metadata: &ObjectMetadata,
    ) -> Result<PutResult> {
        let mut state = self.record(Call::PutObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            metadata: metadata.clone(),
        })?;
        let content = match body {
            ObjectBody::Bytes(bytes) => bytes,
            ObjectBody::File(path) => std::fs::read(path)?,
        };
        let e_tag = format!("\"{}\"", content.len());
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), (content, metadata.clone()));
        Ok(PutResult {
            e_tag: Some(e_tag),
            version_id: None,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        let state = self.record(Call::GetObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        let (content, metadata) = state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| not_found("get_object", format!("{}/{}", bucket, key)))?;
        Ok(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_length: content.len() as u64,
            content: content.clone(),
            content_type: metadata.content_type.clone(),
            e_tag: Some(format!("\"{}\"", content.len())),
            user_metadata: metadata.user_metadata.clone(),
        })
    }

    async fn copy_object(&self, source: &ObjectRef, destination: &ObjectRef) -> Result<CopyResult> {
        let mut state = self.record(Call::CopyObject {
            source: source.clone(),
            destination: destination.clone(),
        })?;
        let entry = state
            .buckets
            .get(&source.bucket)
            .and_then(|objects| objects.get(&source.key))
            .cloned()
            .ok_or_else(|| not_found("copy_object", source.to_string()))?;
        let e_tag = format!("\"{}\"", entry.0.len());
        state
            .buckets
            .entry(destination.bucket.clone())
            .or_default()
            .insert(destination.key.clone(), entry);
        Ok(CopyResult {
            e_tag: Some(e_tag),
            ..Default::default()
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut state = self.record(Call::DeleteObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        if let Some(objects) = state.buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn delete_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<()> {
        let mut state = self.record(Call::DeleteVersion {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: version_id.to_string(),
        })?;
        if let Some(versions) = state.versions.get_mut(bucket) {
            versions.retain(|v| !(v.key == key && v.version_id.as_deref() == Some(version_id)));
        }
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectVersion],
        quiet: bool,
    ) -> Result<DeleteObjectsResult> {
        let mut state = self.record(Call::DeleteObjects {
            bucket: bucket.to_string(),
            objects: objects.to_vec(),
            quiet,
        })?;
        let stored = state.buckets.entry(bucket.to_string()).or_default();
        let deleted = objects
            .iter()
            .map(|object| {
                stored.remove(&object.key);
                DeletedObject {
                    key: object.key.clone(),
                    version_id: object.version_id.clone(),
                    delete_marker: false,
                }
            })
            .collect();
        Ok(DeleteObjectsResult {
            deleted: if quiet { Vec::new() } else { deleted },
            errors: Vec::new(),
        })
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        let mut state = self.record(Call::CreateMultipartUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            (bucket.to_string(), key.to_string(), BTreeMap::new()),
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part: &PartSpec,
        source: &Path,
    ) -> Result<String> {
        let mut state = self.record(Call::UploadPart {
            upload_id: upload_id.to_string(),
            part: *part,
        })?;

        if let Some(remaining) = state.failing_parts.get_mut(&part.part_number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StorageError::Backend {
                    operation: "upload_part",
                    message: format!("service error: InternalError on part {}", part.part_number),
                });
            }
        }

        let mut file = std::fs::File::open(source)?;
        file.seek(SeekFrom::Start(part.offset))?;
        let mut buffer = vec![0u8; part.size as usize];
        file.read_exact(&mut buffer)?;

        let (_, _, parts) = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| not_found("upload_part", upload_id.to_string()))?;
        parts.insert(part.part_number, buffer);
        Ok(format!("\"etag-{}\"", part.part_number))
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let mut state = self.record(Call::CompleteMultipartUpload {
            upload_id: upload_id.to_string(),
            parts: parts.to_vec(),
        })?;
        let (bucket, key, mut uploaded) = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| not_found("complete_multipart_upload", upload_id.to_string()))?;
        if parts.is_empty() {
            return Err(StorageError::Backend {
                operation: "complete_multipart_upload",
                message: "service error: MalformedXML".to_string(),
            });
        }

        let mut content = Vec::new();
        for part in parts {
            let bytes = uploaded
                .remove(&part.part_number)
                .ok_or_else(|| {
                    not_found("complete_multipart_upload", format!("part {}", part.part_number))
                })?;
            content.extend_from_slice(&bytes);
        }
        state
            .buckets
            .entry(bucket)
            .or_default()
            .insert(key, (content, ObjectMetadata::default()));
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<()> {
        let mut state = self.record(Call::AbortMultipartUpload {
            upload_id: upload_id.to_string(),
        })?;
        state.uploads.remove(upload_id);
        Ok(())
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        method: HttpMethod,
        start: SystemTime,
        expires_in: Duration,
    ) -> Result<String> {
        let _state = self.record(Call::Presign {
            bucket: bucket.to_string(),
            key: key.to_string(),
            method,
            start,
            expires_in,
        })?;
        Ok(format!(
            "https://mock.local/{}{}?X-Amz-Method={}&X-Amz-Expires={}",
            bucket,
            key,
            method,
            expires_in.as_secs()
        ))
    }
}
