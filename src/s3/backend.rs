//! The seam between the facade and the storage service.
//!
//! [`ObjectBackend`] mirrors the SDK calls the facade makes, using the
//! crate's own value types so the facade never touches SDK builders
//! directly. [`S3Client`](super::S3Client) is the production implementation.

use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, SystemTime};

use super::error::Result;
use super::multipart::{CompletedPart, PartSpec};
use super::types::{
    Bucket, CopyResult, CorsRule, DeleteObjectsResult, HttpMethod, LifecycleRule, ListRequest,
    ObjectBody, ObjectListing, ObjectMetadata, ObjectRef, ObjectVersion, PutResult, StoredObject,
    VersionListing, VersioningStatus,
};

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    async fn bucket_location(&self, bucket: &str) -> Result<Option<String>>;

    async fn list_buckets(&self) -> Result<Vec<Bucket>>;

    /// Delete an empty bucket
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    async fn put_bucket_cors(&self, bucket: &str, rules: &[CorsRule]) -> Result<()>;

    async fn get_bucket_cors(&self, bucket: &str) -> Result<Vec<CorsRule>>;

    async fn delete_bucket_cors(&self, bucket: &str) -> Result<()>;

    /// The bucket policy document, if one is set
    async fn get_bucket_policy(&self, bucket: &str) -> Result<Option<String>>;

    async fn delete_bucket_policy(&self, bucket: &str) -> Result<()>;

    async fn put_bucket_lifecycle(&self, bucket: &str, rules: &[LifecycleRule]) -> Result<()>;

    async fn get_bucket_lifecycle(&self, bucket: &str) -> Result<Vec<LifecycleRule>>;

    async fn bucket_versioning(&self, bucket: &str) -> Result<VersioningStatus>;

    /// One marker-based (V1) listing page
    async fn list_objects(&self, request: &ListRequest) -> Result<ObjectListing>;

    /// One continuation-token (V2) listing page
    async fn list_objects_v2(&self, request: &ListRequest) -> Result<ObjectListing>;

    async fn list_object_versions(
        &self,
        bucket: &str,
        key_marker: Option<&str>,
        version_id_marker: Option<&str>,
    ) -> Result<VersionListing>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        metadata: &ObjectMetadata,
    ) -> Result<PutResult>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject>;

    async fn copy_object(&self, source: &ObjectRef, destination: &ObjectRef) -> Result<CopyResult>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn delete_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<()>;

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectVersion],
        quiet: bool,
    ) -> Result<DeleteObjectsResult>;

    /// Open a multipart session and return its upload id
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String>;

    /// Upload the byte range described by `part` from `source`, returning its ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part: &PartSpec,
        source: &Path,
    ) -> Result<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;

    /// Sign a request for `method` on the object, valid from `start` for `expires_in`
    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        method: HttpMethod,
        start: SystemTime,
        expires_in: Duration,
    ) -> Result<String>;
}
