use indicatif::ProgressBar;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::backend::ObjectBackend;
use super::client::S3Client;
use super::error::{Result, StorageError};
use super::helpers::{normalize_bucket_name, require};
use super::multipart::{MultipartOptions, upload_multipart};
use super::naming::{Clock, KeyNamer, SystemClock, TokenSource, UuidTokens};
use super::presign::{MAX_PRESIGN_EXPIRY, generate_presigned_url};
use super::transfer::{TransferConfig, upload as managed_transfer};
use super::types::{
    Bucket, CopyResult, CorsRule, DeleteObjectsResult, HttpMethod, LifecycleRule, ListRequest,
    ObjectListing, ObjectMetadata, ObjectRef, ObjectSummary, ObjectVersion, PresignedUrl,
    StoredObject, VersioningStatus,
};
use super::upload;
use crate::config::StorageConfig;

/// Convenience facade over an S3-compatible object store
///
/// Bucket names are lowercased and required arguments checked before any
/// backend call. Backend failures are logged and returned as
/// [`StorageError::Backend`].
#[derive(Clone)]
pub struct S3Template {
    backend: Arc<dyn ObjectBackend>,
    config: StorageConfig,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenSource>,
    namer: KeyNamer,
    multipart: MultipartOptions,
    transfer: TransferConfig,
}

impl S3Template {
    /// Connect to the configured service and prepare the default bucket
    pub async fn connect(config: StorageConfig) -> Result<Self> {
        let client = S3Client::new(&config).await?;
        let template = Self::with_backend(config, Arc::new(client));
        template.initialize().await?;
        Ok(template)
    }

    /// Build a facade over any backend without touching it
    pub fn with_backend(config: StorageConfig, backend: Arc<dyn ObjectBackend>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tokens: Arc<dyn TokenSource> = Arc::new(UuidTokens);
        Self {
            backend,
            config,
            namer: KeyNamer::new(clock.clone(), tokens.clone()),
            clock,
            tokens,
            multipart: MultipartOptions::default(),
            transfer: TransferConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.namer = KeyNamer::new(clock.clone(), self.tokens.clone());
        self.clock = clock;
        self
    }

    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.namer = KeyNamer::new(self.clock.clone(), tokens.clone());
        self.tokens = tokens;
        self
    }

    pub fn with_multipart_options(mut self, options: MultipartOptions) -> Self {
        self.multipart = options;
        self
    }

    pub fn with_transfer_config(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Ensure the default bucket exists and apply CORS when configured
    pub async fn initialize(&self) -> Result<()> {
        let bucket = self.default_bucket_name().to_string();
        self.create_bucket(&bucket).await?;

        if self.config.auto_config_cors {
            self.set_bucket_cors(&bucket, &[CorsRule::permissive()])
                .await?;
            info!("Applied permissive CORS rule to bucket {}", bucket);
        }
        Ok(())
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn ObjectBackend {
        self.backend.as_ref()
    }

    pub fn default_bucket_name(&self) -> &str {
        &self.config.bucket
    }

    fn bucket(&self, bucket: &str) -> Result<String> {
        require(bucket, "bucket name")?;
        Ok(normalize_bucket_name(bucket))
    }

    // Bucket operations

    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let bucket = self.bucket(bucket)?;
        self.backend
            .bucket_exists(&bucket)
            .await
            .inspect_err(|e| error!("Failed to check bucket {}: {}", bucket, e))
    }

    /// Create a bucket unless it exists; returns the bucket either way
    pub async fn create_bucket(&self, bucket: &str) -> Result<Option<Bucket>> {
        let bucket = self.bucket(bucket)?;

        if self.bucket_exists(&bucket).await? {
            info!("Bucket {} already exists", bucket);
            return self.get_bucket_by_name(&bucket).await;
        }

        self.backend
            .create_bucket(&bucket)
            .await
            .inspect_err(|e| error!("Failed to create bucket {}: {}", bucket, e))?;

        let location = self
            .backend
            .bucket_location(&bucket)
            .await
            .inspect_err(|e| error!("Failed to read location of bucket {}: {}", bucket, e))?;
        info!(
            "Created bucket {} in {}",
            bucket,
            location.as_deref().unwrap_or("us-east-1")
        );

        self.get_bucket_by_name(&bucket).await
    }

    pub async fn get_bucket_by_name(&self, bucket: &str) -> Result<Option<Bucket>> {
        let bucket = self.bucket(bucket)?;
        Ok(self
            .list_buckets()
            .await?
            .into_iter()
            .find(|b| b.name == bucket))
    }

    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        self.backend
            .list_buckets()
            .await
            .inspect_err(|e| error!("Failed to list buckets: {}", e))
    }

    /// Delete a bucket after purging every object, version and delete marker
    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let bucket = self.bucket(bucket)?;

        let mut request = ListRequest::new(&bucket);
        let mut removed_objects = 0usize;
        loop {
            let listing = self
                .backend
                .list_objects_v2(&request)
                .await
                .inspect_err(|e| error!("Failed to list objects in {}: {}", bucket, e))?;

            for object in &listing.objects {
                self.backend
                    .delete_object(&bucket, &object.key)
                    .await
                    .inspect_err(|e| error!("Failed to delete {}: {}", object.key, e))?;
                removed_objects += 1;
            }

            match listing.next_token {
                Some(token) if listing.truncated => request = request.token(token),
                _ => break,
            }
        }

        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;
        let mut removed_versions = 0usize;
        loop {
            let listing = self
                .backend
                .list_object_versions(&bucket, key_marker.as_deref(), version_id_marker.as_deref())
                .await
                .inspect_err(|e| error!("Failed to list versions in {}: {}", bucket, e))?;

            for version in &listing.versions {
                let Some(version_id) = version.version_id.as_deref() else {
                    continue;
                };
                self.backend
                    .delete_version(&bucket, &version.key, version_id)
                    .await
                    .inspect_err(|e| {
                        error!("Failed to delete {} version {}: {}", version.key, version_id, e)
                    })?;
                removed_versions += 1;
            }

            if !listing.truncated {
                break;
            }
            let advanced = listing.next_key_marker.is_some()
                && (listing.next_key_marker != key_marker
                    || listing.next_version_id_marker != version_id_marker);
            if !advanced {
                warn!(
                    "Version listing of {} is truncated but its markers did not advance, stopping",
                    bucket
                );
                break;
            }
            key_marker = listing.next_key_marker;
            version_id_marker = listing.next_version_id_marker;
        }

        self.backend
            .delete_bucket(&bucket)
            .await
            .inspect_err(|e| error!("Failed to delete bucket {}: {}", bucket, e))?;

        info!(
            "Deleted bucket {} ({} objects, {} versions)",
            bucket, removed_objects, removed_versions
        );
        Ok(())
    }

    pub async fn set_bucket_cors(&self, bucket: &str, rules: &[CorsRule]) -> Result<()> {
        let bucket = self.bucket(bucket)?;
        if rules.is_empty() {
            return Err(StorageError::validation("CORS rules are empty"));
        }
        self.backend
            .put_bucket_cors(&bucket, rules)
            .await
            .inspect_err(|e| error!("Failed to set CORS on {}: {}", bucket, e))
    }

    pub async fn get_bucket_cors(&self, bucket: &str) -> Result<Vec<CorsRule>> {
        let bucket = self.bucket(bucket)?;
        self.backend
            .get_bucket_cors(&bucket)
            .await
            .inspect_err(|e| error!("Failed to read CORS of {}: {}", bucket, e))
    }

    pub async fn delete_bucket_cors(&self, bucket: &str) -> Result<()> {
        let bucket = self.bucket(bucket)?;
        self.backend
            .delete_bucket_cors(&bucket)
            .await
            .inspect_err(|e| error!("Failed to delete CORS of {}: {}", bucket, e))
    }

    pub async fn get_bucket_policy(&self, bucket: &str) -> Result<Option<String>> {
        let bucket = self.bucket(bucket)?;
        self.backend
            .get_bucket_policy(&bucket)
            .await
            .inspect_err(|e| error!("Failed to read policy of {}: {}", bucket, e))
    }

    pub async fn delete_bucket_policy(&self, bucket: &str) -> Result<()> {
        let bucket = self.bucket(bucket)?;
        self.backend
            .delete_bucket_policy(&bucket)
            .await
            .inspect_err(|e| error!("Failed to delete policy of {}: {}", bucket, e))
    }

    pub async fn set_bucket_lifecycle(&self, bucket: &str, rules: &[LifecycleRule]) -> Result<()> {
        let bucket = self.bucket(bucket)?;
        if rules.is_empty() {
            return Err(StorageError::validation("lifecycle rules are empty"));
        }
        self.backend
            .put_bucket_lifecycle(&bucket, rules)
            .await
            .inspect_err(|e| error!("Failed to set lifecycle on {}: {}", bucket, e))
    }

    pub async fn get_bucket_lifecycle(&self, bucket: &str) -> Result<Vec<LifecycleRule>> {
        let bucket = self.bucket(bucket)?;
        self.backend
            .get_bucket_lifecycle(&bucket)
            .await
            .inspect_err(|e| error!("Failed to read lifecycle of {}: {}", bucket, e))
    }

    // Object operations

    fn list_request(&self, request: &ListRequest) -> Result<ListRequest> {
        Ok(ListRequest {
            bucket: self.bucket(&request.bucket)?,
            prefix: self.config.scoped_prefix(request.prefix.as_deref()),
            token: request.token.clone(),
            max_keys: request.max_keys,
        })
    }

    /// One V1 (marker based) page of objects under `prefix`
    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<ObjectListing> {
        self.list_objects_with(&ListRequest::new(bucket).prefix(prefix))
            .await
    }

    pub async fn list_objects_with(&self, request: &ListRequest) -> Result<ObjectListing> {
        let request = self.list_request(request)?;
        self.backend
            .list_objects(&request)
            .await
            .inspect_err(|e| error!("Failed to list objects in {}: {}", request.bucket, e))
    }

    /// One V2 (continuation token) page of objects under `prefix`
    pub async fn list_objects_v2(&self, bucket: &str, prefix: &str) -> Result<ObjectListing> {
        self.list_objects_v2_with(&ListRequest::new(bucket).prefix(prefix))
            .await
    }

    pub async fn list_objects_v2_with(&self, request: &ListRequest) -> Result<ObjectListing> {
        let request = self.list_request(request)?;
        self.backend
            .list_objects_v2(&request)
            .await
            .inspect_err(|e| error!("Failed to list objects in {}: {}", request.bucket, e))
    }

    /// Every object in the bucket, fetched page by page
    pub async fn object_summaries(
        &self,
        bucket: &str,
        max_keys: i32,
    ) -> Result<Vec<ObjectSummary>> {
        self.object_summaries_with_prefix(bucket, "", max_keys).await
    }

    /// Every object under `prefix`, fetched page by page
    ///
    /// `max_keys` is the page size when positive.
    pub async fn object_summaries_with_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
    ) -> Result<Vec<ObjectSummary>> {
        let mut request = ListRequest::new(bucket).prefix(prefix);
        if max_keys > 0 {
            request = request.max_keys(max_keys);
        }

        let mut summaries = Vec::new();
        loop {
            let listing = self.list_objects_v2_with(&request).await?;
            summaries.extend(listing.objects);

            match listing.next_token {
                Some(token) if listing.truncated => request = request.token(token),
                _ => break,
            }
        }
        Ok(summaries)
    }

    pub async fn object_names(&self, bucket: &str, max_keys: i32) -> Result<Vec<String>> {
        Ok(self
            .object_summaries(bucket, max_keys)
            .await?
            .into_iter()
            .map(|s| s.key)
            .collect())
    }

    pub async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<CopyResult> {
        require(src_key, "source key")?;
        require(dest_key, "destination key")?;
        let source = ObjectRef::new(self.bucket(src_bucket)?, src_key);
        let destination = ObjectRef::new(self.bucket(dest_bucket)?, dest_key);

        if source == destination {
            return Err(StorageError::ContractViolation(format!(
                "cannot copy {} onto itself",
                source
            )));
        }

        let result = self
            .backend
            .copy_object(&source, &destination)
            .await
            .inspect_err(|e| error!("Failed to copy {} to {}: {}", source, destination, e))?;

        info!("Copied {} to {}", source, destination);
        Ok(result)
    }

    /// Copy an object into another bucket under the same key
    pub async fn copy_object_to_bucket(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
    ) -> Result<CopyResult> {
        self.copy_object(src_bucket, src_key, dest_bucket, src_key)
            .await
    }

    /// Delete many objects in one request
    ///
    /// Only runs against buckets with versioning enabled; otherwise a warning
    /// is logged and `None` returned without deleting anything.
    pub async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectVersion],
        quiet: bool,
    ) -> Result<Option<DeleteObjectsResult>> {
        let bucket = self.bucket(bucket)?;
        if objects.is_empty() {
            return Err(StorageError::validation("object list is empty"));
        }

        let status = self
            .backend
            .bucket_versioning(&bucket)
            .await
            .inspect_err(|e| error!("Failed to read versioning of {}: {}", bucket, e))?;
        if status != VersioningStatus::Enabled {
            warn!(
                "Bucket {} does not have versioning enabled ({:?}), skipping delete of {} objects",
                bucket,
                status,
                objects.len()
            );
            return Ok(None);
        }

        let result = self
            .backend
            .delete_objects(&bucket, objects, quiet)
            .await
            .inspect_err(|e| error!("Failed to delete objects in {}: {}", bucket, e))?;

        info!(
            "Deleted {} objects from {} ({} errors)",
            result.deleted.len(),
            bucket,
            result.errors.len()
        );
        Ok(Some(result))
    }

    pub async fn delete_objects_by_keys(
        &self,
        bucket: &str,
        keys: &[String],
        quiet: bool,
    ) -> Result<Option<DeleteObjectsResult>> {
        let objects: Vec<ObjectVersion> = keys.iter().map(ObjectVersion::new).collect();
        self.delete_objects(bucket, &objects, quiet).await
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let bucket = self.bucket(bucket)?;
        require(key, "object key")?;
        self.backend
            .delete_object(&bucket, key)
            .await
            .inspect_err(|e| error!("Failed to delete {}/{}: {}", bucket, key, e))
    }

    pub async fn delete_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<()> {
        let bucket = self.bucket(bucket)?;
        require(key, "object key")?;
        require(version_id, "version id")?;
        self.backend
            .delete_version(&bucket, key, version_id)
            .await
            .inspect_err(|e| {
                error!("Failed to delete {}/{} version {}: {}", bucket, key, version_id, e)
            })
    }

    /// Store `content` under a generated key; returns the key
    pub async fn upload_text(
        &self,
        bucket: &str,
        name: &str,
        base_dir: Option<&str>,
        content: &str,
    ) -> Result<String> {
        let bucket = self.bucket(bucket)?;
        require(content, "content")?;
        let key = self.namer.object_key(name, base_dir)?;

        upload::upload_text(self.backend.as_ref(), &bucket, &key, content)
            .await
            .inspect_err(|e| error!("Failed to upload text to {}/{}: {}", bucket, key, e))?;

        info!("Uploaded text to s3://{}{}", bucket, key);
        Ok(key)
    }

    /// Upload a file with one PUT; returns the generated key
    pub async fn upload_file(
        &self,
        bucket: &str,
        local_path: &Path,
        base_dir: Option<&str>,
        metadata: Option<ObjectMetadata>,
        pb: Option<&ProgressBar>,
    ) -> Result<String> {
        let bucket = self.bucket(bucket)?;
        let key = self.namer.object_key(file_name(local_path)?, base_dir)?;

        upload::upload_file(self.backend.as_ref(), &bucket, &key, local_path, metadata, pb)
            .await
            .inspect_err(|e| error!("Failed to upload {}: {}", local_path.display(), e))?;

        info!("Uploaded {} to s3://{}{}", local_path.display(), bucket, key);
        Ok(key)
    }

    /// Upload a file in sequential 5 MiB parts; returns the generated key
    pub async fn multipart_upload(
        &self,
        bucket: &str,
        local_path: &Path,
        base_dir: Option<&str>,
        pb: Option<&ProgressBar>,
    ) -> Result<String> {
        let bucket = self.bucket(bucket)?;
        let key = self.namer.object_key(file_name(local_path)?, base_dir)?;

        upload_multipart(
            self.backend.as_ref(),
            &bucket,
            &key,
            local_path,
            &self.multipart,
            pb,
        )
        .await
        .inspect_err(|e| error!("Multipart upload of {} failed: {}", local_path.display(), e))?;

        Ok(key)
    }

    /// Upload a file through the managed transfer; returns the generated key
    pub async fn managed_upload(
        &self,
        bucket: &str,
        local_path: &Path,
        base_dir: Option<&str>,
        pb: Option<&ProgressBar>,
    ) -> Result<String> {
        let bucket = self.bucket(bucket)?;
        let key = self.namer.object_key(file_name(local_path)?, base_dir)?;

        managed_transfer(
            self.backend.as_ref(),
            &bucket,
            &key,
            local_path,
            &self.transfer,
            pb,
        )
        .await
        .inspect_err(|e| error!("Managed upload of {} failed: {}", local_path.display(), e))?;

        Ok(key)
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        let bucket = self.bucket(bucket)?;
        require(key, "object key")?;
        self.backend
            .get_object(&bucket, key)
            .await
            .inspect_err(|e| error!("Failed to get {}/{}: {}", bucket, key, e))
    }

    pub async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        method: HttpMethod,
    ) -> Result<PresignedUrl> {
        let bucket = self.bucket(bucket)?;
        require(key, "object key")?;
        generate_presigned_url(
            self.backend.as_ref(),
            &bucket,
            key,
            method,
            self.clock.now(),
            expires_in,
        )
        .await
        .inspect_err(|e| error!("Failed to presign {} {}/{}: {}", method, bucket, key, e))
    }

    pub async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<PresignedUrl> {
        self.presigned_url(bucket, key, expires_in, HttpMethod::Get)
            .await
    }

    pub async fn presigned_put_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<PresignedUrl> {
        self.presigned_url(bucket, key, expires_in, HttpMethod::Put)
            .await
    }

    /// URL of an object in the default bucket
    ///
    /// Private spaces get a presigned GET valid for `token_time` seconds.
    pub async fn object_url(&self, key: &str) -> Result<String> {
        require(key, "object key")?;

        if !self.config.private {
            return Ok(self.config.public_url(key));
        }

        let expires_in = Duration::from_secs(self.config.token_time);
        if expires_in > MAX_PRESIGN_EXPIRY {
            return Err(StorageError::Config(format!(
                "token time of {}s exceeds the 7 day presign limit",
                self.config.token_time
            )));
        }

        let bucket = self.default_bucket_name().to_string();
        Ok(self.presigned_get_url(&bucket, key, expires_in).await?.url)
    }
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            StorageError::validation(format!("{} has no usable file name", path.display()))
        })
}
