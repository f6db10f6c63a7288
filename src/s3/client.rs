use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, RequestChecksumCalculation, ResponseChecksumValidation};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types as sdk;
use aws_sdk_s3::Client;
use aws_smithy_types::byte_stream::{ByteStream, Length};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::debug;

use super::backend::ObjectBackend;
use super::error::{Result, StorageError};
use super::multipart::{CompletedPart, PartSpec};
use super::types::{
    Bucket, CopyResult, CorsRule, DeleteFailure, DeleteObjectsResult, DeletedObject, HttpMethod,
    LifecycleRule, ListRequest, ObjectBody, ObjectListing, ObjectMetadata, ObjectRef,
    ObjectSummary, ObjectVersion, PutResult, StoredObject, VersionListing, VersionSummary,
    VersioningStatus,
};
use crate::config::StorageConfig;

const US_EAST_1: &str = "us-east-1";

/// `ObjectBackend` over the AWS SDK, usable with any S3-compatible service
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    region: String,
}

impl S3Client {
    /// Build a client from explicit configuration
    ///
    /// Credentials come from the config, never from the ambient AWS chain.
    /// Path-style addressing and relaxed checksums are scoped to this client.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "s3template",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.relaxed_checksums {
            builder = builder
                .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
                .response_checksum_validation(ResponseChecksumValidation::WhenRequired);
        }

        debug!(
            "S3 client configured for region {} (endpoint: {})",
            config.region,
            config.endpoint.as_deref().unwrap_or("aws")
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            region: config.region.clone(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

fn to_summary(object: &sdk::Object) -> ObjectSummary {
    ObjectSummary {
        key: object.key().unwrap_or_default().to_string(),
        size: object.size().unwrap_or(0).max(0) as u64,
        e_tag: object.e_tag().map(str::to_string),
        last_modified: object.last_modified().and_then(to_chrono),
        storage_class: object.storage_class().map(|c| c.as_str().to_string()),
    }
}

fn to_sdk_cors(rule: &CorsRule) -> Result<sdk::CorsRule> {
    sdk::CorsRule::builder()
        .set_id(rule.id.clone())
        .set_allowed_origins(Some(rule.allowed_origins.clone()))
        .set_allowed_methods(Some(rule.allowed_methods.clone()))
        .set_allowed_headers(Some(rule.allowed_headers.clone()))
        .set_expose_headers(Some(rule.expose_headers.clone()))
        .set_max_age_seconds(rule.max_age_seconds)
        .build()
        .map_err(|e| StorageError::backend("put_bucket_cors", e))
}

fn from_sdk_cors(rule: &sdk::CorsRule) -> CorsRule {
    CorsRule {
        id: rule.id().map(str::to_string),
        allowed_origins: rule.allowed_origins().to_vec(),
        allowed_methods: rule.allowed_methods().to_vec(),
        allowed_headers: rule.allowed_headers().to_vec(),
        expose_headers: rule.expose_headers().to_vec(),
        max_age_seconds: rule.max_age_seconds(),
    }
}

fn to_sdk_lifecycle(rule: &LifecycleRule) -> Result<sdk::LifecycleRule> {
    let status = if rule.enabled {
        sdk::ExpirationStatus::Enabled
    } else {
        sdk::ExpirationStatus::Disabled
    };

    let mut builder = sdk::LifecycleRule::builder()
        .set_id(rule.id.clone())
        .filter(sdk::LifecycleRuleFilter::builder().prefix(&rule.prefix).build())
        .status(status);

    if let Some(days) = rule.expiration_days {
        builder = builder.expiration(sdk::LifecycleExpiration::builder().days(days).build());
    }
    if let Some(days) = rule.abort_incomplete_multipart_days {
        builder = builder.abort_incomplete_multipart_upload(
            sdk::AbortIncompleteMultipartUpload::builder()
                .days_after_initiation(days)
                .build(),
        );
    }

    builder
        .build()
        .map_err(|e| StorageError::backend("put_bucket_lifecycle", e))
}

fn from_sdk_lifecycle(rule: &sdk::LifecycleRule) -> LifecycleRule {
    LifecycleRule {
        id: rule.id().map(str::to_string),
        prefix: rule
            .filter()
            .and_then(|f| f.prefix())
            .unwrap_or_default()
            .to_string(),
        enabled: rule.status() == &sdk::ExpirationStatus::Enabled,
        expiration_days: rule.expiration().and_then(|e| e.days()),
        abort_incomplete_multipart_days: rule
            .abort_incomplete_multipart_upload()
            .and_then(|a| a.days_after_initiation()),
    }
}

/// `copy_source` is `<bucket>/<url-encoded key>` with slashes left intact
fn copy_source(source: &ObjectRef) -> String {
    let key = urlencoding::encode(&source.key).replace("%2F", "/");
    format!("{}/{}", source.bucket, key)
}

#[async_trait]
impl ObjectBackend for S3Client {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => match err.as_service_error() {
                Some(e) if e.is_not_found() => Ok(false),
                _ => Err(StorageError::backend("head_bucket", err)),
            },
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 rejects an explicit location constraint
        if self.region != US_EAST_1 {
            request = request.create_bucket_configuration(
                sdk::CreateBucketConfiguration::builder()
                    .location_constraint(sdk::BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::backend("create_bucket", e))?;
        Ok(())
    }

    async fn bucket_location(&self, bucket: &str) -> Result<Option<String>> {
        let output = self
            .client
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::backend("get_bucket_location", e))?;

        Ok(output
            .location_constraint()
            .map(|l| l.as_str().to_string())
            .filter(|l| !l.is_empty()))
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| StorageError::backend("list_buckets", e))?;

        Ok(output
            .buckets()
            .iter()
            .map(|b| Bucket {
                name: b.name().unwrap_or_default().to_string(),
                creation_date: b.creation_date().and_then(to_chrono),
            })
            .collect())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::backend("delete_bucket", e))?;
        Ok(())
    }

    async fn put_bucket_cors(&self, bucket: &str, rules: &[CorsRule]) -> Result<()> {
        let rules = rules.iter().map(to_sdk_cors).collect::<Result<Vec<_>>>()?;
        let configuration = sdk::CorsConfiguration::builder()
            .set_cors_rules(Some(rules))
            .build()
            .map_err(|e| StorageError::backend("put_bucket_cors", e))?;

        self.client
            .put_bucket_cors()
            .bucket(bucket)
            .cors_configuration(configuration)
            .send()
            .await
            .map_err(|e| StorageError::backend("put_bucket_cors", e))?;
        Ok(())
    }

    async fn get_bucket_cors(&self, bucket: &str) -> Result<Vec<CorsRule>> {
        match self.client.get_bucket_cors().bucket(bucket).send().await {
            Ok(output) => Ok(output.cors_rules().iter().map(from_sdk_cors).collect()),
            Err(err) if err.code() == Some("NoSuchCORSConfiguration") => Ok(Vec::new()),
            Err(err) => Err(StorageError::backend("get_bucket_cors", err)),
        }
    }

    async fn delete_bucket_cors(&self, bucket: &str) -> Result<()> {
        self.client
            .delete_bucket_cors()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::backend("delete_bucket_cors", e))?;
        Ok(())
    }

    async fn get_bucket_policy(&self, bucket: &str) -> Result<Option<String>> {
        match self.client.get_bucket_policy().bucket(bucket).send().await {
            Ok(output) => Ok(output.policy().map(str::to_string)),
            Err(err) if err.code() == Some("NoSuchBucketPolicy") => Ok(None),
            Err(err) => Err(StorageError::backend("get_bucket_policy", err)),
        }
    }

    async fn delete_bucket_policy(&self, bucket: &str) -> Result<()> {
        self.client
            .delete_bucket_policy()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::backend("delete_bucket_policy", e))?;
        Ok(())
    }

    async fn put_bucket_lifecycle(&self, bucket: &str, rules: &[LifecycleRule]) -> Result<()> {
        let rules = rules
            .iter()
            .map(to_sdk_lifecycle)
            .collect::<Result<Vec<_>>>()?;
        let configuration = sdk::BucketLifecycleConfiguration::builder()
            .set_rules(Some(rules))
            .build()
            .map_err(|e| StorageError::backend("put_bucket_lifecycle", e))?;

        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(configuration)
            .send()
            .await
            .map_err(|e| StorageError::backend("put_bucket_lifecycle", e))?;
        Ok(())
    }

    async fn get_bucket_lifecycle(&self, bucket: &str) -> Result<Vec<LifecycleRule>> {
        match self
            .client
            .get_bucket_lifecycle_configuration()
            .bucket(bucket)
            .send()
            .await
        {
            Ok(output) => Ok(output.rules().iter().map(from_sdk_lifecycle).collect()),
            Err(err) if err.code() == Some("NoSuchLifecycleConfiguration") => Ok(Vec::new()),
            Err(err) => Err(StorageError::backend("get_bucket_lifecycle", err)),
        }
    }

    async fn bucket_versioning(&self, bucket: &str) -> Result<VersioningStatus> {
        let output = self
            .client
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::backend("get_bucket_versioning", e))?;

        Ok(match output.status() {
            Some(sdk::BucketVersioningStatus::Enabled) => VersioningStatus::Enabled,
            Some(sdk::BucketVersioningStatus::Suspended) => VersioningStatus::Suspended,
            _ => VersioningStatus::Off,
        })
    }

    async fn list_objects(&self, request: &ListRequest) -> Result<ObjectListing> {
        let output = self
            .client
            .list_objects()
            .bucket(&request.bucket)
            .set_prefix(request.prefix.clone())
            .set_marker(request.token.clone())
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(|e| StorageError::backend("list_objects", e))?;

        let objects: Vec<ObjectSummary> = output.contents().iter().map(to_summary).collect();
        let truncated = output.is_truncated().unwrap_or(false);

        // NextMarker is only sent with a delimiter; otherwise resume after the last key
        let next_token = truncated
            .then(|| {
                output
                    .next_marker()
                    .map(str::to_string)
                    .or_else(|| objects.last().map(|o| o.key.clone()))
            })
            .flatten();

        Ok(ObjectListing {
            bucket: request.bucket.clone(),
            prefix: request.prefix.clone(),
            objects,
            truncated,
            next_token,
        })
    }

    async fn list_objects_v2(&self, request: &ListRequest) -> Result<ObjectListing> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&request.bucket)
            .set_prefix(request.prefix.clone())
            .set_continuation_token(request.token.clone())
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(|e| StorageError::backend("list_objects_v2", e))?;

        let truncated = output.is_truncated().unwrap_or(false);
        Ok(ObjectListing {
            bucket: request.bucket.clone(),
            prefix: request.prefix.clone(),
            objects: output.contents().iter().map(to_summary).collect(),
            truncated,
            next_token: output
                .next_continuation_token()
                .filter(|_| truncated)
                .map(str::to_string),
        })
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        key_marker: Option<&str>,
        version_id_marker: Option<&str>,
    ) -> Result<VersionListing> {
        let output = self
            .client
            .list_object_versions()
            .bucket(bucket)
            .set_key_marker(key_marker.map(str::to_string))
            .set_version_id_marker(version_id_marker.map(str::to_string))
            .send()
            .await
            .map_err(|e| StorageError::backend("list_object_versions", e))?;

        let versions = output.versions().iter().map(|v| VersionSummary {
            key: v.key().unwrap_or_default().to_string(),
            version_id: v.version_id().map(str::to_string),
            is_latest: v.is_latest().unwrap_or(false),
            is_delete_marker: false,
        });
        let markers = output.delete_markers().iter().map(|m| VersionSummary {
            key: m.key().unwrap_or_default().to_string(),
            version_id: m.version_id().map(str::to_string),
            is_latest: m.is_latest().unwrap_or(false),
            is_delete_marker: true,
        });

        Ok(VersionListing {
            versions: versions.chain(markers).collect(),
            truncated: output.is_truncated().unwrap_or(false),
            next_key_marker: output.next_key_marker().map(str::to_string),
            next_version_id_marker: output.next_version_id_marker().map(str::to_string),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        metadata: &ObjectMetadata,
    ) -> Result<PutResult> {
        let body = match body {
            ObjectBody::Bytes(bytes) => ByteStream::from(bytes),
            ObjectBody::File(path) => ByteStream::from_path(&path)
                .await
                .map_err(|e| StorageError::backend("put_object", e))?,
        };

        let user_metadata =
            (!metadata.user_metadata.is_empty()).then(|| metadata.user_metadata.clone());

        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .set_content_type(metadata.content_type.clone())
            .set_metadata(user_metadata)
            .send()
            .await
            .map_err(|e| StorageError::backend("put_object", e))?;

        Ok(PutResult {
            e_tag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::backend("get_object", e))?;

        let content_type = output.content_type().map(str::to_string);
        let e_tag = output.e_tag().map(str::to_string);
        let user_metadata = output.metadata().cloned().unwrap_or_default();

        let content = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::backend("get_object", e))?
            .into_bytes()
            .to_vec();

        Ok(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_length: content.len() as u64,
            content,
            content_type,
            e_tag,
            user_metadata,
        })
    }

    async fn copy_object(&self, source: &ObjectRef, destination: &ObjectRef) -> Result<CopyResult> {
        let output = self
            .client
            .copy_object()
            .copy_source(copy_source(source))
            .bucket(&destination.bucket)
            .key(&destination.key)
            .send()
            .await
            .map_err(|e| StorageError::backend("copy_object", e))?;

        let result = output.copy_object_result();
        Ok(CopyResult {
            e_tag: result.and_then(|r| r.e_tag()).map(str::to_string),
            version_id: output.version_id().map(str::to_string),
            last_modified: result.and_then(|r| r.last_modified()).and_then(to_chrono),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::backend("delete_object", e))?;
        Ok(())
    }

    async fn delete_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| StorageError::backend("delete_version", e))?;
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectVersion],
        quiet: bool,
    ) -> Result<DeleteObjectsResult> {
        let identifiers = objects
            .iter()
            .map(|o| {
                sdk::ObjectIdentifier::builder()
                    .key(&o.key)
                    .set_version_id(o.version_id.clone())
                    .build()
                    .map_err(|e| StorageError::backend("delete_objects", e))
            })
            .collect::<Result<Vec<_>>>()?;

        let delete = sdk::Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(quiet)
            .build()
            .map_err(|e| StorageError::backend("delete_objects", e))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| StorageError::backend("delete_objects", e))?;

        Ok(DeleteObjectsResult {
            deleted: output
                .deleted()
                .iter()
                .map(|d| DeletedObject {
                    key: d.key().unwrap_or_default().to_string(),
                    version_id: d.version_id().map(str::to_string),
                    delete_marker: d.delete_marker().unwrap_or(false),
                })
                .collect(),
            errors: output
                .errors()
                .iter()
                .map(|e| DeleteFailure {
                    key: e.key().unwrap_or_default().to_string(),
                    code: e.code().map(str::to_string),
                    message: e.message().map(str::to_string),
                })
                .collect(),
        })
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::backend("create_multipart_upload", e))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Backend {
                operation: "create_multipart_upload",
                message: "no upload ID returned".to_string(),
            })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part: &PartSpec,
        source: &Path,
    ) -> Result<String> {
        let body = ByteStream::read_from()
            .path(source)
            .offset(part.offset)
            .length(Length::Exact(part.size))
            .build()
            .await
            .map_err(|e| StorageError::backend("upload_part", e))?;

        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part.part_number)
            .content_length(part.size as i64)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::backend("upload_part", e))?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Backend {
                operation: "upload_part",
                message: format!("no ETag returned for part {}", part.part_number),
            })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let parts = parts
            .iter()
            .map(|p| {
                sdk::CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.e_tag)
                    .build()
            })
            .collect();
        let completed = sdk::CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| StorageError::backend("complete_multipart_upload", e))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| StorageError::backend("abort_multipart_upload", e))?;
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
        let presigning_config = PresigningConfig::builder()
            .start_time(start)
            .expires_in(expires_in)
            .build()
            .map_err(|e| StorageError::backend("presign", e))?;

        let presigned_request = match method {
            HttpMethod::Get => self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning_config)
                .await
                .map_err(|e| StorageError::backend("presign", e))?,
            HttpMethod::Put => self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning_config)
                .await
                .map_err(|e| StorageError::backend("presign", e))?,
        };

        Ok(presigned_request.uri().to_string())
    }
}
