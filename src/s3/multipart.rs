use indicatif::ProgressBar;
use std::path::Path;
use tracing::{debug, info, warn};

use super::backend::ObjectBackend;
use super::error::{Result, StorageError};

// Size of each part (5MB), the S3 minimum for every part but the last
pub const PART_SIZE: u64 = 5 * 1024 * 1024;

/// Byte range of the source file that becomes one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpec {
    /// 1-based, contiguous
    pub part_number: i32,
    pub offset: u64,
    pub size: u64,
}

/// A part the backend has accepted, identified by its ETag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// Split `content_length` bytes into parts of at most `part_size`
///
/// Every part but the last is exactly `part_size` long. A zero length
/// yields no parts.
pub fn plan_parts(content_length: u64, part_size: u64) -> Vec<PartSpec> {
    let part_size = part_size.max(1);
    let mut parts = Vec::with_capacity(content_length.div_ceil(part_size) as usize);
    let mut offset = 0u64;
    let mut part_number = 1i32;

    while offset < content_length {
        // The last part may be shorter than part_size
        let size = part_size.min(content_length - offset);
        parts.push(PartSpec {
            part_number,
            offset,
            size,
        });
        offset += size;
        part_number += 1;
    }

    parts
}

/// An open multipart upload and the parts accepted so far
#[derive(Debug, Clone)]
pub struct MultipartSession {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub parts: Vec<CompletedPart>,
}

impl MultipartSession {
    /// Initiate a new session on the backend
    pub async fn initiate(backend: &dyn ObjectBackend, bucket: &str, key: &str) -> Result<Self> {
        let upload_id = backend.create_multipart_upload(bucket, key).await?;
        debug!("Multipart upload initiated with ID: {}", upload_id);

        Ok(Self {
            upload_id,
            bucket: bucket.to_string(),
            key: key.to_string(),
            parts: Vec::new(),
        })
    }

    /// Upload one part and record its ETag
    pub async fn upload_part(
        &mut self,
        backend: &dyn ObjectBackend,
        part: &PartSpec,
        source: &Path,
    ) -> Result<()> {
        debug!("Uploading part {} ({} bytes)", part.part_number, part.size);

        let e_tag = backend
            .upload_part(&self.bucket, &self.key, &self.upload_id, part, source)
            .await?;

        self.parts.push(CompletedPart {
            part_number: part.part_number,
            e_tag,
        });
        Ok(())
    }

    /// Ask the backend to stitch the recorded parts together
    pub async fn complete(self, backend: &dyn ObjectBackend) -> Result<()> {
        debug!(
            "All {} parts uploaded, completing multipart upload",
            self.parts.len()
        );

        backend
            .complete_multipart_upload(&self.bucket, &self.key, &self.upload_id, &self.parts)
            .await
    }

    /// Abort the session so the backend can discard uploaded parts
    pub async fn abort(&self, backend: &dyn ObjectBackend) -> Result<()> {
        backend
            .abort_multipart_upload(&self.bucket, &self.key, &self.upload_id)
            .await?;

        debug!("Aborted multipart upload {}", self.upload_id);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartOptions {
    pub part_size: u64,
    /// Abort the session when a part or the completion fails. Off by default,
    /// which leaves the failed session open on the backend until a lifecycle
    /// rule cleans it up.
    pub abort_on_failure: bool,
}

impl Default for MultipartOptions {
    fn default() -> Self {
        Self {
            part_size: PART_SIZE,
            abort_on_failure: false,
        }
    }
}

/// Upload a file with the low-level multipart API, one part at a time
///
/// # Arguments
///
/// * `backend` - storage backend
/// * `bucket` - bucket name (already normalized)
/// * `key` - object key
/// * `local_path` - path to the local file
/// * `options` - part size and failure policy
/// * `pb` - optional progress bar
///
/// # Errors
///
/// Fails on an empty file, and on the first backend error during
/// initiation, any part, or completion.
pub async fn upload_multipart(
    backend: &dyn ObjectBackend,
    bucket: &str,
    key: &str,
    local_path: &Path,
    options: &MultipartOptions,
    pb: Option<&ProgressBar>,
) -> Result<()> {
    let file_size = tokio::fs::metadata(local_path).await?.len();
    if file_size == 0 {
        return Err(StorageError::validation(format!(
            "{} is empty, nothing to upload in parts",
            local_path.display()
        )));
    }

    let parts = plan_parts(file_size, options.part_size);

    info!(
        "Starting multipart upload for {} ({} bytes, {} parts)",
        local_path.display(),
        file_size,
        parts.len()
    );

    let mut session = MultipartSession::initiate(backend, bucket, key).await?;

    if let Some(pb) = pb {
        pb.set_length(file_size);
        pb.set_position(0);
        pb.set_message(format!("Multipart upload {}", local_path.display()));
    }

    let mut uploaded_bytes = 0u64;
    for part in &parts {
        if let Err(e) = session.upload_part(backend, part, local_path).await {
            abort_if_requested(backend, &session, options).await;
            return Err(e);
        }

        uploaded_bytes += part.size;
        if let Some(pb) = pb {
            pb.set_position(uploaded_bytes);
        }
    }

    let on_failure = session.clone();
    if let Err(e) = session.complete(backend).await {
        abort_if_requested(backend, &on_failure, options).await;
        return Err(e);
    }

    if let Some(pb) = pb {
        pb.finish_with_message(format!("✓ {}", local_path.display()));
    }

    info!(
        "Successfully completed multipart upload: {} -> s3://{}/{}",
        local_path.display(),
        bucket,
        key
    );

    Ok(())
}

async fn abort_if_requested(
    backend: &dyn ObjectBackend,
    session: &MultipartSession,
    options: &MultipartOptions,
) {
    if !options.abort_on_failure {
        warn!(
            "Multipart upload {} for s3://{}/{} failed and was left open",
            session.upload_id, session.bucket, session.key
        );
        return;
    }

    if let Err(e) = session.abort(backend).await {
        warn!("Failed to abort multipart upload {}: {}", session.upload_id, e);
    }
}
