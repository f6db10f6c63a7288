use futures::stream::{self, StreamExt, TryStreamExt};
use indicatif::ProgressBar;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::ObjectBackend;
use super::error::Result;
use super::multipart::{CompletedPart, MultipartSession, PART_SIZE, PartSpec, plan_parts};
use super::types::{ObjectBody, ObjectMetadata};

// Files at or above this size (16MB) go up in parts
pub const MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Tuning for managed uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub multipart_threshold: u64,
    pub part_size: u64,
    /// Parts in flight at once
    pub concurrency: usize,
    /// Extra attempts per failed part
    pub max_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: MULTIPART_THRESHOLD,
            part_size: PART_SIZE,
            concurrency: 4,
            max_retries: 3,
        }
    }
}

/// Upload a file, choosing a single PUT or a concurrent multipart upload
///
/// Waits until the whole object is stored. A failed multipart upload is
/// aborted before the error is returned.
pub async fn upload(
    backend: &dyn ObjectBackend,
    bucket: &str,
    key: &str,
    local_path: &Path,
    config: &TransferConfig,
    pb: Option<&ProgressBar>,
) -> Result<()> {
    let file_size = tokio::fs::metadata(local_path).await?.len();

    if let Some(pb) = pb {
        pb.set_length(file_size);
        pb.set_position(0);
        pb.set_message(format!("Uploading {}", local_path.display()));
    }

    if file_size < config.multipart_threshold {
        debug!(
            "{} is below the multipart threshold, using a single PUT",
            local_path.display()
        );
        backend
            .put_object(
                bucket,
                key,
                ObjectBody::File(local_path.to_path_buf()),
                &ObjectMetadata::default(),
            )
            .await?;
    } else {
        upload_parts(backend, bucket, key, local_path, file_size, config, pb).await?;
    }

    if let Some(pb) = pb {
        pb.finish_with_message(format!("✓ {}", local_path.display()));
    }

    info!(
        "Transfer complete: {} -> s3://{}/{}",
        local_path.display(),
        bucket,
        key
    );
    Ok(())
}

async fn upload_parts(
    backend: &dyn ObjectBackend,
    bucket: &str,
    key: &str,
    local_path: &Path,
    file_size: u64,
    config: &TransferConfig,
    pb: Option<&ProgressBar>,
) -> Result<()> {
    let parts = plan_parts(file_size, config.part_size);
    info!(
        "Starting managed multipart upload for {} ({} bytes, {} parts, {} concurrent)",
        local_path.display(),
        file_size,
        parts.len(),
        config.concurrency
    );

    let mut session = MultipartSession::initiate(backend, bucket, key).await?;
    let upload_id = session.upload_id.clone();

    let uploaded = stream::iter(parts)
        .map(|part| {
            let upload_id = upload_id.as_str();
            async move {
                let e_tag = upload_part_with_retry(
                    backend,
                    bucket,
                    key,
                    upload_id,
                    &part,
                    local_path,
                    config.max_retries,
                )
                .await?;
                if let Some(pb) = pb {
                    pb.inc(part.size);
                }
                Ok::<_, super::error::StorageError>(CompletedPart {
                    part_number: part.part_number,
                    e_tag,
                })
            }
        })
        .buffer_unordered(config.concurrency.max(1))
        .try_collect::<Vec<_>>()
        .await;

    let mut completed = match uploaded {
        Ok(completed) => completed,
        Err(e) => {
            abort_quietly(backend, &session).await;
            return Err(e);
        }
    };

    // Parts finish out of order; completion needs them ascending
    completed.sort_by_key(|part| part.part_number);
    session.parts = completed;

    let on_failure = session.clone();
    if let Err(e) = session.complete(backend).await {
        abort_quietly(backend, &on_failure).await;
        return Err(e);
    }
    Ok(())
}

async fn upload_part_with_retry(
    backend: &dyn ObjectBackend,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part: &PartSpec,
    source: &Path,
    max_retries: u32,
) -> Result<String> {
    let mut attempt = 0u32;
    loop {
        match backend.upload_part(bucket, key, upload_id, part, source).await {
            Ok(e_tag) => return Ok(e_tag),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                let delay = retry_delay(attempt);
                warn!(
                    "Part {} failed (attempt {}/{}), retrying in {:?}: {}",
                    part.part_number,
                    attempt,
                    max_retries.saturating_add(1),
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Exponential backoff for the `attempt`-th retry (from 1), capped at 30s
fn retry_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    RETRY_BASE_DELAY.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

async fn abort_quietly(backend: &dyn ObjectBackend, session: &MultipartSession) {
    if let Err(e) = session.abort(backend).await {
        warn!("Failed to abort multipart upload {}: {}", session.upload_id, e);
    }
}
