use indicatif::ProgressBar;
use std::path::Path;

use super::backend::ObjectBackend;
use super::error::Result;
use super::helpers::detect_content_type;
use super::types::{ObjectBody, ObjectMetadata, PutResult};

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Store a string as a new object
pub async fn upload_text(
    backend: &dyn ObjectBackend,
    bucket: &str,
    s3_key: &str,
    content: &str,
) -> Result<PutResult> {
    backend
        .put_object(
            bucket,
            s3_key,
            ObjectBody::Bytes(content.as_bytes().to_vec()),
            &ObjectMetadata::with_content_type(TEXT_CONTENT_TYPE),
        )
        .await
}

/// Upload a file with a single PUT, streaming it from disk
///
/// The content type is taken from `metadata` when set, otherwise guessed
/// from the file extension.
pub async fn upload_file(
    backend: &dyn ObjectBackend,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    metadata: Option<ObjectMetadata>,
    pb: Option<&ProgressBar>,
) -> Result<PutResult> {
    let file_size = tokio::fs::metadata(local_path).await?.len();

    // Update progress bar
    if let Some(pb) = pb {
        pb.set_length(file_size);
        pb.set_message(format!("Uploading {}", local_path.display()));
    }

    let mut metadata = metadata.unwrap_or_default();
    if metadata.content_type.is_none() {
        metadata.content_type = Some(detect_content_type(local_path));
    }

    let result = backend
        .put_object(
            bucket,
            s3_key,
            ObjectBody::File(local_path.to_path_buf()),
            &metadata,
        )
        .await?;

    if let Some(pb) = pb {
        pb.set_position(file_size);
        pb.finish_with_message(format!("Uploaded {}", local_path.display()));
    }

    Ok(result)
}
