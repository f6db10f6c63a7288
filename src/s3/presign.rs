use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime};

use super::backend::ObjectBackend;
use super::error::{Result, StorageError};
use super::types::{HttpMethod, PresignedUrl};

/// Longest window S3 accepts for a presigned URL (7 days)
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Generate a pre-signed URL valid from `now` for exactly `expires_in`
///
/// # Arguments
///
/// * `backend` - storage backend that signs the request
/// * `bucket` - bucket name
/// * `key` - object key
/// * `method` - the only verb the URL will authorize
/// * `now` - signing time, normally the facade clock
/// * `expires_in` - validity window
///
/// # Errors
///
/// A zero window or one longer than 7 days is rejected before the backend
/// is called.
pub async fn generate_presigned_url(
    backend: &dyn ObjectBackend,
    bucket: &str,
    key: &str,
    method: HttpMethod,
    now: DateTime<Utc>,
    expires_in: Duration,
) -> Result<PresignedUrl> {
    if expires_in.is_zero() {
        return Err(StorageError::validation("presigned URL expiry must be positive"));
    }
    if expires_in > MAX_PRESIGN_EXPIRY {
        return Err(StorageError::validation(format!(
            "presigned URL expiry {}s exceeds the 7 day maximum",
            expires_in.as_secs()
        )));
    }

    let expires_at = now
        + chrono::Duration::from_std(expires_in)
            .map_err(|e| StorageError::validation(e.to_string()))?;

    let url = backend
        .presign(bucket, key, method, SystemTime::from(now), expires_in)
        .await?;

    Ok(PresignedUrl {
        url,
        method,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::mock::{Call, MockBackend};
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_expiration_is_now_plus_duration() {
        let backend = MockBackend::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();

        let url = generate_presigned_url(
            &backend,
            "b",
            "/k",
            HttpMethod::Put,
            now,
            Duration::from_secs(1800),
        )
        .await
        .unwrap();

        assert_eq!(url.expires_at, Utc.with_ymd_and_hms(2024, 1, 31, 12, 30, 0).unwrap());
        assert_eq!(url.method, HttpMethod::Put);
        assert!(url.url.contains("X-Amz-Method=PUT"));

        match &backend.calls()[0] {
            Call::Presign {
                start, expires_in, method, ..
            } => {
                assert_eq!(*start, SystemTime::from(now));
                assert_eq!(*expires_in, Duration::from_secs(1800));
                assert_eq!(*method, HttpMethod::Put);
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expiry_bounds() {
        let backend = MockBackend::new();
        let now = Utc::now();

        let zero =
            generate_presigned_url(&backend, "b", "k", HttpMethod::Get, now, Duration::ZERO).await;
        assert!(matches!(zero, Err(StorageError::Validation(_))));

        let too_long = generate_presigned_url(
            &backend,
            "b",
            "k",
            HttpMethod::Get,
            now,
            MAX_PRESIGN_EXPIRY + Duration::from_secs(1),
        )
        .await;
        assert!(matches!(too_long, Err(StorageError::Validation(_))));
        assert!(backend.calls().is_empty());

        assert!(
            generate_presigned_url(&backend, "b", "k", HttpMethod::Get, now, MAX_PRESIGN_EXPIRY)
                .await
                .is_ok()
        );
    }
}
