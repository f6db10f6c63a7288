pub mod backend;
pub mod client;
pub mod error;
pub mod helpers;
pub mod multipart;
pub mod naming;
pub mod presign;
pub mod template;
pub mod transfer;
pub mod types;
pub mod upload;

#[cfg(test)]
mod mock;

pub use backend::ObjectBackend;
pub use client::S3Client;
pub use error::{Result, StorageError};
pub use helpers::{detect_content_type, parse_metadata};
pub use multipart::{MultipartOptions, PART_SIZE, upload_multipart};
pub use naming::{Clock, DEFAULT_UPLOAD_BASE_DIR, KeyNamer, SystemClock, TokenSource, UuidTokens};
pub use presign::{MAX_PRESIGN_EXPIRY, generate_presigned_url};
pub use template::S3Template;
pub use transfer::{MULTIPART_THRESHOLD, TransferConfig};
pub use types::*;
