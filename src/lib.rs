//! A configuration-driven facade over S3-compatible object storage.
//!
//! [`S3Template`] is the entry point: it normalizes bucket names, guards
//! required arguments, generates date-partitioned object keys and wraps
//! every backend failure in [`StorageError`].

pub mod config;
pub mod s3;

pub use config::StorageConfig;
pub use s3::{S3Template, StorageError};
