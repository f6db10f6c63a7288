use aws_sdk_s3::error::DisplayErrorContext;
use thiserror::Error;

/// Errors returned by the storage facade
#[derive(Error, Debug)]
pub enum StorageError {
    /// A required argument was empty or out of range
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// The storage service (or the SDK talking to it) failed
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    /// The caller asked for something the facade refuses to do
    #[error("Unsupported operation: {0}")]
    ContractViolation(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wrap an SDK error, keeping the full source chain in the message
    pub fn backend<E: std::error::Error>(operation: &'static str, error: E) -> Self {
        Self::Backend {
            operation,
            message: DisplayErrorContext(error).to_string(),
        }
    }

    /// Whether the backend refused the request for lack of permissions
    pub fn is_access_denied(&self) -> bool {
        match self {
            Self::Backend { message, .. } => {
                let message = message.to_lowercase();
                message.contains("access denied")
                    || message.contains("accessdenied")
                    || message.contains("forbidden")
            }
            _ => false,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => {
                format!(
                    "Invalid argument: {}\n\nPossible solutions:\n  \
                     1. Check that bucket names, object keys and file names are not empty\n  \
                     2. Run with --help to see the expected arguments",
                    message
                )
            }
            Self::Backend { operation, .. } if self.is_access_denied() => {
                format!(
                    "Access denied during {}: {}\n\nPossible solutions:\n  \
                     1. Check S3_ACCESS_KEY and S3_SECRET_KEY in .env\n  \
                     2. Verify the bucket policy grants this operation\n  \
                     3. Check AWS_REGION in .env matches the bucket region",
                    operation, self
                )
            }
            Self::Backend { .. } => {
                format!(
                    "{}\n\nPossible solutions:\n  \
                     1. Check that S3_ENDPOINT is reachable\n  \
                     2. Verify the bucket exists: s3kit buckets\n  \
                     3. Re-run with RUST_LOG=debug for details",
                    self
                )
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
