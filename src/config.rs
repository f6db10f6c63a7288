use anyhow::{Context, Result};
use std::env;

use crate::s3::helpers::join_path;

/// Default lifetime of signed download URLs for private spaces
pub const DEFAULT_TOKEN_TIME_SECS: u64 = 1800;

const DEFAULT_REGION: &str = "us-east-1";

/// Configuration for the storage facade
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Endpoint of an S3-compatible service; AWS when unset
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    /// Default bucket, created at startup
    pub bucket: String,
    /// Public bucket domain or CDN host used for unsigned URLs
    pub domain: Option<String>,
    /// Listings are restricted to this folder when set
    pub base_path: Option<String>,
    /// Private spaces hand out signed URLs only
    pub private: bool,
    /// Signed URL lifetime in seconds
    pub token_time: u64,
    pub region: String,
    /// Apply a permissive CORS rule to the default bucket at startup
    pub auto_config_cors: bool,
    pub force_path_style: bool,
    /// Only compute and validate checksums when the operation requires it
    pub relaxed_checksums: bool,
}

impl StorageConfig {
    /// Minimal configuration with defaults for everything optional
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: None,
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            bucket: bucket.into().to_lowercase(),
            domain: None,
            base_path: None,
            private: false,
            token_time: DEFAULT_TOKEN_TIME_SECS,
            region: DEFAULT_REGION.to_string(),
            auto_config_cors: false,
            force_path_style: true,
            relaxed_checksums: false,
        }
    }

    /// Load configuration from environment variables and .env file
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if it exists

        let access_key = env::var("S3_ACCESS_KEY")
            .context("S3_ACCESS_KEY not found in environment. Please set it in .env file")?;
        let secret_key = env::var("S3_SECRET_KEY")
            .context("S3_SECRET_KEY not found in environment. Please set it in .env file")?;

        let bucket = env::var("S3_BUCKET")
            .context("S3_BUCKET not found in environment. Please set it in .env file")?
            .to_lowercase();
        Self::validate_bucket_name(&bucket)?;

        let endpoint = non_empty_var("S3_ENDPOINT");
        if let Some(endpoint) = &endpoint {
            Self::validate_endpoint(endpoint)?;
        }

        let base_path = non_empty_var("S3_BASE_PATH");
        if let Some(base_path) = &base_path {
            Self::validate_base_path(base_path)?;
        }

        let token_time = match env::var("S3_TOKEN_TIME") {
            Ok(value) => value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("parsing S3_TOKEN_TIME value `{}`", value))?,
            Err(env::VarError::NotPresent) => DEFAULT_TOKEN_TIME_SECS,
            Err(err) => return Err(err).context("reading S3_TOKEN_TIME"),
        };
        if token_time == 0 {
            anyhow::bail!("S3_TOKEN_TIME must be greater than zero");
        }

        let region = non_empty_var("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());

        Ok(Self {
            endpoint,
            access_key,
            secret_key,
            bucket,
            domain: non_empty_var("S3_DOMAIN"),
            base_path,
            private: bool_var("S3_PRIVATE", false)?,
            token_time,
            region,
            auto_config_cors: bool_var("S3_AUTO_CONFIG_CORS", false)?,
            force_path_style: bool_var("S3_FORCE_PATH_STYLE", true)?,
            relaxed_checksums: bool_var("S3_RELAXED_CHECKSUMS", false)?,
        })
    }

    /// Validate the endpoint is an absolute http(s) URL
    fn validate_endpoint(endpoint: &str) -> Result<()> {
        let rest = endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"));

        match rest {
            Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
            _ => anyhow::bail!(
                "S3_ENDPOINT '{}' must be an http:// or https:// URL with a host",
                endpoint
            ),
        }
    }

    /// Validate S3 bucket name according to AWS rules
    fn validate_bucket_name(bucket: &str) -> Result<()> {
        if bucket.is_empty() {
            anyhow::bail!("S3_BUCKET cannot be empty");
        }

        if bucket.len() < 3 || bucket.len() > 63 {
            anyhow::bail!(
                "S3_BUCKET '{}' must be between 3 and 63 characters (got {})",
                bucket,
                bucket.len()
            );
        }

        let alphanumeric =
            |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !alphanumeric(bucket.chars().next()) || !alphanumeric(bucket.chars().last()) {
            anyhow::bail!(
                "S3_BUCKET '{}' must start and end with a lowercase letter or number",
                bucket
            );
        }

        if let Some(c) = bucket
            .chars()
            .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != '-' && *c != '.')
        {
            anyhow::bail!(
                "S3_BUCKET '{}' contains invalid character '{}'. Only lowercase letters, numbers, hyphens, and periods are allowed",
                bucket,
                c
            );
        }

        if bucket.contains("..") {
            anyhow::bail!("S3_BUCKET '{}' cannot contain consecutive periods", bucket);
        }

        if bucket
            .split('.')
            .all(|part| part.parse::<u8>().is_ok() && !part.is_empty())
        {
            anyhow::bail!(
                "S3_BUCKET '{}' cannot be formatted as an IP address",
                bucket
            );
        }

        Ok(())
    }

    /// Validate the base path; "/" and "/folder" style values are accepted
    fn validate_base_path(path: &str) -> Result<()> {
        if path.contains("//") {
            anyhow::bail!(
                "S3_BASE_PATH '{}' contains consecutive slashes (not allowed)",
                path
            );
        }

        if path.split('/').any(|segment| segment == "..") {
            anyhow::bail!(
                "S3_BASE_PATH '{}' contains '..' (not allowed for security)",
                path
            );
        }

        Ok(())
    }

    /// Scope a listing prefix below the configured base path
    ///
    /// The result keeps the base path's leading slash, so a base of
    /// `/uploads` matches the keys the facade generates. Prefixes already
    /// inside the base path are only brought to that slash convention.
    pub fn scoped_prefix(&self, prefix: Option<&str>) -> Option<String> {
        let prefix = prefix.filter(|p| !p.is_empty());
        let Some(base_path) = self.base_path.as_deref() else {
            return prefix.map(str::to_string);
        };
        let base = base_path.trim_matches('/');
        if base.is_empty() {
            return prefix.map(str::to_string);
        }
        let lead = if base_path.starts_with('/') { "/" } else { "" };

        match prefix {
            None => Some(format!("{}{}/", lead, base)),
            Some(prefix) => {
                let relative = prefix.trim_start_matches('/');
                if relative == base || relative.starts_with(&format!("{}/", base)) {
                    return Some(format!("{}{}", lead, relative));
                }
                let trailing = if prefix.ends_with('/') { "/" } else { "" };
                Some(format!("{}{}{}", lead, join_path(&[base, relative]), trailing))
            }
        }
    }

    /// Public (unsigned) URL of an object in the default bucket
    ///
    /// Uses the configured domain, falling back to path-style addressing on
    /// the endpoint, then to the AWS virtual-host form.
    pub fn public_url(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        match (&self.domain, &self.endpoint) {
            (Some(domain), _) => {
                let domain = domain.trim_end_matches('/');
                if domain.contains("://") {
                    format!("{}/{}", domain, key)
                } else {
                    format!("https://{}/{}", domain, key)
                }
            }
            (None, Some(endpoint)) => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
            }
            (None, None) => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bool_var(name: &str, default: bool) -> Result<bool> {
    match non_empty_var(name) {
        None => Ok(default),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("{} must be true or false (got '{}')", name, value),
        },
    }
}
