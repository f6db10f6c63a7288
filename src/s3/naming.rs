use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{Result, StorageError};

/// Directory used when the caller does not pick one
pub const DEFAULT_UPLOAD_BASE_DIR: &str = "uploads";

const FILE_SEPARATOR: char = '/';
const FILENAME_LINK: char = '-';
const DATE_PATTERN: &str = "%Y/%m/%d";

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of the random token that keeps generated keys unique
pub trait TokenSource: Send + Sync {
    fn token(&self) -> String;
}

/// UUID v4 rendered without hyphens
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidTokens;

impl TokenSource for UuidTokens {
    fn token(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Builds object keys of the form `/<dir>/<yyyy>/<MM>/<dd>/<token>-<name>`
#[derive(Clone)]
pub struct KeyNamer {
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenSource>,
}

impl Default for KeyNamer {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(UuidTokens))
    }
}

impl KeyNamer {
    pub fn new(clock: Arc<dyn Clock>, tokens: Arc<dyn TokenSource>) -> Self {
        Self { clock, tokens }
    }

    /// Generate a fresh key for `name` under `base_dir` (or `uploads`)
    ///
    /// # Errors
    ///
    /// Returns a validation error if `name` is empty, or if `base_dir` is
    /// given but has nothing left once surrounding slashes are trimmed.
    pub fn object_key(&self, name: &str, base_dir: Option<&str>) -> Result<String> {
        if name.is_empty() {
            return Err(StorageError::validation("object name is empty"));
        }

        let base_dir = match base_dir {
            Some(dir) => {
                let dir = dir.trim_matches(FILE_SEPARATOR);
                if dir.is_empty() {
                    return Err(StorageError::validation("base directory is empty"));
                }
                dir
            }
            None => DEFAULT_UPLOAD_BASE_DIR,
        };

        let date = self.clock.now().format(DATE_PATTERN);
        let token = self.tokens.token();

        let mut key = String::with_capacity(base_dir.len() + name.len() + token.len() + 16);
        key.push(FILE_SEPARATOR);
        key.push_str(base_dir);
        key.push(FILE_SEPARATOR);
        key.push_str(&date.to_string());
        key.push(FILE_SEPARATOR);
        key.push_str(&token);
        key.push(FILENAME_LINK);
        key.push_str(name);
        Ok(key)
    }
}


#[cfg(test)]
mod tests {
    use super::fixed::{FixedClock, FixedToken};
    use super::*;
    use chrono::TimeZone;

    fn namer() -> KeyNamer {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 1).unwrap();
        KeyNamer::new(Arc::new(FixedClock(at)), Arc::new(FixedToken("abc123")))
    }

    #[test]
    fn test_object_key_layout() {
        let key = namer().object_key("report.pdf", Some("docs")).unwrap();
        assert_eq!(key, "/docs/2024/03/07/abc123-report.pdf");
    }

    #[test]
    fn test_object_key_default_dir() {
        let key = namer().object_key("a.txt", None).unwrap();
        assert_eq!(key, "/uploads/2024/03/07/abc123-a.txt");
    }

    #[test]
    fn test_object_key_trims_dir_slashes() {
        let key = namer().object_key("a.txt", Some("/media/images/")).unwrap();
        assert_eq!(key, "/media/images/2024/03/07/abc123-a.txt");
    }

    #[test]
    fn test_object_key_rejects_empty_input() {
        assert!(matches!(
            namer().object_key("", None),
            Err(StorageError::Validation(_))
        ));
        assert!(matches!(
            namer().object_key("a.txt", Some("")),
            Err(StorageError::Validation(_))
        ));
        assert!(matches!(
            namer().object_key("a.txt", Some("//")),
            Err(StorageError::Validation(_))
        ));
    }

    #[test]
    fn test_uuid_tokens_are_unique_hex() {
        let tokens = UuidTokens;
        let a = tokens.token();
        let b = tokens.token();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_default_namer_uses_today() {
        let key = KeyNamer::default().object_key("x", Some("d")).unwrap();
        let today = Utc::now().format("%Y/%m/%d").to_string();
        // Midnight rollover between the two clock reads is tolerated
        let yesterday = (Utc::now() - chrono::Duration::days(1))
            .format("%Y/%m/%d")
            .to_string();
        assert!(
            key.starts_with(&format!("/d/{}/", today))
                || key.starts_with(&format!("/d/{}/", yesterday))
        );
        assert!(key.ends_with("-x"));
    }
}
