//! Where a payer's billing exports live.

use crate::errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// How the task reaches a payer's bucket.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    SameAccount,
    CrossAccount,
}

/// Resolved source location for one payer.
///
/// Resolved fresh on every run and never persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PayerLocation {
    pub payer_id: String,
    pub bucket: String,
    /// Path under the bucket, without leading or trailing `/`.
    pub path_prefix: String,
    pub access_mode: AccessMode,
}

impl PayerLocation {
    pub fn new(
        payer_id: impl Into<String>,
        bucket: impl Into<String>,
        path_prefix: impl AsRef<str>,
        access_mode: AccessMode,
    ) -> Self {
        Self {
            payer_id: payer_id.into(),
            bucket: bucket.into(),
            path_prefix: path_prefix.as_ref().trim_matches('/').to_string(),
            access_mode,
        }
    }

    /// Build a location from an `s3://bucket/path` URL.
    pub fn from_url(payer_id: impl Into<String>, url: &str, access_mode: AccessMode) -> Self {
        let (bucket, path) = split_s3_url(url);
        Self::new(payer_id, bucket, path, access_mode)
    }
}

/// Split `s3://bucket/some/path` (scheme optional) into bucket and path.
pub fn split_s3_url(url: &str) -> (String, String) {
    let trimmed = url.trim();
    let without_scheme = trimmed.strip_prefix("s3://").unwrap_or(trimmed);
    match without_scheme.split_once('/') {
        Some((bucket, path)) => (bucket.trim().to_string(), path.trim().to_string()),
        None => (without_scheme.trim().to_string(), String::new()),
    }
}

/// Validate a bucket name against S3 naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - starts and ends with a letter or digit
/// - no `..`, `.-` or `-.`
/// - not shaped like an IPv4 address
pub fn validate_bucket_name(name: &str) -> SyncResult<()> {
    let invalid = |reason: &str| {
        Err(SyncError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        })
    };

    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len()) {
        return invalid("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return invalid("must start and end with a lowercase letter or digit");
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return invalid("cannot contain consecutive dots or dot-hyphen combinations");
    }
    if is_ipv4_like(name) {
        return invalid("must not be formatted like an IP address");
    }
    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_s3_urls() {
        assert_eq!(
            split_s3_url("s3://bucket-a/team/export/data"),
            ("bucket-a".to_string(), "team/export/data".to_string())
        );
        assert_eq!(
            split_s3_url("bucket-b"),
            ("bucket-b".to_string(), String::new())
        );
    }

    #[test]
    fn location_trims_path_slashes() {
        let loc = PayerLocation::from_url("1", "s3://b-1/x/y/", AccessMode::CrossAccount);
        assert_eq!(loc.bucket, "b-1");
        assert_eq!(loc.path_prefix, "x/y");
    }

    #[test]
    fn accepts_regular_bucket_names() {
        assert!(validate_bucket_name("aws-us-1-parquet-cur-nonprod").is_ok());
        assert!(validate_bucket_name("my.bucket.01").is_ok());
    }

    #[test]
    fn rejects_malformed_bucket_names() {
        for name in [
            "ab",
            "Upper-Case",
            "-leading",
            "trailing.",
            "double..dot",
            "dot.-hyphen",
            "192.168.10.1",
            "under_score",
        ] {
            assert!(
                matches!(
                    validate_bucket_name(name),
                    Err(SyncError::InvalidBucketName { .. })
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn access_mode_uses_upper_snake_case() {
        let json = serde_json::to_string(&AccessMode::CrossAccount).unwrap();
        assert_eq!(json, "\"CROSS_ACCOUNT\"");
    }
}
