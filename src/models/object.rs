//! Represents one listed object in a source or staging bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a single stored file as reported by a listing.
///
/// Only metadata is carried; payload bytes never pass through the sync.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Full object key within its bucket.
    pub key: String,

    /// Entity tag with surrounding quotes stripped.
    pub etag: String,

    /// Size in bytes.
    pub size: i64,

    /// Last modification time reported by the store.
    pub last_modified: DateTime<Utc>,
}

impl ObjectRecord {
    pub fn new(
        key: impl Into<String>,
        etag: impl AsRef<str>,
        size: i64,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            etag: etag.as_ref().trim_matches('"').to_string(),
            size,
            last_modified,
        }
    }

    /// Keys ending in `/` are folder placeholders (normally zero bytes) and
    /// have no file name to stage under.
    pub fn is_directory_marker(&self) -> bool {
        self.key.ends_with('/')
    }

    /// True when the object has not been seen under the given watermark.
    pub fn is_newer_than(&self, since: Option<DateTime<Utc>>) -> bool {
        match since {
            Some(watermark) => self.last_modified > watermark,
            None => true,
        }
    }

    /// Final path segment of the key.
    pub fn file_name(&self) -> &str {
        file_name(&self.key)
    }
}

/// Final path segment of an object key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
