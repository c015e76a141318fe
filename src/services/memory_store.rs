//! In-memory `ObjectStore` with fault injection.
//!
//! Mirrors the gateway contract closely enough to drive whole runs without a
//! network: listings are prefix scans over a sorted map, copies duplicate
//! bytes, deletes remove keys in [`DELETE_BATCH_SIZE`] chunks.

use crate::{
    errors::{SyncError, SyncResult},
    models::{CopyTask, ObjectRecord},
    services::object_store::{DELETE_BATCH_SIZE, ObjectStore, retain_new},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};
use tracing::{debug, error};

#[derive(Clone, Debug)]
struct StoredObject {
    body: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), StoredObject>,
    denied_buckets: HashSet<String>,
    unreachable_buckets: HashSet<String>,
    failing_list_buckets: HashSet<String>,
    failing_copy_keys: HashSet<String>,
    failing_delete_prefixes: HashSet<(String, String)>,
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    state: Mutex<State>,
    copy_calls: AtomicUsize,
    delete_requests: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `body` at `bucket/key` with an md5 etag.
    pub fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: impl Into<Bytes>,
        last_modified: DateTime<Utc>,
    ) {
        let body = body.into();
        let etag = format!("{:x}", md5::compute(&body));
        self.state().objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                etag,
                last_modified,
            },
        );
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.body.clone())
    }

    /// Keys in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Access probes on `bucket` answer "denied".
    pub fn deny_bucket(&self, bucket: &str) {
        self.state().denied_buckets.insert(bucket.to_string());
    }

    /// Access probes on `bucket` fail without an answer.
    pub fn make_unreachable(&self, bucket: &str) {
        self.state().unreachable_buckets.insert(bucket.to_string());
    }

    pub fn fail_listing(&self, bucket: &str) {
        self.state().failing_list_buckets.insert(bucket.to_string());
    }

    /// Copies whose source key equals `source_key` fail.
    pub fn fail_copy(&self, source_key: &str) {
        self.state().failing_copy_keys.insert(source_key.to_string());
    }

    /// Deletes under exactly this bucket/prefix report errors.
    pub fn fail_delete(&self, bucket: &str, prefix: &str) {
        self.state()
            .failing_delete_prefixes
            .insert((bucket.to_string(), prefix.to_string()));
    }

    pub fn copy_calls(&self) -> usize {
        self.copy_calls.load(Ordering::SeqCst)
    }

    /// Bulk delete requests issued so far (one per chunk).
    pub fn delete_requests(&self) -> usize {
        self.delete_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn can_access(&self, bucket: &str) -> SyncResult<bool> {
        let state = self.state();
        if state.unreachable_buckets.contains(bucket) {
            return Err(SyncError::storage("head_bucket", bucket, "", "connection refused"));
        }
        Ok(!state.denied_buckets.contains(bucket))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<BTreeMap<String, ObjectRecord>> {
        let state = self.state();
        if state.failing_list_buckets.contains(bucket) {
            return Err(SyncError::storage("list_objects_v2", bucket, prefix, "listing refused"));
        }
        let records = state
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), o)| {
                ObjectRecord::new(k.clone(), &o.etag, o.body.len() as i64, o.last_modified)
            });
        Ok(retain_new(records, since))
    }

    async fn copy_object(&self, task: &CopyTask) -> bool {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if state.failing_copy_keys.contains(&task.source_key) {
            error!("simulated transport error copying {}", task.source_key);
            return false;
        }
        let source = (task.source_bucket.clone(), task.source_key.clone());
        let Some(object) = state.objects.get(&source).cloned() else {
            error!(
                "failed to copy s3://{}/{}: NoSuchKey",
                task.source_bucket, task.source_key
            );
            return false;
        };
        state.objects.insert(
            (task.dest_bucket.clone(), task.dest_key.clone()),
            StoredObject {
                last_modified: Utc::now(),
                ..object
            },
        );
        debug!("copied {}", task.source_key);
        true
    }

    async fn delete_by_prefix(&self, bucket: &str, prefix: &str) -> bool {
        let mut state = self.state();
        if state
            .failing_delete_prefixes
            .contains(&(bucket.to_string(), prefix.to_string()))
        {
            error!("simulated delete errors under s3://{}/{}", bucket, prefix);
            return false;
        }
        let keys: Vec<(String, String)> = state
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .cloned()
            .collect();
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            self.delete_requests.fetch_add(1, Ordering::SeqCst);
            for key in chunk {
                state.objects.remove(key);
            }
        }
        true
    }
}
