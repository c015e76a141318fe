//! Object Store Gateway.
//!
//! `ObjectStore` is the only way the sync touches storage: probe a bucket,
//! list a prefix, copy one object server-side, clear a prefix.
//! `S3Gateway` implements it against S3 (or any S3-compatible endpoint).

use crate::{
    errors::{SyncError, SyncResult},
    models::{CopyTask, ObjectRecord},
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, retry::RetryConfig, timeout::TimeoutConfig};
use aws_sdk_s3::{
    Client,
    config::Region,
    error::{DisplayErrorContext, SdkError},
    primitives::DateTime as SdkDateTime,
    types::{Delete, ObjectIdentifier},
};
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, error, info, instrument, warn};

/// Backend limit on keys per bulk delete request.
pub const DELETE_BATCH_SIZE: usize = 1000;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Probe read access to a bucket.
    ///
    /// `Ok(false)` when the store answers with a refusal (permission denied,
    /// missing bucket); `Err` only when no answer could be obtained.
    async fn can_access(&self, bucket: &str) -> SyncResult<bool>;

    /// Every object under `prefix`, keyed by object key.
    ///
    /// Folder markers are never returned. With `since`, objects modified at
    /// or before that instant are left out.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<BTreeMap<String, ObjectRecord>>;

    /// Server-side copy. Every failure is logged and reported as `false`.
    async fn copy_object(&self, task: &CopyTask) -> bool;

    /// Delete everything under `prefix` in batches of [`DELETE_BATCH_SIZE`].
    ///
    /// `true` when nothing was there to delete.
    async fn delete_by_prefix(&self, bucket: &str, prefix: &str) -> bool;
}

/// Connection settings for [`S3Gateway`].
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub region: String,
    /// Custom endpoint for S3-compatible stores.
    pub endpoint: Option<String>,
    /// Path-style addressing (`endpoint/bucket/key`), needed by most
    /// S3-compatible stores.
    pub force_path_style: bool,
    /// Attempts per call made by the SDK's own retry layer.
    pub max_attempts: u32,
    pub connect_timeout: Duration,
    /// Bound on a single HTTP attempt of any storage call.
    pub attempt_timeout: Duration,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: "us-east-2".into(),
            endpoint: None,
            force_path_style: false,
            max_attempts: 3,
            connect_timeout: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Clone)]
pub struct S3Gateway {
    client: Client,
}

impl S3Gateway {
    #[instrument(level = "debug", skip(settings), fields(region = %settings.region))]
    pub async fn connect(settings: &S3Settings) -> Self {
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(settings.connect_timeout)
            .operation_attempt_timeout(settings.attempt_timeout)
            .build();

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(settings.max_attempts))
            .timeout_config(timeouts);
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(settings.force_path_style)
            .build();

        info!(
            "S3 client initialized for region '{}' (max attempts {})",
            settings.region, settings.max_attempts
        );
        Self::from_client(Client::from_conf(s3_config))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Page through `list_objects_v2` and collect every record, markers
    /// included.
    async fn list_all(&self, bucket: &str, prefix: &str) -> SyncResult<Vec<ObjectRecord>> {
        let mut records = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(t) = token.take() {
                req = req.continuation_token(t);
            }
            let resp = req.send().await.map_err(|err| {
                SyncError::storage("list_objects_v2", bucket, prefix, DisplayErrorContext(err))
            })?;

            for obj in resp.contents() {
                let Some(key) = obj.key() else { continue };
                records.push(ObjectRecord::new(
                    key,
                    obj.e_tag().unwrap_or_default(),
                    obj.size().unwrap_or_default(),
                    obj.last_modified()
                        .and_then(to_utc)
                        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                ));
            }

            if resp.is_truncated().unwrap_or(false) {
                token = resp.next_continuation_token().map(str::to_string);
                if token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(records)
    }

    async fn delete_chunk(&self, bucket: &str, keys: &[String]) -> SyncResult<usize> {
        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| SyncError::storage("delete_objects", bucket, "", err))?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|err| SyncError::storage("delete_objects", bucket, "", err))?;

        let resp = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| {
                SyncError::storage("delete_objects", bucket, "", DisplayErrorContext(err))
            })?;

        for failure in resp.errors() {
            error!(
                "failed to delete s3://{}/{}: {} {}",
                bucket,
                failure.key().unwrap_or_default(),
                failure.code().unwrap_or_default(),
                failure.message().unwrap_or_default()
            );
        }
        Ok(resp.errors().len())
    }
}

#[async_trait]
impl ObjectStore for S3Gateway {
    #[instrument(level = "debug", skip(self))]
    async fn can_access(&self, bucket: &str) -> SyncResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => {
                debug!("access to bucket '{}' confirmed", bucket);
                Ok(true)
            }
            Err(SdkError::ServiceError(err)) => {
                let status = err.raw().status().as_u16();
                if status == 403 {
                    warn!("access DENIED for bucket '{}'", bucket);
                } else {
                    error!("error checking access for bucket '{}': HTTP {}", bucket, status);
                }
                Ok(false)
            }
            Err(err) => Err(SyncError::storage(
                "head_bucket",
                bucket,
                "",
                DisplayErrorContext(err),
            )),
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<BTreeMap<String, ObjectRecord>> {
        let records = self.list_all(bucket, prefix).await?;
        let objects = retain_new(records, since);
        match since {
            Some(ts) => debug!(
                "found {} objects modified since {} in s3://{}/{}",
                objects.len(),
                ts,
                bucket,
                prefix
            ),
            None => debug!("found {} objects in s3://{}/{}", objects.len(), bucket, prefix),
        }
        Ok(objects)
    }

    async fn copy_object(&self, task: &CopyTask) -> bool {
        let result = self
            .client
            .copy_object()
            .copy_source(copy_source(&task.source_bucket, &task.source_key))
            .bucket(&task.dest_bucket)
            .key(&task.dest_key)
            .send()
            .await;
        match result {
            Ok(_) => {
                debug!("copied {}", task.source_key);
                true
            }
            Err(err) => {
                error!(
                    "failed to copy s3://{}/{} to s3://{}/{}: {}",
                    task.source_bucket,
                    task.source_key,
                    task.dest_bucket,
                    task.dest_key,
                    DisplayErrorContext(err)
                );
                false
            }
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete_by_prefix(&self, bucket: &str, prefix: &str) -> bool {
        warn!("preparing to delete all objects under s3://{}/{}", bucket, prefix);
        let keys: Vec<String> = match self.list_all(bucket, prefix).await {
            Ok(records) => records.into_iter().map(|r| r.key).collect(),
            Err(err) => {
                error!("cannot list s3://{}/{} for deletion: {}", bucket, prefix, err);
                return false;
            }
        };
        if keys.is_empty() {
            info!("no objects found to delete under s3://{}/{}", bucket, prefix);
            return true;
        }

        info!("found {} objects to delete", keys.len());
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            match self.delete_chunk(bucket, chunk).await {
                Ok(0) => {}
                Ok(failures) => {
                    error!(
                        "{} objects could not be deleted under s3://{}/{}",
                        failures, bucket, prefix
                    );
                    return false;
                }
                Err(err) => {
                    error!("{}", err);
                    return false;
                }
            }
        }
        info!("deleted all objects under s3://{}/{}", bucket, prefix);
        true
    }
}

/// Drop folder markers and objects not newer than `since`.
pub fn retain_new(
    records: impl IntoIterator<Item = ObjectRecord>,
    since: Option<DateTime<Utc>>,
) -> BTreeMap<String, ObjectRecord> {
    records
        .into_iter()
        .filter(|r| !r.key.is_empty() && !r.is_directory_marker() && r.is_newer_than(since))
        .map(|r| (r.key.clone(), r))
        .collect()
}

/// `bucket/key` with every key segment URL-encoded, as `CopyObject` expects.
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", bucket, encoded)
}

fn to_utc(ts: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}
