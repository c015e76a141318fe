//! Payer Directory.
//!
//! Resolves a payer id to the bucket and path its billing exports are
//! written to. Primary entries come from the warehouse configuration table
//! and are fetched once per run; a static table (built in, or loaded from a
//! JSON file) backs them up.

use crate::{
    errors::{SyncError, SyncResult},
    models::{AccessMode, PayerLocation, payer::validate_bucket_name},
    services::retry::RetryPolicy,
};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{Connection, FromRow, SqliteConnection};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};
use tracing::{debug, error, info, warn};

/// Substring stripped from bucket names when running in production.
pub const NONPROD_MARKER: &str = "-nonprod";
pub const PRODUCTION_ENVIRONMENT: &str = "prod";

/// Batch source of primary payer locations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayerConfigSource: Send + Sync {
    /// Every payer enabled for refresh.
    async fn fetch_all(&self) -> SyncResult<Vec<PayerLocation>>;
}

#[derive(FromRow, Debug)]
struct PayerConfigRow {
    payer_account_id: String,
    payer_name: Option<String>,
    payer_bucket_path: Option<String>,
}

/// Reads `payer_refresh_config` from the warehouse.
pub struct SqlPayerConfigSource {
    url: String,
}

impl SqlPayerConfigSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl PayerConfigSource for SqlPayerConfigSource {
    async fn fetch_all(&self) -> SyncResult<Vec<PayerLocation>> {
        let mut conn = SqliteConnection::connect(&self.url)
            .await
            .map_err(|err| SyncError::ConfigSource(format!("connect: {err}")))?;

        let rows = sqlx::query_as::<_, PayerConfigRow>(
            r#"
            SELECT payer_account_id, payer_name, payer_bucket_path
            FROM payer_refresh_config
            WHERE enable_refresh = 1
            ORDER BY payer_account_id
            "#,
        )
        .fetch_all(&mut conn)
        .await;
        // Close before looking at the result so a failed query doesn't leak it.
        if let Err(err) = conn.close().await {
            warn!("closing payer configuration connection failed: {}", err);
        }
        let rows = rows.map_err(|err| SyncError::ConfigSource(format!("query: {err}")))?;

        let mut locations = Vec::with_capacity(rows.len());
        for row in rows {
            let path = row.payer_bucket_path.unwrap_or_default();
            if path.trim().is_empty() {
                warn!(
                    "payer {} ({}) has no bucket path configured; ignoring",
                    row.payer_account_id,
                    row.payer_name.as_deref().unwrap_or("unnamed")
                );
                continue;
            }
            locations.push(PayerLocation::from_url(
                row.payer_account_id.trim(),
                &path,
                AccessMode::CrossAccount,
            ));
        }
        Ok(locations)
    }
}

/// One entry of a fallback table file. Unknown keys (`name`) are ignored.
#[derive(Deserialize, Debug)]
struct FallbackEntry {
    bucket: String,
    path: String,
    #[serde(default = "same_account")]
    access_type: AccessMode,
}

fn same_account() -> AccessMode {
    AccessMode::SameAccount
}

const BUILTIN_FALLBACK: &[(&str, &str, &str)] = &[
    (
        "671238551718",
        "aws-1mg-edp-parquet-cur-nonprod",
        "1mg-edp/cur-hourly-athena-data-export-1mg-edp/data",
    ),
    (
        "519933445287",
        "aws-aispl-2-parquet-cur-nonprod",
        "aispl-2/cur-hourly-athena-data-export-aispl-2/data",
    ),
    (
        "113288186989",
        "aws-testbook-edp-parquet-cur-nonprod",
        "testbook-edp/cur-hourly-athena-data-export-testbook-edp/data",
    ),
    (
        "741843927392",
        "aws-lenskart-edp-parquet-cur-nonprod",
        "lenskart-edp/cur-hourly-athena-data-export-lenskart-edp/data",
    ),
    (
        "455843933884",
        "aws-lenskart-edp-parquet-cur-nonprod",
        "lenskart-edp/cur-hourly-athena-data-export-lenskart-edp/data",
    ),
    (
        "460003782465",
        "aws-us-1-parquet-cur-nonprod",
        "us-1/cur-hourly-athena-data-export-us-1/data",
    ),
    (
        "807725649461",
        "aws-us-2-parquet-cur-nonprod",
        "us-2/cur-hourly-athena-data-export-us-2/data",
    ),
];

/// Static fallback table shipped with the binary.
pub fn builtin_fallback() -> Vec<PayerLocation> {
    BUILTIN_FALLBACK
        .iter()
        .map(|(payer, bucket, path)| PayerLocation::new(*payer, *bucket, path, AccessMode::SameAccount))
        .collect()
}

/// Load a fallback table from a JSON object keyed by payer id:
///
/// ```json
/// { "123456789012": { "bucket": "b", "path": "p/data", "access_type": "SAME_ACCOUNT" } }
/// ```
pub fn load_fallback_file(path: &Path) -> SyncResult<Vec<PayerLocation>> {
    let raw = fs::read_to_string(path)?;
    let entries: BTreeMap<String, FallbackEntry> = serde_json::from_str(&raw)?;
    info!(
        "loaded {} fallback payer entries from {}",
        entries.len(),
        path.display()
    );
    Ok(entries
        .into_iter()
        .map(|(payer, entry)| PayerLocation::new(payer, entry.bucket, entry.path, entry.access_type))
        .collect())
}

/// Resolved for one run; never refreshed mid-run.
#[derive(Debug, Clone, Default)]
pub struct PayerDirectory {
    environment: String,
    primary: HashMap<String, PayerLocation>,
    fallback: HashMap<String, PayerLocation>,
}

impl PayerDirectory {
    pub fn new(
        environment: &str,
        primary: Vec<PayerLocation>,
        fallback: Vec<PayerLocation>,
    ) -> Self {
        Self {
            environment: environment.to_lowercase(),
            primary: index(primary, "primary"),
            fallback: index(fallback, "fallback"),
        }
    }

    /// Batch-load the primary table once, falling back to an empty primary
    /// when the source stays unavailable after retries.
    pub async fn load(
        environment: &str,
        source: Option<&dyn PayerConfigSource>,
        fallback: Vec<PayerLocation>,
        retry: &RetryPolicy,
    ) -> Self {
        let primary = match source {
            Some(source) => match retry
                .retry("payer configuration fetch", || source.fetch_all())
                .await
            {
                Ok(locations) => {
                    info!("loaded {} payer configurations from the warehouse", locations.len());
                    locations
                }
                Err(err) => {
                    error!(
                        "could not load payer configurations, using the fallback table only: {}",
                        err
                    );
                    Vec::new()
                }
            },
            None => {
                info!("no payer configuration source configured, using the fallback table only");
                Vec::new()
            }
        };
        Self::new(environment, primary, fallback)
    }

    /// Primary entry, else fallback entry, with the environment rewrite
    /// applied. `None` when neither resolves to a usable bucket.
    pub fn get_config(&self, payer_id: &str) -> Option<PayerLocation> {
        if let Some(location) = self.primary.get(payer_id).and_then(|l| self.finalize(l)) {
            debug!("payer {} resolved from the primary table", payer_id);
            return Some(location);
        }
        let location = self.get_fallback(payer_id);
        if location.is_some() {
            debug!("payer {} resolved from the fallback table", payer_id);
        }
        location
    }

    /// Fallback entry only.
    pub fn get_fallback(&self, payer_id: &str) -> Option<PayerLocation> {
        self.fallback.get(payer_id).and_then(|l| self.finalize(l))
    }

    pub fn is_production(&self) -> bool {
        self.environment == PRODUCTION_ENVIRONMENT
    }

    fn finalize(&self, location: &PayerLocation) -> Option<PayerLocation> {
        let mut location = location.clone();
        if self.is_production() && location.bucket.contains(NONPROD_MARKER) {
            let rewritten = location.bucket.replace(NONPROD_MARKER, "");
            debug!(
                "rewrote bucket '{}' to '{}' for production",
                location.bucket, rewritten
            );
            location.bucket = rewritten;
        }
        match validate_bucket_name(&location.bucket) {
            Ok(()) => Some(location),
            Err(err) => {
                warn!("ignoring configuration for payer {}: {}", location.payer_id, err);
                None
            }
        }
    }
}

fn index(locations: Vec<PayerLocation>, table: &str) -> HashMap<String, PayerLocation> {
    let mut map = HashMap::with_capacity(locations.len());
    for location in locations {
        if let Some(previous) = map.insert(location.payer_id.clone(), location) {
            warn!(
                "duplicate {} entry for payer {}; keeping the last one",
                table, previous.payer_id
            );
        }
    }
    map
}
