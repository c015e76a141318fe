//! Sync Analyzer: decides, per payer, which source files are new.

use crate::{
    errors::SyncResult,
    models::{BillingPeriod, ObjectRecord, PayerAnalysisResult, PayerLocation, object::file_name},
    services::{object_store::ObjectStore, payer_directory::PayerDirectory, watermark::WatermarkStore},
};
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, btree_map::Entry},
    sync::Arc,
};
use tracing::{error, info, instrument, warn};

pub struct SyncAnalyzer {
    store: Arc<dyn ObjectStore>,
    directory: Arc<PayerDirectory>,
    scan_previous_month: bool,
}

impl SyncAnalyzer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        directory: Arc<PayerDirectory>,
        scan_previous_month: bool,
    ) -> Self {
        Self {
            store,
            directory,
            scan_previous_month,
        }
    }

    /// Analyse one payer. Never fails: every error becomes a `Failed` result.
    #[instrument(skip(self, watermarks), fields(period = %period))]
    pub async fn analyze(
        &self,
        payer_id: &str,
        period: BillingPeriod,
        watermarks: Option<&mut dyn WatermarkStore>,
    ) -> PayerAnalysisResult {
        let Some(location) = (match self.resolve_accessible(payer_id).await {
            Ok(location) => location,
            Err(err) => {
                error!("access check failed for payer {}: {}", payer_id, err);
                return PayerAnalysisResult::failed(payer_id, err.to_string());
            }
        }) else {
            return PayerAnalysisResult::failed(payer_id, "no accessible source configuration");
        };

        match self.scan(&location, period, watermarks).await {
            Ok(files) => {
                if files.is_empty() {
                    info!("payer {} is up to date", payer_id);
                } else {
                    info!("payer {} has {} new files", payer_id, files.len());
                }
                PayerAnalysisResult::found(payer_id, &location.bucket, files)
            }
            Err(err) => {
                error!("analysis failed for payer {}: {}", payer_id, err);
                PayerAnalysisResult::failed(payer_id, err.to_string())
            }
        }
    }

    /// Resolve the payer and make sure its bucket is readable, retrying via
    /// the fallback table on denial.
    async fn resolve_accessible(&self, payer_id: &str) -> SyncResult<Option<PayerLocation>> {
        let Some(primary) = self.directory.get_config(payer_id) else {
            warn!("no configuration found for payer {}", payer_id);
            return Ok(None);
        };
        if self.store.can_access(&primary.bucket).await? {
            return Ok(Some(primary));
        }

        warn!(
            "access denied to bucket '{}' for payer {}; trying the fallback configuration",
            primary.bucket, payer_id
        );
        match self.directory.get_fallback(payer_id) {
            Some(fallback) if fallback.bucket != primary.bucket => {
                if self.store.can_access(&fallback.bucket).await? {
                    info!("payer {} switched to fallback bucket '{}'", payer_id, fallback.bucket);
                    Ok(Some(fallback))
                } else {
                    error!("fallback bucket '{}' is not accessible either", fallback.bucket);
                    Ok(None)
                }
            }
            _ => {
                error!("no alternative configuration for payer {}", payer_id);
                Ok(None)
            }
        }
    }

    /// Source keys newer than the watermark, current month and (optionally)
    /// the month before. On a file name clash the current month's key wins.
    async fn scan(
        &self,
        location: &PayerLocation,
        period: BillingPeriod,
        watermarks: Option<&mut dyn WatermarkStore>,
    ) -> SyncResult<Vec<String>> {
        let since = match watermarks {
            Some(store) => store.get_last_processed(&location.payer_id).await?,
            None => None,
        };

        let current = self.list_period(location, period, since).await?;
        let previous = if self.scan_previous_month {
            self.list_period(location, period.previous(), since).await?
        } else {
            BTreeMap::new()
        };

        let mut by_name: BTreeMap<String, String> = BTreeMap::new();
        for key in current.into_keys() {
            by_name.insert(file_name(&key).to_string(), key);
        }
        for key in previous.into_keys() {
            match by_name.entry(file_name(&key).to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(key);
                }
                Entry::Occupied(slot) => warn!(
                    "late file '{}' shares its name with '{}'; keeping the current month",
                    key,
                    slot.get()
                ),
            }
        }

        let mut files: Vec<String> = by_name.into_values().collect();
        files.sort();
        Ok(files)
    }

    async fn list_period(
        &self,
        location: &PayerLocation,
        period: BillingPeriod,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<BTreeMap<String, ObjectRecord>> {
        let prefix = period.source_prefix(&location.path_prefix);
        self.store.list_objects(&location.bucket, &prefix, since).await
    }
}
