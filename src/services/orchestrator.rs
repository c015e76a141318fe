//! Orchestrator: analyse every payer, copy what is new, trigger
//! materialization, and settle on one terminal status.

use crate::{
    models::{AnalysisStatus, RunParams, StagingLayout, TaskResult, TaskStatus},
    services::{
        analyzer::SyncAnalyzer,
        copy_engine::{CopyEngine, DEFAULT_MAX_WORKERS, DEFAULT_PROGRESS_EVERY, PayerCopyBatch},
        object_store::ObjectStore,
        payer_directory::PayerDirectory,
        trigger::{DownstreamTrigger, MaterializationRequest},
        watermark::{WatermarkConnector, WatermarkStore},
    },
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub staging_bucket: String,
    pub max_copy_workers: usize,
    pub progress_every: usize,
    pub scan_previous_month: bool,
    /// Passed through to the materialization request.
    pub storage_integration: String,
}

impl SyncSettings {
    pub fn new(staging_bucket: impl Into<String>, storage_integration: impl Into<String>) -> Self {
        Self {
            staging_bucket: staging_bucket.into(),
            max_copy_workers: DEFAULT_MAX_WORKERS,
            progress_every: DEFAULT_PROGRESS_EVERY,
            scan_previous_month: true,
            storage_integration: storage_integration.into(),
        }
    }
}

pub struct Orchestrator {
    settings: SyncSettings,
    analyzer: SyncAnalyzer,
    engine: CopyEngine,
    watermarks: Option<Arc<dyn WatermarkConnector>>,
    trigger: Arc<dyn DownstreamTrigger>,
}

impl Orchestrator {
    pub fn new(
        settings: SyncSettings,
        store: Arc<dyn ObjectStore>,
        directory: Arc<PayerDirectory>,
        watermarks: Option<Arc<dyn WatermarkConnector>>,
        trigger: Arc<dyn DownstreamTrigger>,
    ) -> Self {
        let analyzer = SyncAnalyzer::new(store.clone(), directory, settings.scan_previous_month);
        let engine = CopyEngine::new(store, settings.max_copy_workers)
            .with_progress_every(settings.progress_every);
        Self {
            settings,
            analyzer,
            engine,
            watermarks,
            trigger,
        }
    }

    #[instrument(skip_all, fields(period = %params.period, environment = %params.environment))]
    pub async fn run(&self, params: &RunParams) -> TaskResult {
        let payers = params.unique_payer_ids();
        if params.has_duplicates() {
            warn!(
                "duplicate payer ids collapsed: {} requested, {} unique",
                params.requested_payer_ids.len(),
                payers.len()
            );
        }
        let period = params.period;
        let layout = StagingLayout {
            bucket: self.settings.staging_bucket.clone(),
            app: params.app.clone(),
            module: params.module.clone(),
            environment: params.environment.clone(),
        };

        info!("analysing {} payers for {}", payers.len(), period);
        let mut watermark_store = self.open_watermarks().await;
        let mut results = Vec::with_capacity(payers.len());
        for payer_id in &payers {
            let watermarks: Option<&mut dyn WatermarkStore> = match watermark_store.as_mut() {
                Some(store) => Some(&mut **store),
                None => None,
            };
            results.push(self.analyzer.analyze(payer_id, period, watermarks).await);
        }
        if let Some(store) = watermark_store {
            store.close().await;
        }

        let failed_payers: Vec<String> = results
            .iter()
            .filter(|r| r.status == AnalysisStatus::Failed)
            .map(|r| r.payer_id.clone())
            .collect();
        if !failed_payers.is_empty() {
            warn!("payers that failed analysis: {:?}", failed_payers);
        }

        let batches: Vec<PayerCopyBatch> = results
            .iter()
            .filter(|r| r.status == AnalysisStatus::HasNewFiles)
            .map(|r| {
                let dest_prefix = layout.payer_prefix(period, &r.payer_id);
                PayerCopyBatch {
                    payer_id: r.payer_id.clone(),
                    tasks: r.copy_tasks(&layout.bucket, &dest_prefix),
                    dest_prefix,
                }
            })
            .collect();
        if batches.is_empty() {
            info!("no payer has new files; nothing to copy");
            return TaskResult::up_to_date(failed_payers);
        }

        let outcome = self.engine.run(&layout.bucket, batches).await;
        let mut result = TaskResult {
            status: TaskStatus::Failed,
            copy_summary: outcome.summary,
            failed_payers,
            skipped_payers: outcome.dropped_payers,
            copied_payers: outcome.copied_payers,
        };

        if result.copy_summary.failed > 0 {
            error!(
                "{} of {} copies failed; skipping materialization",
                result.copy_summary.failed, result.copy_summary.total
            );
            return result;
        }
        if !result.skipped_payers.is_empty() {
            warn!(
                "payers dropped at clean-up, not materialized: {:?}",
                result.skipped_payers
            );
        }

        let request = MaterializationRequest::new(
            &layout,
            period,
            &self.settings.storage_integration,
            result.copied_payers.clone(),
        );
        match self.trigger.materialize(&request).await {
            Ok(()) => {
                info!("materialization of {} succeeded", request.table_name);
                result.status = TaskStatus::Success;
            }
            Err(err) => {
                error!("materialization failed, run is marked failed: {}", err);
            }
        }
        result
    }

    /// One connection for the whole analysis phase; `None` means every
    /// payer is scanned in full.
    async fn open_watermarks(&self) -> Option<Box<dyn WatermarkStore>> {
        let Some(connector) = &self.watermarks else {
            warn!("no watermark store configured; scanning all files");
            return None;
        };
        match connector.connect().await {
            Ok(store) => Some(store),
            Err(err) => {
                warn!(
                    "watermark store unavailable, falling back to a full re-scan: {}",
                    err
                );
                None
            }
        }
    }
}
