//! Parallel Copy Engine.
//!
//! Clears each payer's destination prefix, then fans the surviving copy
//! tasks out over a bounded pool. A task submission waits for a free slot
//! once `max_workers` copies are in flight.

use crate::{
    models::{CopySummary, CopyTask},
    services::object_store::ObjectStore,
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{error, info, warn};

pub const DEFAULT_MAX_WORKERS: usize = 100;
pub const DEFAULT_PROGRESS_EVERY: usize = 250;

/// All copy tasks of one payer, staged under `dest_prefix`.
#[derive(Debug, Clone)]
pub struct PayerCopyBatch {
    pub payer_id: String,
    pub dest_prefix: String,
    pub tasks: Vec<CopyTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOutcome {
    pub summary: CopySummary,
    /// Payers whose tasks were submitted.
    pub copied_payers: Vec<String>,
    /// Payers left out because their destination could not be cleared.
    pub dropped_payers: Vec<String>,
}

#[derive(Clone)]
pub struct CopyEngine {
    store: Arc<dyn ObjectStore>,
    max_workers: usize,
    progress_every: usize,
}

impl CopyEngine {
    pub fn new(store: Arc<dyn ObjectStore>, max_workers: usize) -> Self {
        Self {
            store,
            max_workers: max_workers.max(1),
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every.max(1);
        self
    }

    /// Clear every payer's destination prefix, then copy the tasks of the
    /// payers that were cleared.
    pub async fn run(&self, dest_bucket: &str, batches: Vec<PayerCopyBatch>) -> CopyOutcome {
        let mut outcome = CopyOutcome::default();
        let mut tasks = Vec::new();

        for batch in batches {
            info!(
                "clearing s3://{}/{} for payer {}",
                dest_bucket, batch.dest_prefix, batch.payer_id
            );
            if self.store.delete_by_prefix(dest_bucket, &batch.dest_prefix).await {
                outcome.copied_payers.push(batch.payer_id);
                tasks.extend(batch.tasks);
            } else {
                error!(
                    "could not clear destination for payer {}; dropping its {} files",
                    batch.payer_id,
                    batch.tasks.len()
                );
                outcome.dropped_payers.push(batch.payer_id);
            }
        }

        outcome.summary = self.execute(tasks).await;
        outcome
    }

    /// Run every task to completion; never returns early.
    pub async fn execute(&self, tasks: Vec<CopyTask>) -> CopySummary {
        let total = tasks.len();
        if total == 0 {
            info!("no files to copy");
            return CopySummary::default();
        }
        info!(
            "starting parallel copy of {} files with {} workers",
            total, self.max_workers
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let success = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let progress_every = self.progress_every;
        let mut workers = JoinSet::new();

        for task in tasks {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    error!("copy pool closed before {} could start: {}", task.source_key, err);
                    failed.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
            };
            let store = self.store.clone();
            let success = success.clone();
            let failed = failed.clone();
            let completed = completed.clone();

            workers.spawn(async move {
                let _permit = permit;
                if store.copy_object(&task).await {
                    success.fetch_add(1, Ordering::SeqCst);
                } else {
                    failed.fetch_add(1, Ordering::SeqCst);
                }
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if done % progress_every == 0 || done == total {
                    info!(
                        "copy progress: {}/{} done ({} ok, {} failed)",
                        done,
                        total,
                        success.load(Ordering::SeqCst),
                        failed.load(Ordering::SeqCst)
                    );
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!("copy worker aborted: {}", err);
                failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        let summary = CopySummary {
            success: success.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
            total,
        };
        if summary.failed > 0 {
            warn!(
                "copy finished with failures: {}/{} copied, {} failed",
                summary.success, summary.total, summary.failed
            );
        } else {
            info!("copy finished: {}/{} copied", summary.success, summary.total);
        }
        summary
    }
}
