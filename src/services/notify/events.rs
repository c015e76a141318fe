//! Task-completion event on the `billing_sync::events` log target.

use crate::{errors::SyncResult, models::RunReport, services::notify::NotificationSink};
use async_trait::async_trait;
use tracing::info;

pub const EVENT_TARGET: &str = "billing_sync::events";

#[derive(Debug, Default, Clone, Copy)]
pub struct CompletionEventSink;

#[async_trait]
impl NotificationSink for CompletionEventSink {
    fn name(&self) -> &'static str {
        "completion-event"
    }

    async fn notify(&self, report: &RunReport) -> SyncResult<()> {
        let (module, period, payers) = match &report.params {
            Some(p) => (p.module.as_str(), p.period.to_string(), p.unique_payer_ids().len()),
            None => ("unknown", "unknown".to_string(), 0),
        };
        let (copied, failed) = report
            .summary
            .map(|s| (s.success, s.failed))
            .unwrap_or_default();

        info!(
            target: "billing_sync::events",
            run_id = %report.run_id,
            status = %report.outcome,
            reason = %report.reason,
            environment = %report.environment,
            module,
            period = %period,
            payers,
            copied,
            failed,
            exit_code = report.exit_code,
            "task completed"
        );
        Ok(())
    }
}
