//! Records passed between the analysis, copy and reporting phases.

use crate::models::{object::file_name, period::BillingPeriod};
use serde::{Deserialize, Serialize};

/// Naming convention of the staging bucket.
///
/// Every payer gets its own prefix, so destination keys of different payers
/// never collide within a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagingLayout {
    pub bucket: String,
    pub app: String,
    pub module: String,
    pub environment: String,
}

impl StagingLayout {
    /// `<app>/<module>/<env>/year=<y>/month=<m>/`
    pub fn period_prefix(&self, period: BillingPeriod) -> String {
        format!(
            "{}/{}/{}/year={}/month={}/",
            self.app, self.module, self.environment, period.year, period.month
        )
    }

    /// `<period prefix>payer-<payer_id>/`
    pub fn payer_prefix(&self, period: BillingPeriod, payer_id: &str) -> String {
        format!("{}payer-{}/", self.period_prefix(period), payer_id)
    }

    /// Location handed to the downstream materialization step.
    pub fn stage_url(&self, period: BillingPeriod) -> String {
        format!("s3://{}/{}", self.bucket, self.period_prefix(period))
    }
}

/// One server-side copy. Re-running it overwrites the same destination key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CopyTask {
    pub source_bucket: String,
    pub source_key: String,
    pub dest_bucket: String,
    pub dest_key: String,
}

impl CopyTask {
    pub fn new(
        source_bucket: impl Into<String>,
        source_key: impl Into<String>,
        dest_bucket: impl Into<String>,
        dest_key: impl Into<String>,
    ) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            source_key: source_key.into(),
            dest_bucket: dest_bucket.into(),
            dest_key: dest_key.into(),
        }
    }

    /// Task staging `source_key` under a payer's destination prefix.
    pub fn staged(
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_prefix: &str,
    ) -> Self {
        Self::new(
            source_bucket,
            source_key,
            dest_bucket,
            format!("{}{}", dest_prefix, file_name(source_key)),
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    HasNewFiles,
    UpToDate,
    Failed,
}

/// Outcome of analysing one payer for one run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PayerAnalysisResult {
    pub payer_id: String,
    pub status: AnalysisStatus,
    /// Source keys to copy; empty unless `status` is `HasNewFiles`.
    pub files_to_copy: Vec<String>,
    /// Bucket the keys were listed from (after any fallback).
    pub source_bucket: Option<String>,
    /// Why analysis failed, when it did.
    pub failure: Option<String>,
}

impl PayerAnalysisResult {
    pub fn found(payer_id: &str, source_bucket: &str, files_to_copy: Vec<String>) -> Self {
        let status = if files_to_copy.is_empty() {
            AnalysisStatus::UpToDate
        } else {
            AnalysisStatus::HasNewFiles
        };
        Self {
            payer_id: payer_id.to_string(),
            status,
            files_to_copy,
            source_bucket: Some(source_bucket.to_string()),
            failure: None,
        }
    }

    pub fn failed(payer_id: &str, reason: impl Into<String>) -> Self {
        Self {
            payer_id: payer_id.to_string(),
            status: AnalysisStatus::Failed,
            files_to_copy: Vec::new(),
            source_bucket: None,
            failure: Some(reason.into()),
        }
    }

    /// Copy tasks for this payer. Failed or up-to-date payers yield none.
    pub fn copy_tasks(&self, dest_bucket: &str, dest_prefix: &str) -> Vec<CopyTask> {
        match (&self.status, &self.source_bucket) {
            (AnalysisStatus::HasNewFiles, Some(source_bucket)) => self
                .files_to_copy
                .iter()
                .map(|key| CopyTask::staged(source_bucket, key, dest_bucket, dest_prefix))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Totals of one copy phase.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopySummary {
    pub success: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    UpToDate,
    Failed,
}

impl TaskStatus {
    /// Process exit code for a run ending in this status.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Failed => 1,
            Self::Success | Self::UpToDate => 0,
        }
    }
}

/// Terminal output of one orchestration run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub copy_summary: CopySummary,
    /// Payers whose analysis failed.
    pub failed_payers: Vec<String>,
    /// Payers with new files that were left out because their destination
    /// could not be cleared.
    pub skipped_payers: Vec<String>,
    /// Payers whose files were copied and handed downstream.
    pub copied_payers: Vec<String>,
}

impl TaskResult {
    pub fn up_to_date(failed_payers: Vec<String>) -> Self {
        Self {
            status: TaskStatus::UpToDate,
            copy_summary: CopySummary::default(),
            failed_payers,
            skipped_payers: Vec::new(),
            copied_payers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> StagingLayout {
        StagingLayout {
            bucket: "staging".into(),
            app: "app".into(),
            module: "analytics".into(),
            environment: "uat".into(),
        }
    }

    #[test]
    fn destination_prefix_embeds_payer_and_unpadded_month() {
        let period = BillingPeriod::new(2025, 6).unwrap();
        assert_eq!(
            layout().payer_prefix(period, "111111111111"),
            "app/analytics/uat/year=2025/month=6/payer-111111111111/"
        );
        assert_eq!(
            layout().stage_url(period),
            "s3://staging/app/analytics/uat/year=2025/month=6/"
        );
    }

    #[test]
    fn staged_task_keeps_only_file_name() {
        let task = CopyTask::staged("src", "a/b/BILLING_PERIOD=2025-06/part-0.parquet", "dst", "p/");
        assert_eq!(task.dest_key, "p/part-0.parquet");
        assert_eq!(task.source_key, "a/b/BILLING_PERIOD=2025-06/part-0.parquet");
    }

    #[test]
    fn failed_analysis_yields_no_tasks() {
        let result = PayerAnalysisResult::failed("1", "no configuration");
        assert!(result.copy_tasks("dst", "p/").is_empty());

        let found = PayerAnalysisResult::found("2", "src", vec!["x/1.csv".into()]);
        assert_eq!(found.status, AnalysisStatus::HasNewFiles);
        assert_eq!(found.copy_tasks("dst", "p/").len(), 1);

        let empty = PayerAnalysisResult::found("3", "src", Vec::new());
        assert_eq!(empty.status, AnalysisStatus::UpToDate);
    }

    #[test]
    fn only_failed_status_exits_non_zero() {
        assert_eq!(TaskStatus::Success.exit_code(), 0);
        assert_eq!(TaskStatus::UpToDate.exit_code(), 0);
        assert_eq!(TaskStatus::Failed.exit_code(), 1);
    }
}
