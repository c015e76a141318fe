//! Notification view of a finished run.

use crate::models::params::RunParams;
use crate::models::task::{CopySummary, TaskResult, TaskStatus};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Coarse outcome reported to external consumers.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failed => "Failed",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub environment: String,
    pub outcome: Outcome,
    pub reason: String,
    pub details: String,
    /// `None` when the run failed before its parameters were resolved.
    pub params: Option<RunParams>,
    pub summary: Option<CopySummary>,
    pub exit_code: i32,
}

impl RunReport {
    pub fn from_result(run_id: Uuid, params: &RunParams, result: &TaskResult) -> Self {
        let summary = result.copy_summary;
        let (outcome, reason, mut details) = match result.status {
            TaskStatus::Success => (
                Outcome::Success,
                "ProcessingComplete",
                format!("Task finished successfully. Copied {} files.", summary.success),
            ),
            TaskStatus::UpToDate => (
                Outcome::Success,
                "AlreadySynchronized",
                "Task finished successfully, all valid payers were already up-to-date."
                    .to_string(),
            ),
            TaskStatus::Failed => (
                Outcome::Failed,
                "ProcessingFailure",
                format!(
                    "Processing failed. Copied {}/{} files.",
                    summary.success, summary.total
                ),
            ),
        };
        if !result.failed_payers.is_empty() {
            details.push_str(&format!(
                " Payers that failed analysis: {:?}",
                result.failed_payers
            ));
        }
        if !result.skipped_payers.is_empty() {
            details.push_str(&format!(
                " Payers skipped after destination clean-up failed: {:?}",
                result.skipped_payers
            ));
        }

        Self {
            run_id,
            environment: params.environment.clone(),
            outcome,
            reason: reason.to_string(),
            details,
            params: Some(params.clone()),
            summary: Some(summary),
            exit_code: result.status.exit_code(),
        }
    }

    /// Report for a run aborted by an unexpected error.
    pub fn fatal(
        run_id: Uuid,
        environment: &str,
        params: Option<&RunParams>,
        reason: &str,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            run_id,
            environment: environment.to_string(),
            outcome: Outcome::Failed,
            reason: reason.to_string(),
            details: format!("Fatal error: {error}"),
            params: params.cloned(),
            summary: None,
            exit_code: 1,
        }
    }
}
