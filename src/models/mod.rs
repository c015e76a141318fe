//! Data model of a sync run.
//!
//! Plain records with fixed shapes: the analysis phase produces
//! `PayerAnalysisResult`s, the copy phase consumes `CopyTask`s and produces a
//! `CopySummary`, and the orchestrator ends with a `TaskResult`.

pub mod object;
pub mod params;
pub mod payer;
pub mod period;
pub mod report;
pub mod task;

pub use object::ObjectRecord;
pub use params::RunParams;
pub use payer::{AccessMode, PayerLocation};
pub use period::BillingPeriod;
pub use report::{Outcome, RunReport};
pub use task::{
    AnalysisStatus, CopySummary, CopyTask, PayerAnalysisResult, StagingLayout, TaskResult,
    TaskStatus,
};
