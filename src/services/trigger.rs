//! Downstream materialization trigger.
//!
//! Makes the staged files queryable. The run is only a success once this
//! step has returned `Ok`.

use crate::{
    errors::{SyncError, SyncResult},
    models::{BillingPeriod, StagingLayout},
};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MaterializationRequest {
    pub environment: String,
    pub module: String,
    pub app: String,
    pub year: i32,
    pub month: u32,
    pub staging_bucket: String,
    pub stage_url: String,
    pub table_name: String,
    pub storage_integration: String,
    /// Payers whose files were copied in this run.
    pub payer_ids: Vec<String>,
}

impl MaterializationRequest {
    pub fn new(
        layout: &StagingLayout,
        period: BillingPeriod,
        storage_integration: &str,
        payer_ids: Vec<String>,
    ) -> Self {
        Self {
            environment: layout.environment.clone(),
            module: layout.module.clone(),
            app: layout.app.clone(),
            year: period.year,
            month: period.month,
            staging_bucket: layout.bucket.clone(),
            stage_url: layout.stage_url(period),
            table_name: format!(
                "{}_application_table_{}_{}",
                layout.module, period.year, period.month
            ),
            storage_integration: storage_integration.to_string(),
            payer_ids,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DownstreamTrigger: Send + Sync {
    async fn materialize(&self, request: &MaterializationRequest) -> SyncResult<()>;
}

/// POSTs the request as JSON to a materialization service.
pub struct HttpTrigger {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTrigger {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl DownstreamTrigger for HttpTrigger {
    #[instrument(skip(self, request), fields(table = %request.table_name))]
    async fn materialize(&self, request: &MaterializationRequest) -> SyncResult<()> {
        info!(
            "requesting materialization of {} for {} payers",
            request.stage_url,
            request.payer_ids.len()
        );
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|err| SyncError::Downstream(format!("request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Downstream(format!(
                "materialization service answered {status}: {body}"
            )));
        }
        info!("materialization of {} completed", request.table_name);
        Ok(())
    }
}

/// Used when no materialization endpoint is configured.
pub struct DisabledTrigger;

#[async_trait]
impl DownstreamTrigger for DisabledTrigger {
    async fn materialize(&self, request: &MaterializationRequest) -> SyncResult<()> {
        warn!(
            "materialization is not configured; skipping table {} for {}",
            request.table_name, request.stage_url
        );
        Ok(())
    }
}
