//! Human-readable chat alert posted to an incoming webhook.

use crate::{
    errors::{SyncError, SyncResult},
    models::RunReport,
    services::{notify::NotificationSink, payer_directory::PRODUCTION_ENVIRONMENT},
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{info, warn};

/// Webhook URLs by destination channel.
#[derive(Debug, Clone, Default)]
pub struct SlackWebhooks {
    pub prod_success: Option<String>,
    pub prod_failure: Option<String>,
    pub non_prod: Option<String>,
}

impl SlackWebhooks {
    /// Production splits success and failure; everything else shares one.
    pub fn for_report(&self, report: &RunReport) -> Option<&str> {
        let url = if report.environment == PRODUCTION_ENVIRONMENT {
            if report.outcome.is_success() {
                &self.prod_success
            } else {
                &self.prod_failure
            }
        } else {
            &self.non_prod
        };
        url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

pub struct SlackNotifier {
    client: reqwest::Client,
    webhooks: SlackWebhooks,
}

impl SlackNotifier {
    pub fn new(webhooks: SlackWebhooks, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, webhooks })
    }
}

/// Block-formatted alert body.
pub fn format_message(report: &RunReport) -> Value {
    let success = report.outcome.is_success();
    let icon = if success { ":white_check_mark:" } else { ":x:" };
    let color = if success { "#36a64f" } else { "#d50200" };
    let environment = report.environment.to_uppercase();

    let (module, period, payer_count) = match &report.params {
        Some(p) => (p.module.clone(), p.period.to_string(), p.unique_payer_ids().len()),
        None => ("N/A".to_string(), "N/A".to_string(), 0),
    };
    let title = format!(
        "{icon} Billing sync: *{}* in *{environment}*",
        report.outcome.as_str().to_uppercase()
    );
    let body = format!(
        "*Environment:* `{environment}`\n*Module:* `{module}`\n*Period:* `{period}`\n\
         *Payer Count:* `{payer_count}`\n\n*Details:*\n```{}```",
        report.details
    );

    json!({
        "attachments": [{
            "color": color,
            "blocks": [
                { "type": "header", "text": { "type": "plain_text", "text": title, "emoji": true } },
                { "type": "divider" },
                { "type": "section", "text": { "type": "mrkdwn", "text": body } }
            ]
        }]
    })
}

#[async_trait]
impl NotificationSink for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, report: &RunReport) -> SyncResult<()> {
        let Some(url) = self.webhooks.for_report(report) else {
            warn!(
                "no chat webhook configured for {} {}; skipping",
                report.environment, report.outcome
            );
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&format_message(report))
            .send()
            .await
            .map_err(|err| SyncError::notification("slack", err))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::notification(
                "slack",
                format!("webhook answered {status}: {text}"),
            ));
        }
        info!("chat alert delivered");
        Ok(())
    }
}
