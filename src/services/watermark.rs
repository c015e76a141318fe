//! Watermark Store.
//!
//! The last usage timestamp already materialized for a payer. The
//! orchestrator opens one connection before analysis and closes it before
//! the copy phase starts.

use crate::{
    errors::{SyncError, SyncResult},
    services::retry::RetryPolicy,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info, warn};

const LAST_PROCESSED_SQL: &str = "SELECT MAX(line_item_usage_start_date) \
     FROM analytics_hourly WHERE bill_payer_account_id = ?";

/// Opens the run's watermark connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatermarkConnector: Send + Sync {
    async fn connect(&self) -> SyncResult<Box<dyn WatermarkStore>>;
}

/// An open watermark connection, owned by a single caller.
#[async_trait]
pub trait WatermarkStore: Send {
    /// `None` when nothing has been materialized for the payer yet.
    async fn get_last_processed(&mut self, payer_id: &str) -> SyncResult<Option<DateTime<Utc>>>;

    async fn close(self: Box<Self>);
}

pub struct SqlWatermarkConnector {
    url: String,
    retry: RetryPolicy,
}

impl SqlWatermarkConnector {
    pub fn new(url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            retry,
        }
    }
}

#[async_trait]
impl WatermarkConnector for SqlWatermarkConnector {
    async fn connect(&self) -> SyncResult<Box<dyn WatermarkStore>> {
        let conn = self
            .retry
            .retry("watermark connect", || SqliteConnection::connect(&self.url))
            .await
            .map_err(|err| SyncError::WatermarkUnavailable(err.to_string()))?;
        info!("watermark connection established");
        Ok(Box::new(SqlWatermarkStore { conn }))
    }
}

pub struct SqlWatermarkStore {
    conn: SqliteConnection,
}

#[async_trait]
impl WatermarkStore for SqlWatermarkStore {
    async fn get_last_processed(&mut self, payer_id: &str) -> SyncResult<Option<DateTime<Utc>>> {
        let raw: Option<String> = sqlx::query_scalar(LAST_PROCESSED_SQL)
            .bind(payer_id)
            .fetch_one(&mut self.conn)
            .await?;
        let watermark = raw.as_deref().map(parse_timestamp).transpose()?;
        match watermark {
            Some(ts) => debug!("watermark for payer {} is {}", payer_id, ts),
            None => debug!("no watermark for payer {}", payer_id),
        }
        Ok(watermark)
    }

    async fn close(self: Box<Self>) {
        match self.conn.close().await {
            Ok(()) => info!("watermark connection closed"),
            Err(err) => warn!("closing watermark connection failed: {}", err),
        }
    }
}

/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS[.fff]` read as UTC.
fn parse_timestamp(raw: &str) -> SyncResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            SyncError::WatermarkUnavailable(format!("unparseable usage timestamp `{raw}`"))
        })
}
