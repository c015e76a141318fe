//! Post-run notification sinks.
//!
//! Sinks only run once the terminal status is known, and none of them can
//! change it: every failure is logged and dropped.

pub mod events;
pub mod slack;
pub mod topic;

use crate::{errors::SyncResult, models::RunReport};
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, info};

pub use events::CompletionEventSink;
pub use slack::{SlackNotifier, SlackWebhooks};
pub use topic::{TopicMessage, TopicNotifier, TopicSettings};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, report: &RunReport) -> SyncResult<()>;
}

/// Deliver `report` to every sink concurrently. Returns how many succeeded.
pub async fn dispatch(sinks: &[Box<dyn NotificationSink>], report: &RunReport) -> usize {
    let results = join_all(sinks.iter().map(|sink| async move {
        (sink.name(), sink.notify(report).await)
    }))
    .await;

    let mut delivered = 0;
    for (name, result) in results {
        match result {
            Ok(()) => {
                delivered += 1;
                info!("notification sent via {}", name);
            }
            Err(err) => error!("notification via {} failed: {}", name, err),
        }
    }
    delivered
}
