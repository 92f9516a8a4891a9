//! Notification dispatch
//!
//! Notifications are written to the store as they happen and shipped by the
//! periodic [`SendNotifications`] worker. Batching is urgency-driven: each
//! urgency level carries a minimum age, so a burst of chapter downloads
//! collapses into one message per title instead of one per chapter. A sink
//! failing never fails the worker; the batch is logged and still counts as
//! dispatched so healthy sinks never see duplicates.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::model::{Notification, Urgency};
use crate::worker::{Result as WorkResult, Work, WorkOutcome, WorkerContext, WorkerId};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("sink request failed: {0}")]
    Request(String),

    #[error("sink rejected payload: {0}")]
    Rejected(String),
}

/// One outbound notification channel (Ntfy, Gotify, Lunasea and friends).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(
        &self,
        title: &str,
        body: &str,
        urgency: Urgency,
    ) -> std::result::Result<(), NotifyError>;
}

/// Sink posting to an [ntfy](https://ntfy.sh) topic.
pub struct NtfySink {
    endpoint: String,
    topic: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl NtfySink {
    pub fn new(endpoint: String, topic: String, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            topic,
            token,
            client: reqwest::Client::new(),
        }
    }

    fn priority(urgency: Urgency) -> &'static str {
        match urgency {
            Urgency::Low => "2",
            Urgency::Normal => "3",
            Urgency::High => "4",
        }
    }
}

#[async_trait]
impl NotificationSink for NtfySink {
    fn name(&self) -> &str {
        "ntfy"
    }

    async fn send(
        &self,
        title: &str,
        body: &str,
        urgency: Urgency,
    ) -> std::result::Result<(), NotifyError> {
        let url = format!("{}/{}", self.endpoint, self.topic);
        let mut request = self
            .client
            .post(&url)
            .header("Title", title)
            .header("Priority", Self::priority(urgency))
            .body(body.to_string());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(format!(
                "{} from {}",
                response.status(),
                url
            )));
        }
        Ok(())
    }
}

/// Collapse due notifications into one message per title, bodies joined in
/// creation order.
fn batch_by_title(due: &[Notification]) -> Vec<(String, String, Urgency)> {
    let mut grouped: BTreeMap<String, (Vec<String>, Urgency)> = BTreeMap::new();
    for n in due {
        let entry = grouped
            .entry(n.title.clone())
            .or_insert_with(|| (Vec::new(), n.urgency));
        entry.0.push(n.body.clone());
        // The batch inherits the most urgent member.
        if urgency_rank(n.urgency) > urgency_rank(entry.1) {
            entry.1 = n.urgency;
        }
    }
    grouped
        .into_iter()
        .map(|(title, (bodies, urgency))| (title, bodies.join("\n"), urgency))
        .collect()
}

fn urgency_rank(u: Urgency) -> u8 {
    match u {
        Urgency::Low => 0,
        Urgency::Normal => 1,
        Urgency::High => 2,
    }
}

/// Periodic worker draining the notification queue through every sink.
pub struct SendNotifications;

#[async_trait]
impl Work for SendNotifications {
    fn id(&self) -> WorkerId {
        WorkerId::from("send-notifications")
    }

    fn label(&self) -> String {
        "send queued notifications".to_string()
    }

    async fn run(&self, ctx: &WorkerContext, _cancel: &CancellationToken) -> WorkResult<WorkOutcome> {
        let now = Utc::now();
        let due: Vec<Notification> = ctx
            .store
            .unsent_notifications()?
            .into_iter()
            .filter(|n| n.due(now))
            .collect();
        if due.is_empty() || ctx.sinks.is_empty() {
            return Ok(WorkOutcome::none());
        }

        for (title, body, urgency) in batch_by_title(&due) {
            for sink in ctx.sinks.iter() {
                if let Err(e) = sink.send(&title, &body, urgency).await {
                    warn!(sink = sink.name(), error = %e, "notification send failed");
                }
            }
        }

        // A failing sink is logged and skipped; the batch still counts as
        // dispatched so healthy sinks never see duplicates.
        for n in &due {
            ctx.store.mark_notification_sent(n.id)?;
            ctx.metrics.notification_sent();
        }
        info!(count = due.len(), "notifications dispatched");
        Ok(WorkOutcome::none())
    }
}
