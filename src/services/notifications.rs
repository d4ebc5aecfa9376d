//! Notification delivery
//!
//! Notifications are persisted by the orchestrator first; sinks only deliver
//! copies to the outside world. A failing sink is logged by the caller and
//! never changes the outcome of a run.

use crate::state::execution::Notification;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Delivery failures
#[derive(Error, Debug)]
pub enum SinkError {
    /// The HTTP request could not be sent
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The receiver answered with a non-success status
    #[error("webhook responded with status {0}")]
    Status(u16),
}

/// Destination for notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Writes notifications to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        info!(
            project_id = %notification.project_id,
            kind = ?notification.kind,
            title = %notification.title,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Publishes notifications on a broadcast channel (feeds the WebSocket)
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    /// Create a channel keeping up to `capacity` undelivered notifications
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to notifications published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        // No subscribers is not a failure
        match self.tx.send(notification.clone()) {
            Ok(receivers) => debug!(receivers, "Notification broadcast"),
            Err(_) => debug!("Notification broadcast without subscribers"),
        }
        Ok(())
    }
}

/// POSTs notifications as JSON to a webhook URL
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// Create a sink posting to `url`
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(notification).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        debug!(url = %self.url, "Notification delivered to webhook");
        Ok(())
    }
}

/// Delivers to every inner sink
///
/// All sinks are attempted; failures are logged and the first one is
/// returned.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    /// Create an empty fanout
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of inner sinks
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether there are no inner sinks
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(notification).await {
                warn!(notification_id = %notification.id, error = %e, "Notification sink failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
