// notify.rs — Notification Sink: the engine emits structured
// events, the sink formats and delivers them. An HTTP webhook POST
// (opaque URL or '') is the destination-agnostic wire contract, with a
// log-only sink as the fallback when no webhook is configured.

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Close,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationFields {
    pub account: Option<String>,
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub size: Option<f64>,
    pub price: Option<f64>,
    pub leverage: Option<u32>,
    pub pnl: Option<f64>,
    pub reason: Option<String>,
    pub twap_progress: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    pub fields: NotificationFields,
}

impl Notification {
    pub fn success(title: impl Into<String>, body: impl Into<String>, fields: NotificationFields) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            kind: NotificationKind::Success,
            fields,
        }
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>, fields: NotificationFields) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            kind: NotificationKind::Error,
            fields,
        }
    }

    pub fn close(title: impl Into<String>, body: impl Into<String>, fields: NotificationFields) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            kind: NotificationKind::Close,
            fields,
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification);
}

/// Delivers notifications via an HTTP POST of the JSON payload, the way
/// `MmStatusPublisher::publish_status` pushes a JSON heartbeat — here
/// over `reqwest` instead of Redis, since the wire contract is a plain
/// webhook URL rather than a pub/sub channel.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, notification: &Notification) {
        if let Err(e) = self.client.post(&self.url).json(notification).send().await {
            log::warn!("[NOTIFY] webhook delivery failed for '{}': {}", notification.title, e);
        }
    }
}

/// Fallback for accounts with no configured webhook: just logs.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) {
        match notification.kind {
            NotificationKind::Error => {
                log::warn!("[NOTIFY] {}: {}", notification.title, notification.body)
            }
            _ => log::info!("[NOTIFY] {}: {}", notification.title, notification.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_sink_does_not_panic_on_any_kind() {
        let sink = LogSink;
        sink.deliver(&Notification::success("ok", "body", NotificationFields::default()))
            .await;
        sink.deliver(&Notification::error("bad", "body", NotificationFields::default()))
            .await;
        sink.deliver(&Notification::close("closed", "body", NotificationFields::default()))
            .await;
    }
}
