use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::traits::LogSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
    Info,
}

/// An execution trace entry emitted by logic and integration steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub status: LogStatus,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(status: LogStatus, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn success(description: impl Into<String>) -> Self {
        Self::new(LogStatus::Success, description)
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self::new(LogStatus::Error, description)
    }

    pub fn info(description: impl Into<String>) -> Self {
        Self::new(LogStatus::Info, description)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Forwards entries to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn on_new_log(&self, entry: LogEntry) {
        let details = entry.details.as_deref().unwrap_or("");
        match entry.status {
            LogStatus::Error => error!(details, "{}", entry.description),
            LogStatus::Success | LogStatus::Info => info!(details, "{}", entry.description),
        }
    }
}

/// Sends entries over an unbounded channel. Never blocks.
#[derive(Debug, Clone)]
pub struct ChannelLogSink {
    tx: mpsc::UnboundedSender<LogEntry>,
}

impl ChannelLogSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LogSink for ChannelLogSink {
    fn on_new_log(&self, entry: LogEntry) {
        // Ignore error if no receiver
        let _ = self.tx.send(entry);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn on_new_log(&self, _entry: LogEntry) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_entries() {
        let (sink, mut rx) = ChannelLogSink::new();
        sink.on_new_log(LogEntry::success("Webhook executed").with_details("200"));
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.status, LogStatus::Success);
        assert_eq!(entry.details.as_deref(), Some("200"));
    }

    #[test]
    fn channel_sink_without_receiver_does_not_panic() {
        let (sink, rx) = ChannelLogSink::new();
        drop(rx);
        sink.on_new_log(LogEntry::error("lost"));
    }
}
