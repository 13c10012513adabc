//! Append-only event stream
//!
//! Every component reports operator-facing progress here: the sink
//! keeps an ordered in-memory buffer for querying and pushes each
//! event over a broadcast channel so consumers (log viewer, CLI) react
//! to state changes instead of polling. Emissions are mirrored to
//! `tracing` so the structured logs carry the same stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Buffered broadcast capacity; slow subscribers that fall further
/// behind than this observe a `Lagged` error, never block the engine.
const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    System,
    FileProcessing,
    Transform,
    Database,
    Migration,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::System => "system",
            EventCategory::FileProcessing => "file_processing",
            EventCategory::Transform => "transform",
            EventCategory::Database => "database",
            EventCategory::Migration => "migration",
        }
    }
}

/// One structured event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub category: EventCategory,
    pub message: String,
    pub detail: Option<String>,
}

/// Append-only event sink shared by all components of the engine.
pub struct EventSink {
    buffer: RwLock<Vec<LogEvent>>,
    tx: broadcast::Sender<LogEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            buffer: RwLock::new(Vec::new()),
            tx,
        }
    }

    pub fn emit(
        &self,
        level: EventLevel,
        category: EventCategory,
        message: impl Into<String>,
        detail: Option<String>,
    ) {
        let event = LogEvent {
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            detail,
        };

        match level {
            EventLevel::Info | EventLevel::Success => tracing::info!(
                category = category.as_str(),
                detail = event.detail.as_deref(),
                "{}",
                event.message
            ),
            EventLevel::Warning => tracing::warn!(
                category = category.as_str(),
                detail = event.detail.as_deref(),
                "{}",
                event.message
            ),
            EventLevel::Error => tracing::error!(
                category = category.as_str(),
                detail = event.detail.as_deref(),
                "{}",
                event.message
            ),
        }

        if let Ok(mut buffer) = self.buffer.write() {
            buffer.push(event.clone());
        }
        // Send only fails when nobody subscribes, which is fine.
        let _ = self.tx.send(event);
    }

    pub fn info(&self, category: EventCategory, message: impl Into<String>) {
        self.emit(EventLevel::Info, category, message, None);
    }

    pub fn warning(&self, category: EventCategory, message: impl Into<String>) {
        self.emit(EventLevel::Warning, category, message, None);
    }

    pub fn error(&self, category: EventCategory, message: impl Into<String>) {
        self.emit(EventLevel::Error, category, message, None);
    }

    pub fn success(&self, category: EventCategory, message: impl Into<String>) {
        self.emit(EventLevel::Success, category, message, None);
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    /// Snapshot of all events emitted so far, in emission order.
    pub fn events(&self) -> Vec<LogEvent> {
        self.buffer.read().map(|b| b.clone()).unwrap_or_default()
    }

    /// Count of events matching a level, for tests and summaries.
    pub fn count_level(&self, level: EventLevel) -> usize {
        self.buffer
            .read()
            .map(|b| b.iter().filter(|e| e.level == level).count())
            .unwrap_or(0)
    }
}
