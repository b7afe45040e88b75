//! Where orchestrator lifecycle events go.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, Level};

/// Receives orchestrator lifecycle events.
///
/// `data` carries at least `stage` and `stage_name` for the `stage.*`
/// events; failures add `error` and `resume_command`.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Records one event. Must never fail.
    async fn emit(&self, event_type: &str, data: Option<Value>);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Turns events into `tracing` records.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::DEBUG }
    }
}

impl LoggingEventSink {
    /// Logs at `INFO` when `level` is `INFO` or more severe, else at `DEBUG`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        let field = |key: &str| data.as_ref().and_then(|d| d.get(key)).cloned();
        let stage = field("stage").and_then(|v| v.as_u64());
        let stage_name = field("stage_name");

        if self.level <= Level::INFO {
            info!(event = event_type, stage, stage_name = ?stage_name, data = ?data, "Lifecycle event");
        } else {
            debug!(event = event_type, stage, stage_name = ?stage_name, data = ?data, "Lifecycle event");
        }
    }
}

type Recorded = (String, Option<Value>);

/// Keeps every event in memory so tests can assert on the sequence.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<Recorded>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event, in emission order.
    pub fn events(&self) -> Vec<Recorded> {
        self.events.read().clone()
    }

    /// Event types, in emission order.
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Number of events seen.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was emitted.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events whose type starts with `type_prefix`.
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<Recorded> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}
