//! Lifecycle events emitted by the orchestrator.
//!
//! Event types used by the engine:
//! `pipeline.started`, `stage.started`, `stage.completed`, `stage.skipped`,
//! `stage.failed`, `pipeline.interrupted`, `pipeline.completed`.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
