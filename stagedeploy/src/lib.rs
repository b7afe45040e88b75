//! # Stagedeploy
//!
//! A staged, resumable deployment orchestration engine.
//!
//! Stagedeploy sequences multi-step infrastructure provisioning with
//! support for:
//!
//! - **Persisted progress**: every successful stage is recorded, so a failed
//!   or interrupted run resumes at the stage that did not finish
//! - **Configuration recall**: resumed runs reuse the stored configuration
//!   for anything the operator did not set explicitly
//! - **Conflict detection**: leftover stacks and parameters are found (and
//!   deleting stacks waited out) before anything is mutated
//! - **Comprehensive cleanup**: versioned buckets, parameters and stacks are
//!   removed with an aggregate report instead of stopping at the first error
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagedeploy::prelude::*;
//!
//! let registry = StageRegistry::new(vec![
//!     Arc::new(PreflightStage::new()),
//!     Arc::new(FnStage::new("Deploy infrastructure stack", |ctx| {
//!         Box::pin(async move { deploy(ctx).await })
//!     })),
//! ])?;
//! let store = Arc::new(FileProgressStore::new(".stagedeploy-progress"));
//! let orchestrator = Orchestrator::new(registry, store);
//!
//! let report = orchestrator.run(&ctx, start_stage).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod cleanup;
pub mod config;
pub mod conflict;
pub mod errors;
pub mod events;
pub mod monitor;
pub mod namespace;
pub mod orchestrator;
pub mod polling;
pub mod ports;
pub mod progress;
pub mod prompt;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::cleanup::{CleanupManager, CleanupResult, ResourceClass};
    pub use crate::config::{
        ConfigResolver, Configuration, DeploySettings, FeatureToggles, InvocationConfig,
    };
    pub use crate::conflict::{Conflict, ConflictDetector, ConflictReport};
    pub use crate::errors::{DeployError, ProgressError, Result};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::monitor::{MonitorOutcome, PipelineMonitor};
    pub use crate::namespace::ResourceNamespace;
    pub use crate::orchestrator::{Orchestrator, OrchestratorState, RunReport, StageRegistry};
    pub use crate::polling::{poll_until, PollOutcome, PollPolicy};
    pub use crate::ports::{CloudProvider, ProviderError, ProviderResult, StackStatus};
    pub use crate::progress::{FileProgressStore, ProgressRecord, ProgressStore};
    pub use crate::prompt::{AutoConfirm, Confirm, DenyAll};
    pub use crate::stages::{FnStage, PreflightStage, Stage, StageContext};
    pub use crate::utils::{iso_timestamp, Timestamp};
    pub use std::sync::Arc;
}
