//! Test doubles for stagedeploy.
//!
//! This module provides:
//! - [`InMemoryCloud`], a fake implementing every port with failure injection
//! - [`ScriptedConfirm`], an operator that answers from a script, and
//!   [`PendingConfirm`], one that never answers
//! - Recording, failing and pending stages

mod cloud;
mod confirm;
mod mocks;

pub use cloud::InMemoryCloud;
pub use confirm::{PendingConfirm, ScriptedConfirm};
pub use mocks::{FailingStage, PendingStage, RecordingStage, StageLog};
