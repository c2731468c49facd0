//! Application-level orchestration.
//!
//! This module owns the session state machine (connect, search, process) and the background
//! tasks that drive it. UI/CLI layers send [`UiCommand`]s in and receive `AppEvent`s back,
//! so neither presentation layer talks to the archive or the ICF tools directly.

mod controller;
mod session;
mod tasks;
mod workflow;

#[cfg(test)]
mod fakes;

pub(crate) use controller::{run_controller, Orchestrator, UiCommand};
