//! Shared deterministic types for the delivery loop.
//!
//! These types define stable contracts between the backlog store, the loop
//! manager and the provider backends. They carry no I/O.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One prioritized unit of work ("user story") in a backlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    /// Lower is more urgent. Must be >= 1.
    pub priority: i64,
    /// The item is complete.
    pub passes: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub in_progress: bool,
}

/// A project backlog. Items are kept in insertion order, not priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backlog {
    pub project: String,
    pub description: String,
    #[serde(rename = "userStories")]
    pub items: Vec<WorkItem>,
}

impl Backlog {
    pub fn count_complete(&self) -> usize {
        self.items.iter().filter(|item| item.passes).count()
    }

    pub fn count_in_progress(&self) -> usize {
        self.items.iter().filter(|item| item.in_progress).count()
    }
}

/// Everything a provider needs to run one delivery iteration.
///
/// Built once per loop call and replayed unchanged on every retry attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationRequest {
    pub work_dir: PathBuf,
    pub prompt: String,
    pub context_files: Vec<PathBuf>,
    pub approval_policy: String,
    pub sandbox_policy: String,
    pub model: String,
    pub metadata: BTreeMap<String, String>,
}

/// Normalized outcome of a successful provider invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationResult {
    pub success: bool,
    pub summary: String,
    pub provider_run_id: Option<String>,
}

/// Kinds of progress events a streaming backend may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    IterationStarted,
    AssistantText,
    ToolStarted,
    ToolFinished,
    CommandOutput,
    IterationFinished,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub message: String,
}

/// Capability descriptor a backend declares about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub streaming: bool,
    pub tool_calls: bool,
    pub sandbox_control: bool,
    pub approval_modes: Vec<String>,
    pub max_context_hint: Option<usize>,
}
