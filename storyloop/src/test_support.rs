//! Test-only builders for backlogs plus scripted stores and providers.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::types::{Backlog, Capabilities, IterationRequest, WorkItem};
use crate::io::backlog_store::BacklogStore;
use crate::provider::{ErrorCategory, Invocation, Provider, ProviderError};

/// Create a deterministic work item with explicit `passes`.
pub fn item(id: &str, priority: i64, passes: bool) -> WorkItem {
    WorkItem {
        id: id.to_string(),
        title: format!("{id} title"),
        description: format!("{id} description"),
        acceptance_criteria: vec![format!("{id} works")],
        priority,
        passes,
        in_progress: false,
    }
}

/// Create an incomplete item already marked in progress.
pub fn item_in_progress(id: &str, priority: i64) -> WorkItem {
    WorkItem {
        in_progress: true,
        ..item(id, priority, false)
    }
}

pub fn backlog(items: Vec<WorkItem>) -> Backlog {
    Backlog {
        project: "demo".to_string(),
        description: "demo backlog".to_string(),
        items,
    }
}

/// In-memory store holding a single backlog (or a load failure).
pub struct MemoryStore {
    backlog: Option<Backlog>,
    loads: AtomicUsize,
}

impl MemoryStore {
    pub fn new(backlog: Backlog) -> Self {
        Self {
            backlog: Some(backlog),
            loads: AtomicUsize::new(0),
        }
    }

    /// A store whose every load fails.
    pub fn failing() -> Self {
        Self {
            backlog: None,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl BacklogStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Backlog> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.backlog
            .clone()
            .ok_or_else(|| anyhow!("backlog \"{name}\" not found"))
    }
}

/// One scripted provider outcome.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Succeed(String),
    Fail(ErrorCategory, String),
}

/// Provider that replays scripted outcomes and records every request.
///
/// When the script runs dry the last step repeats.
pub struct ScriptedProvider {
    script: Mutex<Vec<ScriptedStep>>,
    requests: Mutex<Vec<IterationRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ScriptedStep>) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(summary: &str) -> Self {
        Self::new(vec![ScriptedStep::Succeed(summary.to_string())])
    }

    pub fn failing(category: ErrorCategory, message: &str) -> Self {
        Self::new(vec![ScriptedStep::Fail(category, message.to_string())])
    }

    /// Fail `failures` times with `category`, then succeed.
    pub fn failing_then_succeeding(failures: usize, category: ErrorCategory) -> Self {
        let mut script = vec![ScriptedStep::Fail(category, format!("{category} failure")); failures];
        script.push(ScriptedStep::Succeed("done".to_string()));
        Self::new(script)
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn requests(&self) -> Vec<IterationRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn invoke(
        &self,
        _cancel: &CancellationToken,
        request: &IterationRequest,
    ) -> Result<Invocation, ProviderError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let step = {
            let mut script = self.script.lock().expect("script lock");
            if script.len() > 1 {
                Some(script.remove(0))
            } else {
                script.first().cloned()
            }
        };
        match step {
            Some(ScriptedStep::Succeed(summary)) => Ok(Invocation::completed(summary)),
            Some(ScriptedStep::Fail(category, message)) => {
                Err(ProviderError::new(category, message))
            }
            None => Ok(Invocation::completed("")),
        }
    }
}
