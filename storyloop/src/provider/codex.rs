//! Backend that drives `codex exec`, feeding the prompt on stdin.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::core::types::{Capabilities, IterationRequest};
use crate::io::config::ProviderSettings;
use crate::provider::cli::{CliCommand, CommandRunner, ProcessRunner, resolve_model, resolve_policy};
use crate::provider::{Invocation, Provider, ProviderError};

const PROGRAM: &str = "codex";

const APPROVAL_POLICIES: &[&str] = &["on-failure", "on-request", "never", "untrusted"];
const SANDBOX_POLICIES: &[&str] = &["read-only", "workspace-write", "danger-full-access"];

pub struct CodexProvider {
    settings: ProviderSettings,
    runner: Arc<dyn CommandRunner>,
}

impl CodexProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self::with_runner(settings, Arc::new(ProcessRunner))
    }

    pub fn with_runner(settings: ProviderSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }

    fn build_command(&self, request: &IterationRequest) -> Result<CliCommand, ProviderError> {
        if request.prompt.trim().is_empty() {
            return Err(ProviderError::configuration("codex prompt is required"));
        }
        let approval = resolve_policy(
            &request.approval_policy,
            &self.settings.approval_policy,
            "on-failure",
        );
        if !APPROVAL_POLICIES.contains(&approval.as_str()) {
            return Err(ProviderError::configuration(format!(
                "unsupported codex approval policy \"{approval}\""
            )));
        }
        let sandbox = resolve_policy(
            &request.sandbox_policy,
            &self.settings.sandbox_policy,
            "workspace-write",
        );
        if !SANDBOX_POLICIES.contains(&sandbox.as_str()) {
            return Err(ProviderError::configuration(format!(
                "unsupported codex sandbox policy \"{sandbox}\""
            )));
        }

        let mut args = vec![
            "exec".to_string(),
            "--sandbox".to_string(),
            sandbox,
            "-c".to_string(),
            format!("approval_policy=\"{approval}\""),
            "--skip-git-repo-check".to_string(),
        ];
        if let Some(model) = resolve_model(&request.model, &self.settings.model) {
            args.push("--model".to_string());
            args.push(model);
        }
        // `-` makes codex read the prompt from stdin.
        args.push("-".to_string());

        Ok(CliCommand {
            program: PROGRAM.to_string(),
            args,
            work_dir: request.work_dir.clone(),
            stdin: Some(request.prompt.clone()),
            timeout: self.settings.timeout(),
        })
    }
}

#[async_trait]
impl Provider for CodexProvider {
    fn name(&self) -> &str {
        PROGRAM
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: true,
            tool_calls: true,
            sandbox_control: true,
            approval_modes: APPROVAL_POLICIES.iter().map(|mode| mode.to_string()).collect(),
            max_context_hint: None,
        }
    }

    #[instrument(skip_all, fields(provider = PROGRAM))]
    async fn invoke(
        &self,
        cancel: &CancellationToken,
        request: &IterationRequest,
    ) -> Result<Invocation, ProviderError> {
        let command = self.build_command(request)?;
        debug!(args = ?command.args, "invoking codex");
        match self.runner.run(cancel, &command).await {
            Ok(output) => Ok(Invocation::completed(output.trim())),
            Err(failure) => {
                let err = ProviderError::from_exec(PROGRAM, failure);
                warn!(category = %err.category, err = %err, "codex invocation failed");
                Err(err)
            }
        }
    }
}
