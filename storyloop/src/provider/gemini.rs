//! Backend that drives the `gemini` CLI non-interactively.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::core::types::{Capabilities, IterationRequest};
use crate::io::config::ProviderSettings;
use crate::provider::cli::{CliCommand, CommandRunner, ProcessRunner, resolve_model, resolve_policy};
use crate::provider::{Invocation, Provider, ProviderError};

const PROGRAM: &str = "gemini";

pub struct GeminiProvider {
    settings: ProviderSettings,
    runner: Arc<dyn CommandRunner>,
}

impl GeminiProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self::with_runner(settings, Arc::new(ProcessRunner))
    }

    pub fn with_runner(settings: ProviderSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }

    fn build_command(&self, request: &IterationRequest) -> Result<CliCommand, ProviderError> {
        if request.prompt.trim().is_empty() {
            return Err(ProviderError::configuration("gemini prompt is required"));
        }
        let approval_mode = match resolve_policy(
            &request.approval_policy,
            &self.settings.approval_policy,
            "on-failure",
        )
        .as_str()
        {
            "on-failure" => "default",
            "on-request" => "auto_edit",
            "never" => "yolo",
            other => {
                return Err(ProviderError::configuration(format!(
                    "unsupported gemini approval policy \"{other}\""
                )));
            }
        };
        let sandboxed = match resolve_policy(
            &request.sandbox_policy,
            &self.settings.sandbox_policy,
            "workspace-write",
        )
        .as_str()
        {
            "workspace-write" => false,
            "sandboxed" => true,
            other => {
                return Err(ProviderError::configuration(format!(
                    "unsupported gemini sandbox policy \"{other}\""
                )));
            }
        };

        let mut args = vec!["--approval-mode".to_string(), approval_mode.to_string()];
        if sandboxed {
            args.push("--sandbox".to_string());
        }
        if let Some(model) = resolve_model(&request.model, &self.settings.model) {
            args.push("--model".to_string());
            args.push(model);
        }
        args.push("--prompt".to_string());
        args.push(request.prompt.clone());

        Ok(CliCommand {
            program: PROGRAM.to_string(),
            args,
            work_dir: request.work_dir.clone(),
            stdin: None,
            timeout: self.settings.timeout(),
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        PROGRAM
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: true,
            tool_calls: true,
            sandbox_control: true,
            approval_modes: vec![
                "on-failure".to_string(),
                "on-request".to_string(),
                "never".to_string(),
            ],
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
        debug!(args = ?command.args, "invoking gemini");
        match self.runner.run(cancel, &command).await {
            Ok(output) => Ok(Invocation::completed(output.trim())),
            Err(failure) => {
                let err = ProviderError::from_exec(PROGRAM, failure);
                warn!(category = %err.category, err = %err, "gemini invocation failed");
                Err(err)
            }
        }
    }
}
