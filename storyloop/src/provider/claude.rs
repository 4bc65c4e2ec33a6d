//! Backend that drives the `claude` CLI in print mode.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::core::types::{Capabilities, IterationRequest};
use crate::io::config::ProviderSettings;
use crate::provider::cli::{CliCommand, CommandRunner, ProcessRunner, resolve_model, resolve_policy};
use crate::provider::{Invocation, Provider, ProviderError};

const PROGRAM: &str = "claude";

pub struct ClaudeProvider {
    settings: ProviderSettings,
    runner: Arc<dyn CommandRunner>,
}

impl ClaudeProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self::with_runner(settings, Arc::new(ProcessRunner))
    }

    pub fn with_runner(settings: ProviderSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }

    fn build_command(&self, request: &IterationRequest) -> Result<CliCommand, ProviderError> {
        if request.prompt.trim().is_empty() {
            return Err(ProviderError::configuration("claude prompt is required"));
        }
        let permission_mode = permission_mode(&resolve_policy(
            &request.approval_policy,
            &self.settings.approval_policy,
            "on-failure",
        ))?;
        validate_sandbox_policy(&resolve_policy(
            &request.sandbox_policy,
            &self.settings.sandbox_policy,
            "",
        ))?;

        let mut args = vec![
            "-p".to_string(),
            "--permission-mode".to_string(),
            permission_mode.to_string(),
        ];
        if let Some(model) = resolve_model(&request.model, &self.settings.model) {
            args.push("--model".to_string());
            args.push(model);
        }
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

/// Map an approval policy onto claude's `--permission-mode`.
fn permission_mode(policy: &str) -> Result<&'static str, ProviderError> {
    match policy {
        "on-failure" => Ok("default"),
        "on-request" => Ok("acceptEdits"),
        "never" => Ok("dontAsk"),
        other => Err(ProviderError::configuration(format!(
            "unsupported claude approval policy \"{other}\""
        ))),
    }
}

/// claude only runs with workspace write access; blank means unspecified.
fn validate_sandbox_policy(policy: &str) -> Result<(), ProviderError> {
    match policy {
        "" | "workspace-write" => Ok(()),
        other => Err(ProviderError::configuration(format!(
            "unsupported claude sandbox policy \"{other}\""
        ))),
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
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
        debug!(args = ?command.args, "invoking claude");
        match self.runner.run(cancel, &command).await {
            Ok(output) => Ok(Invocation::completed(output.trim())),
            Err(failure) => {
                let err = ProviderError::from_exec(PROGRAM, failure);
                warn!(category = %err.category, err = %err, "claude invocation failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ErrorCategory;
    use crate::provider::cli::testing::{RecordingRunner, ScriptedRun};
    use std::path::PathBuf;

    fn settings(model: &str, approval: &str, sandbox: &str) -> ProviderSettings {
        ProviderSettings {
            enabled: true,
            model: model.to_string(),
            approval_policy: approval.to_string(),
            sandbox_policy: sandbox.to_string(),
            timeout_secs: 0,
        }
    }

    fn request(prompt: &str) -> IterationRequest {
        IterationRequest {
            work_dir: PathBuf::from("/tmp/work"),
            prompt: prompt.to_string(),
            ..IterationRequest::default()
        }
    }

    #[tokio::test]
    async fn builds_cli_args_from_settings() {
        let runner = Arc::new(RecordingRunner::succeeding("done\n"));
        let provider = ClaudeProvider::with_runner(
            settings("claude-sonnet-4-6", "on-request", "workspace-write"),
            runner.clone(),
        );

        let mut invocation = provider
            .invoke(&CancellationToken::new(), &request("Implement story S-1"))
            .await
            .expect("invoke");

        assert!(invocation.events.recv().await.is_none());
        assert!(invocation.result.success);
        assert_eq!(invocation.result.summary, "done");

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "claude");
        assert_eq!(
            calls[0].args,
            vec![
                "-p",
                "--permission-mode",
                "acceptEdits",
                "--model",
                "claude-sonnet-4-6",
                "Implement story S-1",
            ]
        );
        assert_eq!(calls[0].work_dir, PathBuf::from("/tmp/work"));
    }

    #[tokio::test]
    async fn runtime_policy_overrides_settings() {
        let runner = Arc::new(RecordingRunner::succeeding("ok"));
        let provider =
            ClaudeProvider::with_runner(settings("", "on-request", ""), runner.clone());
        let mut req = request("hello");
        req.approval_policy = "never".to_string();
        req.model = "default".to_string();

        provider
            .invoke(&CancellationToken::new(), &req)
            .await
            .expect("invoke");

        assert_eq!(
            runner.calls()[0].args,
            vec!["-p", "--permission-mode", "dontAsk", "hello"]
        );
    }

    #[tokio::test]
    async fn rejects_unsupported_approval_policy_without_spawning() {
        let runner = Arc::new(RecordingRunner::succeeding("unused"));
        let provider = ClaudeProvider::with_runner(settings("", "bad-value", ""), runner.clone());

        let err = provider
            .invoke(&CancellationToken::new(), &request("hello"))
            .await
            .expect_err("should reject");

        assert_eq!(err.category, ErrorCategory::Configuration);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn rejects_unsupported_sandbox_policy() {
        let runner = Arc::new(RecordingRunner::succeeding("unused"));
        let provider = ClaudeProvider::with_runner(settings("", "", ""), runner.clone());
        let mut req = request("hello");
        req.sandbox_policy = "danger-full-access".to_string();

        let err = provider
            .invoke(&CancellationToken::new(), &req)
            .await
            .expect_err("should reject");

        assert_eq!(err.category, ErrorCategory::Configuration);
        assert!(err.message.contains("danger-full-access"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_prompt_is_configuration_error() {
        let runner = Arc::new(RecordingRunner::succeeding("unused"));
        let provider = ClaudeProvider::with_runner(settings("", "", ""), runner.clone());

        let err = provider
            .invoke(&CancellationToken::new(), &request("   "))
            .await
            .expect_err("should reject");

        assert_eq!(err.category, ErrorCategory::Configuration);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_binary_maps_to_configuration() {
        let runner = Arc::new(RecordingRunner::new(vec![ScriptedRun::NotFound]));
        let provider = ClaudeProvider::with_runner(settings("", "", ""), runner);

        let err = provider
            .invoke(&CancellationToken::new(), &request("hello"))
            .await
            .expect_err("should fail");

        assert_eq!(err.category, ErrorCategory::Configuration);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_output_is_retryable() {
        let runner = Arc::new(RecordingRunner::new(vec![ScriptedRun::Exit(
            "API returned 429 rate limit exceeded".to_string(),
        )]));
        let provider = ClaudeProvider::with_runner(settings("", "", ""), runner);

        let err = provider
            .invoke(&CancellationToken::new(), &request("hello"))
            .await
            .expect_err("should fail");

        assert_eq!(err.category, ErrorCategory::RateLimit);
        assert!(err.is_retryable());
    }
}
