//! One delivery iteration with bounded retry for `storyloop run`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::prompt::render_story_prompt;
use crate::core::retry::RetryPolicy;
use crate::core::selector::next_item;
use crate::core::types::{IterationRequest, IterationResult, WorkItem};
use crate::io::backlog_store::BacklogStore;
use crate::provider::Provider;

pub const DEFAULT_APPROVAL_POLICY: &str = "on-failure";
pub const DEFAULT_SANDBOX_POLICY: &str = "workspace-write";
pub const DEFAULT_MODEL: &str = "default";

/// The caller's token fired before the iteration finished.
#[derive(Debug, Error)]
#[error("iteration cancelled")]
pub struct Cancelled;

/// Runtime policy overrides. Blank values fall back to the loop defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationOverrides {
    pub approval_policy: String,
    pub sandbox_policy: String,
    pub model: String,
}

/// How `run_once` ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every item already passes; no provider was invoked.
    NothingToDo,
    Completed {
        item_id: String,
        attempts: u64,
        result: IterationResult,
    },
}

pub struct LoopManager {
    store: Arc<dyn BacklogStore>,
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    overrides: IterationOverrides,
}

impl LoopManager {
    pub fn new(
        store: Arc<dyn BacklogStore>,
        provider: Arc<dyn Provider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            provider,
            retry,
            overrides: IterationOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: IterationOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Load `name`, pick its next item and drive the provider until it
    /// succeeds, fails permanently, or runs out of attempts.
    ///
    /// Load and prompt failures are returned as-is and never retried. A
    /// provider failure is returned as the last attempt's [`ProviderError`]
    /// wrapped with `iteration failed`. Cancellation surfaces as [`Cancelled`].
    ///
    /// [`ProviderError`]: crate::provider::ProviderError
    #[instrument(skip_all, fields(backlog = %name, provider = %self.provider.name()))]
    pub async fn run_once(
        &self,
        cancel: &CancellationToken,
        name: &str,
        work_dir: &Path,
    ) -> Result<RunOutcome> {
        let backlog = self
            .store
            .load(name)
            .with_context(|| format!("load backlog \"{name}\""))?;

        let Some(item) = next_item(&backlog) else {
            info!("all items pass; nothing to do");
            return Ok(RunOutcome::NothingToDo);
        };
        info!(item = %item.id, priority = item.priority, "selected item");

        let request = self.build_request(name, item, work_dir)?;
        let (attempts, result) = self.invoke_with_retry(cancel, &request).await?;
        info!(item = %item.id, attempts, "iteration completed");
        Ok(RunOutcome::Completed {
            item_id: item.id.clone(),
            attempts,
            result,
        })
    }

    fn build_request(&self, name: &str, item: &WorkItem, work_dir: &Path) -> Result<IterationRequest> {
        let prompt = render_story_prompt(item)
            .with_context(|| format!("render prompt for {}", item.id))?;
        let pick = |value: &str, fallback: &str| match value.trim() {
            "" => fallback.to_string(),
            value => value.to_string(),
        };
        let metadata = BTreeMap::from([
            ("backlog".to_string(), name.to_string()),
            ("item_id".to_string(), item.id.clone()),
        ]);
        Ok(IterationRequest {
            work_dir: work_dir.to_path_buf(),
            prompt,
            context_files: Vec::new(),
            approval_policy: pick(&self.overrides.approval_policy, DEFAULT_APPROVAL_POLICY),
            sandbox_policy: pick(&self.overrides.sandbox_policy, DEFAULT_SANDBOX_POLICY),
            model: pick(&self.overrides.model, DEFAULT_MODEL),
            metadata,
        })
    }

    async fn invoke_with_retry(
        &self,
        cancel: &CancellationToken,
        request: &IterationRequest,
    ) -> Result<(u64, IterationResult)> {
        let total_attempts = self.retry.total_attempts();
        let mut attempt = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
            attempt += 1;
            debug!(attempt, total_attempts, "invoking provider");

            let err = match self.provider.invoke(cancel, request).await {
                Ok(mut invocation) => {
                    while let Some(event) = invocation.events.recv().await {
                        debug!(kind = ?event.kind, message = %event.message, "provider event");
                    }
                    return Ok((attempt, invocation.result));
                }
                Err(err) => err,
            };

            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
            if !err.is_retryable() || attempt >= total_attempts {
                warn!(
                    attempt,
                    category = %err.category,
                    err = %err,
                    "giving up on provider"
                );
                return Err(anyhow::Error::new(err).context("iteration failed"));
            }

            // Schedule entries are indexed by the failed attempt, starting at 0.
            let delay = self.retry.delay_for(attempt - 1);
            warn!(
                attempt,
                category = %err.category,
                delay = ?delay,
                err = %err,
                "retryable provider failure"
            );
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Cancelled.into()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::provider::{ErrorCategory, ProviderError};
    use crate::test_support::{
        MemoryStore, ScriptedProvider, ScriptedStep, backlog, item, item_in_progress,
    };

    fn manager(
        store: Arc<MemoryStore>,
        provider: Arc<ScriptedProvider>,
        retry: RetryPolicy,
    ) -> LoopManager {
        LoopManager::new(store, provider, retry)
    }

    fn two_items() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new(backlog(vec![
            item("A", 2, false),
            item("B", 1, false),
        ])))
    }

    fn no_delays(max_retries: i64) -> RetryPolicy {
        RetryPolicy::new(max_retries, vec![Duration::ZERO])
    }

    fn provider_error(err: &anyhow::Error) -> &ProviderError {
        err.downcast_ref::<ProviderError>()
            .expect("provider error in chain")
    }

    #[tokio::test]
    async fn success_on_first_attempt_targets_selected_item() {
        let provider = Arc::new(ScriptedProvider::succeeding("implemented B"));
        let manager = manager(two_items(), provider.clone(), no_delays(3));

        let outcome = manager
            .run_once(&CancellationToken::new(), "demo", Path::new("/work"))
            .await
            .expect("run");

        match outcome {
            RunOutcome::Completed {
                item_id,
                attempts,
                result,
            } => {
                assert_eq!(item_id, "B");
                assert_eq!(attempts, 1);
                assert!(result.success);
                assert_eq!(result.summary, "implemented B");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.starts_with("Implement story B: B title"));
        assert_eq!(requests[0].work_dir, PathBuf::from("/work"));
        assert_eq!(requests[0].approval_policy, DEFAULT_APPROVAL_POLICY);
        assert_eq!(requests[0].sandbox_policy, DEFAULT_SANDBOX_POLICY);
        assert_eq!(requests[0].model, DEFAULT_MODEL);
        assert_eq!(requests[0].metadata.get("item_id").map(String::as_str), Some("B"));
    }

    #[tokio::test]
    async fn always_retryable_failure_uses_every_attempt() {
        let provider = Arc::new(ScriptedProvider::failing(
            ErrorCategory::RateLimit,
            "429 rate limit exceeded",
        ));
        let manager = manager(two_items(), provider.clone(), no_delays(3));

        let err = manager
            .run_once(&CancellationToken::new(), "demo", Path::new("."))
            .await
            .expect_err("should fail");

        assert_eq!(provider.calls(), 4);
        assert_eq!(err.to_string(), "iteration failed");
        assert_eq!(provider_error(&err).category, ErrorCategory::RateLimit);
    }

    #[tokio::test]
    async fn non_retryable_failure_stops_after_one_attempt() {
        let provider = Arc::new(ScriptedProvider::failing(
            ErrorCategory::Authentication,
            "unauthorized",
        ));
        let manager = manager(two_items(), provider.clone(), no_delays(5));

        let err = manager
            .run_once(&CancellationToken::new(), "demo", Path::new("."))
            .await
            .expect_err("should fail");

        assert_eq!(provider.calls(), 1);
        assert_eq!(provider_error(&err).category, ErrorCategory::Authentication);
        assert!(format!("{err:#}").contains("iteration failed: unauthorized"));
    }

    #[tokio::test]
    async fn success_on_third_attempt_stops_retrying() {
        let provider = Arc::new(ScriptedProvider::failing_then_succeeding(
            2,
            ErrorCategory::Transient,
        ));
        let manager = manager(two_items(), provider.clone(), no_delays(5));

        let outcome = manager
            .run_once(&CancellationToken::new(), "demo", Path::new("."))
            .await
            .expect("run");

        assert_eq!(provider.calls(), 3);
        assert!(matches!(outcome, RunOutcome::Completed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let provider = Arc::new(ScriptedProvider::failing(ErrorCategory::Timeout, "timed out"));
        let manager = manager(two_items(), provider.clone(), RetryPolicy::new(0, Vec::new()));

        manager
            .run_once(&CancellationToken::new(), "demo", Path::new("."))
            .await
            .expect_err("should fail");

        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn surfaced_error_is_the_last_attempt() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedStep::Fail(ErrorCategory::Transient, "try again later".to_string()),
            ScriptedStep::Fail(ErrorCategory::Fatal, "segmentation fault".to_string()),
        ]));
        let manager = manager(two_items(), provider.clone(), no_delays(3));

        let err = manager
            .run_once(&CancellationToken::new(), "demo", Path::new("."))
            .await
            .expect_err("should fail");

        assert_eq!(provider.calls(), 2);
        let provider_err = provider_error(&err);
        assert_eq!(provider_err.category, ErrorCategory::Fatal);
        assert_eq!(provider_err.message, "segmentation fault");
    }

    #[tokio::test]
    async fn all_items_passing_invokes_nothing() {
        let store = Arc::new(MemoryStore::new(backlog(vec![
            item("A", 1, true),
            item("B", 2, true),
        ])));
        let provider = Arc::new(ScriptedProvider::succeeding("unused"));
        let manager = manager(store, provider.clone(), no_delays(3));

        let outcome = manager
            .run_once(&CancellationToken::new(), "demo", Path::new("."))
            .await
            .expect("run");

        assert_eq!(outcome, RunOutcome::NothingToDo);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn in_progress_item_wins_selection() {
        let store = Arc::new(MemoryStore::new(backlog(vec![
            item("A", 1, false),
            item_in_progress("B", 9),
        ])));
        let provider = Arc::new(ScriptedProvider::succeeding("ok"));
        let manager = manager(store, provider.clone(), no_delays(0));

        manager
            .run_once(&CancellationToken::new(), "demo", Path::new("."))
            .await
            .expect("run");

        assert!(provider.requests()[0].prompt.starts_with("Implement story B:"));
    }

    #[tokio::test]
    async fn load_failure_is_not_retried() {
        let store = Arc::new(MemoryStore::failing());
        let provider = Arc::new(ScriptedProvider::succeeding("unused"));
        let manager = manager(store.clone(), provider.clone(), no_delays(3));

        let err = manager
            .run_once(&CancellationToken::new(), "missing", Path::new("."))
            .await
            .expect_err("should fail");

        assert_eq!(store.loads(), 1);
        assert_eq!(provider.calls(), 0);
        assert!(err.downcast_ref::<ProviderError>().is_none());
        assert!(format!("{err:#}").contains("load backlog \"missing\""));
    }

    #[tokio::test]
    async fn overrides_replace_defaults_and_repeat_on_retry() {
        let provider = Arc::new(ScriptedProvider::failing_then_succeeding(
            1,
            ErrorCategory::RateLimit,
        ));
        let manager = manager(two_items(), provider.clone(), no_delays(2)).with_overrides(
            IterationOverrides {
                approval_policy: "never".to_string(),
                sandbox_policy: " ".to_string(),
                model: "opus".to_string(),
            },
        );

        manager
            .run_once(&CancellationToken::new(), "demo", Path::new("."))
            .await
            .expect("run");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
        assert_eq!(requests[0].approval_policy, "never");
        assert_eq!(requests[0].sandbox_policy, DEFAULT_SANDBOX_POLICY);
        assert_eq!(requests[0].model, "opus");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_follow_the_schedule() {
        let provider = Arc::new(ScriptedProvider::failing_then_succeeding(
            3,
            ErrorCategory::Transient,
        ));
        let retry = RetryPolicy::new(
            3,
            vec![Duration::from_secs(1), Duration::from_secs(5)],
        );
        let manager = manager(two_items(), provider.clone(), retry);

        let started = tokio::time::Instant::now();
        manager
            .run_once(&CancellationToken::new(), "demo", Path::new("."))
            .await
            .expect("run");

        assert_eq!(provider.calls(), 4);
        // 1s, then 5s, then the last entry again.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(11), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(12), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_surfaces_cancelled() {
        let provider = Arc::new(ScriptedProvider::failing(
            ErrorCategory::RateLimit,
            "429 rate limit",
        ));
        let retry = RetryPolicy::new(3, vec![Duration::from_secs(30)]);
        let manager = manager(two_items(), provider.clone(), retry);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = manager
            .run_once(&cancel, "demo", Path::new("."))
            .await
            .expect_err("should be cancelled");

        assert!(err.downcast_ref::<Cancelled>().is_some());
        assert!(err.downcast_ref::<ProviderError>().is_none());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_prevents_any_attempt() {
        let provider = Arc::new(ScriptedProvider::succeeding("unused"));
        let manager = manager(two_items(), provider.clone(), no_delays(3));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = manager
            .run_once(&cancel, "demo", Path::new("."))
            .await
            .expect_err("should be cancelled");

        assert!(err.downcast_ref::<Cancelled>().is_some());
        assert_eq!(provider.calls(), 0);
    }
}
