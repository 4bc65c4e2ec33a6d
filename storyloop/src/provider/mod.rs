//! Provider abstraction for agent backends.
//!
//! A [`Provider`] runs one delivery iteration for an [`IterationRequest`] and
//! normalizes its outcome into an [`IterationResult`] or a classified
//! [`ProviderError`]. The loop only talks to this trait; the
//! [`registry::Registry`] picks the concrete backend. Tests use scripted
//! providers that never spawn processes.

pub mod claude;
pub mod cli;
pub mod codex;
pub mod error;
pub mod gemini;
pub mod registry;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::types::{Capabilities, Event, IterationRequest, IterationResult};

pub use error::{ErrorCategory, ProviderError};

/// One-shot, call-scoped stream of progress events.
pub type EventStream = mpsc::Receiver<Event>;

/// An event stream whose sender is already gone: `recv()` yields `None` at once.
pub fn closed_event_stream() -> EventStream {
    let (_tx, rx) = mpsc::channel(1);
    rx
}

/// What a successful invocation hands back.
#[derive(Debug)]
pub struct Invocation {
    /// Closed for backends that do not stream.
    pub events: EventStream,
    pub result: IterationResult,
}

impl Invocation {
    /// A non-streaming invocation that finished with `summary`.
    pub fn completed(summary: impl Into<String>) -> Self {
        Self {
            events: closed_event_stream(),
            result: IterationResult {
                success: true,
                summary: summary.into(),
                provider_run_id: None,
            },
        }
    }
}

/// Abstraction over agent backends.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable backend name, as used by the registry.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Run one iteration. Policy inputs are validated before anything is
    /// spawned; an unsupported value fails with a `configuration` error.
    async fn invoke(
        &self,
        cancel: &CancellationToken,
        request: &IterationRequest,
    ) -> Result<Invocation, ProviderError>;
}
