//! Story-driven delivery loop for coding-agent CLIs.
//!
//! A backlog of prioritized user stories lives under `.storyloop/backlogs/`.
//! Each `run` picks the next story, renders a prompt and hands it to one agent
//! backend (codex, claude or gemini) with bounded, cancellable retry.
//!
//! - **[`core`]**: Pure, deterministic logic (types, selection, invariants,
//!   retry schedule, prompt rendering).
//! - **[`io`]**: Side effects (config file, backlog store, child processes).
//! - **[`provider`]**: The backend trait, error taxonomy and registry.
//!
//! Orchestration modules ([`looping`], [`status`], [`validate`]) combine the
//! pieces behind the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod provider;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
