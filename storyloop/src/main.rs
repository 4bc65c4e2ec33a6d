//! `storyloop` command-line entry point.
//!
//! Backlogs live under `.storyloop/backlogs/<name>/` in the current directory.
//! `run` advances the next story by one iteration through the selected agent
//! backend.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use storyloop::exit_codes;
use storyloop::io::backlog_store::FsBacklogStore;
use storyloop::io::config::{
    SettingOverrides, load_config, parse_csv, resolve_config_path, resolve_runtime_settings,
};
use storyloop::logging;
use storyloop::looping::{Cancelled, IterationOverrides, LoopManager, RunOutcome};
use storyloop::provider::registry::Registry;
use storyloop::status::{backlog_status, list_lines};
use storyloop::validate::validate_backlog;

const DEFAULT_BACKLOG_NAME: &str = "main";

#[derive(Parser)]
#[command(
    name = "storyloop",
    version,
    about = "Story-driven delivery loop for coding-agent CLIs"
)]
struct Cli {
    /// Config file (defaults to $STORYLOOP_CONFIG or ~/.config/storyloop/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    overrides: OverrideArgs,
    #[command(subcommand)]
    command: Command,
}

/// Flags accepted both before the subcommand and on `run`.
#[derive(clap::Args, Debug, Default)]
struct OverrideArgs {
    /// Agent backend: codex, claude or gemini.
    #[arg(long)]
    provider: Option<String>,
    /// Retries after the first attempt.
    #[arg(long, allow_negative_numbers = true)]
    max_retries: Option<i64>,
    /// Comma-separated backoff delays, e.g. `0s,5s,15s`.
    #[arg(long)]
    retry_delays: Option<String>,
}

impl OverrideArgs {
    fn to_overrides(&self) -> SettingOverrides {
        SettingOverrides {
            provider: self.provider.clone(),
            max_retries: self.max_retries,
            retry_delays: self.retry_delays.as_deref().map(parse_csv),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Scaffold a new backlog.
    New {
        /// Backlog name (default: `main`).
        name: Option<String>,
    },
    /// List backlogs with their progress.
    List,
    /// Show progress and the next story of a backlog.
    Status {
        /// Backlog name; auto-detected when only one exists.
        name: Option<String>,
    },
    /// Check a backlog against the schema and invariants.
    Validate {
        /// Backlog name; auto-detected when only one exists.
        name: Option<String>,
    },
    /// Run one iteration on the next story.
    Run {
        /// Backlog name; auto-detected when only one exists.
        name: Option<String>,
        #[command(flatten)]
        overrides: OverrideArgs,
        /// Approval policy passed to the backend (default: on-failure).
        #[arg(long)]
        approval_policy: Option<String>,
        /// Sandbox policy passed to the backend (default: workspace-write).
        #[arg(long)]
        sandbox_policy: Option<String>,
        /// Model passed to the backend (default: the configured model).
        #[arg(long)]
        model: Option<String>,
        /// Directory the backend works in.
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match run().await {
        Ok(code) => code,
        Err(err) if err.downcast_ref::<Cancelled>().is_some() => {
            eprintln!("{:#}", err);
            exit_codes::CANCELLED
        }
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let base_dir = std::env::current_dir().context("resolve current directory")?;
    let store = FsBacklogStore::new(base_dir);

    match cli.command {
        Command::New { name } => cmd_new(&store, name.as_deref()),
        Command::List => cmd_list(&store),
        Command::Status { name } => cmd_status(&store, name.as_deref()),
        Command::Validate { name } => cmd_validate(&store, name.as_deref()),
        Command::Run {
            name,
            overrides,
            approval_policy,
            sandbox_policy,
            model,
            work_dir,
        } => {
            let iteration = IterationOverrides {
                approval_policy: approval_policy.unwrap_or_default(),
                sandbox_policy: sandbox_policy.unwrap_or_default(),
                model: model.unwrap_or_default(),
            };
            let global = cli.overrides.to_overrides();
            let run = overrides.to_overrides();
            cmd_run(
                store,
                cli.config,
                RunArgs {
                    name,
                    global,
                    run,
                    iteration,
                    work_dir,
                },
            )
            .await
        }
    }
}

fn cmd_new(store: &FsBacklogStore, name: Option<&str>) -> Result<i32> {
    let name = name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_BACKLOG_NAME);
    store.create(name)?;
    println!("Created backlog \"{name}\" under .storyloop/backlogs/{name}/");
    Ok(exit_codes::OK)
}

fn cmd_list(store: &FsBacklogStore) -> Result<i32> {
    for line in list_lines(&store.list()?) {
        println!("{line}");
    }
    Ok(exit_codes::OK)
}

fn cmd_status(store: &FsBacklogStore, name: Option<&str>) -> Result<i32> {
    println!("{}", backlog_status(store, name)?);
    Ok(exit_codes::OK)
}

fn cmd_validate(store: &FsBacklogStore, name: Option<&str>) -> Result<i32> {
    let outcome = validate_backlog(store, name)?;
    if outcome.is_valid() {
        println!("Backlog \"{}\" is valid.", outcome.name);
        return Ok(exit_codes::OK);
    }
    println!("Backlog \"{}\" is invalid:", outcome.name);
    for error in &outcome.errors {
        println!("- {error}");
    }
    Ok(exit_codes::INVALID)
}

struct RunArgs {
    name: Option<String>,
    global: SettingOverrides,
    run: SettingOverrides,
    iteration: IterationOverrides,
    work_dir: PathBuf,
}

async fn cmd_run(
    store: FsBacklogStore,
    config_path: Option<PathBuf>,
    args: RunArgs,
) -> Result<i32> {
    let env = |key: &str| std::env::var(key).ok();
    let config_path = resolve_config_path(config_path.as_deref(), env)?;
    debug!(path = %config_path.display(), "loading config");
    let cfg = load_config(&config_path)?;
    let settings = resolve_runtime_settings(&cfg, env, &args.global, &args.run)?;

    let name = store.resolve_name(args.name.as_deref())?;
    let provider = Registry::default().resolve(&settings.provider, &cfg)?;
    let provider_name = provider.name().to_string();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling iteration");
            trigger.cancel();
        }
    });

    let manager = LoopManager::new(Arc::new(store), provider, settings.retry)
        .with_overrides(args.iteration);
    match manager.run_once(&cancel, &name, &args.work_dir).await? {
        RunOutcome::NothingToDo => {
            println!("Backlog \"{name}\" is complete; nothing to run.");
        }
        RunOutcome::Completed {
            item_id,
            attempts,
            result,
        } => {
            if !result.summary.is_empty() {
                println!("{}", result.summary);
            }
            println!(
                "Run completed with provider \"{provider_name}\": {item_id} ({attempts} attempt{}).",
                if attempts == 1 { "" } else { "s" }
            );
        }
    }
    Ok(exit_codes::OK)
}
