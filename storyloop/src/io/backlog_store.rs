//! Filesystem-backed backlog storage under `.storyloop/backlogs/<name>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::types::{Backlog, WorkItem};
use crate::io::layout::{BacklogPaths, backlogs_root};

const BACKLOG_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/backlog/v1.schema.json"
));

/// The only store operation the loop depends on.
pub trait BacklogStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Backlog>;
}

/// Per-backlog progress counts for `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogSummary {
    pub name: String,
    pub total: usize,
    pub complete: usize,
    pub in_progress: usize,
}

#[derive(Debug, Clone)]
pub struct FsBacklogStore {
    base_dir: PathBuf,
}

impl FsBacklogStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn paths(&self, name: &str) -> BacklogPaths {
        BacklogPaths::new(&self.base_dir, name)
    }

    /// Scaffold a new backlog with one starter story.
    ///
    /// Fails if a backlog with this name already exists.
    pub fn create(&self, name: &str) -> Result<BacklogPaths> {
        let name = name.trim();
        if name.is_empty() {
            bail!("name is required");
        }
        let paths = self.paths(name);
        if paths.dir.exists() {
            bail!("backlog \"{name}\" already exists");
        }
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create directory {}", paths.dir.display()))?;

        fs::write(&paths.markdown_path, default_markdown(name))
            .with_context(|| format!("write {}", paths.markdown_path.display()))?;
        self.save(name, &default_backlog(name))?;
        fs::write(&paths.progress_path, PROGRESS_SEED)
            .with_context(|| format!("write {}", paths.progress_path.display()))?;

        info!(name, dir = %paths.dir.display(), "created backlog");
        Ok(paths)
    }

    /// Atomically write the backlog document (temp file + rename).
    pub fn save(&self, name: &str, backlog: &Backlog) -> Result<()> {
        let path = self.paths(name).json_path;
        let mut buf = serde_json::to_string_pretty(backlog)
            .with_context(|| format!("serialize backlog \"{name}\""))?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }

    /// Read the raw JSON document, for schema validation.
    pub fn load_value(&self, name: &str) -> Result<Value> {
        let path = self.paths(name).json_path;
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
    }

    /// Summaries of every backlog with a document, sorted by name.
    ///
    /// A missing backlogs directory yields an empty list.
    pub fn list(&self) -> Result<Vec<BacklogSummary>> {
        let root = backlogs_root(&self.base_dir);
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read backlogs root {}", root.display()));
            }
        };

        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", root.display()))?;
            if !entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.paths(&name).json_path.is_file() {
                continue;
            }
            let backlog = self.load(&name)?;
            summaries.push(BacklogSummary {
                total: backlog.items.len(),
                complete: backlog.count_complete(),
                in_progress: backlog.count_in_progress(),
                name,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = summaries.len(), "listed backlogs");
        Ok(summaries)
    }

    /// The single existing backlog's name.
    pub fn auto_detect_name(&self) -> Result<String> {
        let mut summaries = self.list()?;
        match summaries.len() {
            0 => Err(anyhow!(
                "no backlogs found; run 'storyloop new <name>' first"
            )),
            1 => Ok(summaries.remove(0).name),
            _ => Err(anyhow!("multiple backlogs found; specify one explicitly")),
        }
    }

    /// A non-blank explicit name wins; otherwise auto-detect.
    pub fn resolve_name(&self, name: Option<&str>) -> Result<String> {
        match name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => Ok(name.to_string()),
            None => self.auto_detect_name(),
        }
    }
}

impl BacklogStore for FsBacklogStore {
    fn load(&self, name: &str) -> Result<Backlog> {
        let path = self.paths(name).json_path;
        debug!(path = %path.display(), "loading backlog");
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
    }
}

/// Structural violations of the embedded backlog schema.
pub fn schema_violations(value: &Value) -> Result<Vec<String>> {
    let schema: Value = serde_json::from_str(BACKLOG_SCHEMA).context("parse backlog schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile backlog schema")?;
    Ok(compiled
        .iter_errors(value)
        .map(|err| {
            let location = err.instance_path().to_string();
            if location.is_empty() {
                err.to_string()
            } else {
                format!("{location}: {err}")
            }
        })
        .collect())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("backlog path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp backlog {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace backlog {}", path.display()))?;
    Ok(())
}

const PROGRESS_SEED: &str = "## Codebase Patterns\n";
const STARTER_ID: &str = "US-001";
const STARTER_TITLE: &str = "Define first implementation story";
const STARTER_DESCRIPTION: &str = "As an operator, I want to define my first actionable story so that storyloop can run a concrete iteration.";
const STARTER_CRITERIA: [&str; 2] = [
    "Story has clear objective.",
    "Story has measurable acceptance criteria.",
];

fn default_backlog(name: &str) -> Backlog {
    Backlog {
        project: name.to_string(),
        description: "Describe your project and then update user stories in backlog.json."
            .to_string(),
        items: vec![WorkItem {
            id: STARTER_ID.to_string(),
            title: STARTER_TITLE.to_string(),
            description: STARTER_DESCRIPTION.to_string(),
            acceptance_criteria: STARTER_CRITERIA.iter().map(|c| c.to_string()).collect(),
            priority: 1,
            passes: false,
            in_progress: false,
        }],
    }
}

fn default_markdown(name: &str) -> String {
    let project = Path::new(name)
        .file_name()
        .map(|base| base.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let mut out = format!(
        "# {project}\n\n## Overview\nDescribe the project goals.\n\n## User Stories\n\n### {STARTER_ID}: {STARTER_TITLE}\n**Priority:** 1\n**Description:** {STARTER_DESCRIPTION}\n\n**Acceptance Criteria:**\n"
    );
    for criterion in STARTER_CRITERIA {
        out.push_str(&format!("- [ ] {criterion}\n"));
    }
    out
}
