//! Canonical on-disk locations under `.storyloop/`.

use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".storyloop";
pub const BACKLOGS_DIR: &str = "backlogs";

/// Root of every backlog for a project directory.
pub fn backlogs_root(base_dir: &Path) -> PathBuf {
    base_dir.join(STATE_DIR).join(BACKLOGS_DIR)
}

/// All canonical paths for one named backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogPaths {
    pub dir: PathBuf,
    pub json_path: PathBuf,
    pub markdown_path: PathBuf,
    pub progress_path: PathBuf,
}

impl BacklogPaths {
    pub fn new(base_dir: &Path, name: &str) -> Self {
        let dir = backlogs_root(base_dir).join(name);
        Self {
            json_path: dir.join("backlog.json"),
            markdown_path: dir.join("backlog.md"),
            progress_path: dir.join("progress.md"),
            dir,
        }
    }
}
