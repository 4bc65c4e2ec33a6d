//! Progress reporting for `storyloop list` and `storyloop status`.

use std::fmt;

use anyhow::Result;

use crate::core::selector::next_item;
use crate::core::types::Backlog;
use crate::io::backlog_store::{BacklogStore, BacklogSummary, FsBacklogStore};

/// Snapshot of one backlog's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub name: String,
    pub project: String,
    pub total: usize,
    pub complete: usize,
    pub in_progress: usize,
    /// `(id, title)` of the item `run` would pick next.
    pub next: Option<(String, String)>,
}

impl StatusReport {
    pub fn from_backlog(name: &str, backlog: &Backlog) -> Self {
        Self {
            name: name.to_string(),
            project: backlog.project.clone(),
            total: backlog.items.len(),
            complete: backlog.count_complete(),
            in_progress: backlog.count_in_progress(),
            next: next_item(backlog).map(|item| (item.id.clone(), item.title.clone())),
        }
    }

    pub fn pending(&self) -> usize {
        self.total
            .saturating_sub(self.complete)
            .saturating_sub(self.in_progress)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Backlog: {}", self.name)?;
        writeln!(f, "Project: {}", self.project)?;
        writeln!(f, "Stories: {} total", self.total)?;
        writeln!(f, "  complete: {}", self.complete)?;
        writeln!(f, "  in-progress: {}", self.in_progress)?;
        writeln!(f, "  pending: {}", self.pending())?;
        match &self.next {
            Some((id, title)) => write!(f, "Next: {id} - {title}"),
            None => write!(f, "Next: none (all complete)"),
        }
    }
}

/// Resolve `name` (auto-detecting when blank) and report its progress.
pub fn backlog_status(store: &FsBacklogStore, name: Option<&str>) -> Result<StatusReport> {
    let name = store.resolve_name(name)?;
    let backlog = store.load(&name)?;
    Ok(StatusReport::from_backlog(&name, &backlog))
}

/// One `list` line per backlog, or a single notice when there are none.
pub fn list_lines(summaries: &[BacklogSummary]) -> Vec<String> {
    if summaries.is_empty() {
        return vec!["No backlogs found.".to_string()];
    }
    summaries
        .iter()
        .map(|summary| {
            format!(
                "{}  {}/{} complete  in-progress:{}",
                summary.name, summary.complete, summary.total, summary.in_progress
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{backlog, item, item_in_progress};

    #[test]
    fn report_counts_and_next_item() {
        let doc = backlog(vec![
            item("A", 1, true),
            item_in_progress("B", 3),
            item("C", 2, false),
            item("D", 4, false),
        ]);
        let report = StatusReport::from_backlog("alpha", &doc);

        assert_eq!(report.total, 4);
        assert_eq!(report.complete, 1);
        assert_eq!(report.in_progress, 1);
        assert_eq!(report.pending(), 2);
        assert_eq!(
            report.to_string(),
            "Backlog: alpha\nProject: demo\nStories: 4 total\n  complete: 1\n  in-progress: 1\n  pending: 2\nNext: B - B title"
        );
    }

    #[test]
    fn complete_backlog_has_no_next() {
        let report = StatusReport::from_backlog("alpha", &backlog(vec![item("A", 1, true)]));
        assert!(report.next.is_none());
        assert!(report.to_string().ends_with("Next: none (all complete)"));
    }

    #[test]
    fn list_lines_format_each_summary() {
        assert_eq!(list_lines(&[]), vec!["No backlogs found.".to_string()]);
        let lines = list_lines(&[BacklogSummary {
            name: "alpha".to_string(),
            total: 3,
            complete: 1,
            in_progress: 1,
        }]);
        assert_eq!(lines, vec!["alpha  1/3 complete  in-progress:1".to_string()]);
    }

    #[test]
    fn status_auto_detects_single_backlog() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsBacklogStore::new(temp.path());
        store.create("alpha").expect("create");

        let report = backlog_status(&store, None).expect("status");
        assert_eq!(report.name, "alpha");
        assert_eq!(report.next, Some(("US-001".to_string(), "Define first implementation story".to_string())));
    }
}
