//! Semantic backlog invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::types::Backlog;

/// Check semantic invariants of a backlog:
/// - `project` is not blank
/// - at least one story
/// - per story: non-blank id/title/description, `priority >= 1`,
///   non-empty acceptance criteria
/// - no duplicate ids, no duplicate priorities among incomplete stories
///
/// Returns one message per violation, in story order.
pub fn validate_invariants(backlog: &Backlog) -> Vec<String> {
    let mut errors = Vec::new();
    if backlog.project.trim().is_empty() {
        errors.push("project is required".to_string());
    }
    if backlog.items.is_empty() {
        errors.push("at least one user story is required".to_string());
        return errors;
    }

    let mut ids = HashSet::new();
    let mut priorities = HashSet::new();
    for (index, item) in backlog.items.iter().enumerate() {
        let prefix = format!("userStories[{index}]");
        if item.id.trim().is_empty() {
            errors.push(format!("{prefix}: id is required"));
        }
        if item.title.trim().is_empty() {
            errors.push(format!("{prefix}: title is required"));
        }
        if item.description.trim().is_empty() {
            errors.push(format!("{prefix}: description is required"));
        }
        if item.priority < 1 {
            errors.push(format!("{prefix}: priority must be >= 1"));
        }
        if item.acceptance_criteria.is_empty() {
            errors.push(format!("{prefix}: acceptanceCriteria must not be empty"));
        }
        if !ids.insert(item.id.as_str()) {
            errors.push(format!("{prefix}: duplicate id {}", item.id));
        }
        if !item.passes && !priorities.insert(item.priority) {
            errors.push(format!("{prefix}: duplicate priority {}", item.priority));
        }
    }
    errors
}
