//! Deterministic selection of the next work item.

use crate::core::types::{Backlog, WorkItem};

/// Pick the item the loop should work on next.
///
/// An item already marked `in_progress` wins (first one in sequence order).
/// Otherwise the incomplete item with the lowest priority is chosen; on equal
/// priorities the first one encountered wins.
///
/// Returns `None` when every item passes (nothing to do).
pub fn next_item(backlog: &Backlog) -> Option<&WorkItem> {
    if let Some(item) = backlog.items.iter().find(|item| item.in_progress) {
        return Some(item);
    }

    let mut next: Option<&WorkItem> = None;
    for item in backlog.items.iter().filter(|item| !item.passes) {
        match next {
            Some(current) if current.priority <= item.priority => {}
            _ => next = Some(item),
        }
    }
    next
}
