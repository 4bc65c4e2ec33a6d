//! Backlog validation for `storyloop validate`.

use anyhow::{Context, Result};

use crate::core::invariants::validate_invariants;
use crate::core::types::Backlog;
use crate::io::backlog_store::{FsBacklogStore, schema_violations};

/// Validation result for one backlog. An empty `errors` list means valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogValidation {
    pub name: String,
    pub errors: Vec<String>,
}

impl BacklogValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check the document against the schema, then the semantic invariants.
///
/// Invariants are only checked once the document is structurally sound.
/// Unreadable or unparsable files are errors, not violations.
pub fn validate_backlog(store: &FsBacklogStore, name: Option<&str>) -> Result<BacklogValidation> {
    let name = store.resolve_name(name)?;
    let value = store.load_value(&name)?;

    let mut errors = schema_violations(&value)?;
    if errors.is_empty() {
        let backlog: Backlog = serde_json::from_value(value)
            .with_context(|| format!("deserialize backlog \"{name}\""))?;
        errors = validate_invariants(&backlog);
    }
    Ok(BacklogValidation { name, errors })
}
