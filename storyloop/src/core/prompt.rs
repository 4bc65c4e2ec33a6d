//! Prompt rendering for the selected work item.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::WorkItem;

const STORY_TEMPLATE: &str = include_str!("../prompts/story.md");

/// Render the agent prompt for `item`.
///
/// The first line is always `Implement story <id>: <title>`; description and
/// acceptance criteria follow when present.
pub fn render_story_prompt(item: &WorkItem) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("story", STORY_TEMPLATE)
        .context("load story template")?;
    let template = env.get_template("story")?;
    let rendered = template
        .render(context! {
            id => item.id.trim(),
            title => item.title.trim(),
            description => item.description.trim(),
            acceptance => &item.acceptance_criteria,
        })
        .with_context(|| format!("render prompt for story {}", item.id))?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::item;

    #[test]
    fn prompt_leads_with_id_and_title() {
        let story = item("US-7", 1, false);
        let prompt = render_story_prompt(&story).expect("render");
        assert!(prompt.starts_with("Implement story US-7: US-7 title"));
    }

    #[test]
    fn prompt_lists_acceptance_criteria() {
        let mut story = item("US-7", 1, false);
        story.acceptance_criteria = vec!["compiles".to_string(), "has tests".to_string()];
        let prompt = render_story_prompt(&story).expect("render");
        assert!(prompt.contains("US-7 description"));
        assert!(prompt.contains("- [ ] compiles"));
        assert!(prompt.contains("- [ ] has tests"));
    }

    #[test]
    fn prompt_omits_empty_sections() {
        let mut story = item("US-7", 1, false);
        story.description.clear();
        story.acceptance_criteria.clear();
        let prompt = render_story_prompt(&story).expect("render");
        assert_eq!(prompt.trim_end(), "Implement story US-7: US-7 title");
    }
}
