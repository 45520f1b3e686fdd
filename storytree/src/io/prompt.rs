//! Oracle prompt rendering.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::tree::{Node, NodeKind};

const COMPLETION_CHECK_TEMPLATE: &str = include_str!("prompts/completion_check.md");
const BRANCH_CHECK_TEMPLATE: &str = include_str!("prompts/branch_check.md");
const BREAKDOWN_TEMPLATE: &str = include_str!("prompts/breakdown.md");

/// The last user/assistant exchange fed into classification prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("completion_check", COMPLETION_CHECK_TEMPLATE)
            .expect("completion_check template should be valid");
        env.add_template("branch_check", BRANCH_CHECK_TEMPLATE)
            .expect("branch_check template should be valid");
        env.add_template("breakdown", BREAKDOWN_TEMPLATE)
            .expect("breakdown template should be valid");
        Self { env }
    }

    /// Strict yes/no check for a task node against the latest exchange.
    pub fn render_completion_check(&self, exchange: &Exchange, description: &str) -> Result<String> {
        let template = self.env.get_template("completion_check")?;
        let rendered = template.render(context! {
            user => exchange.user.trim(),
            assistant => exchange.assistant.trim(),
            description => description.trim(),
        })?;
        Ok(rendered)
    }

    /// Numbered-branch check for a choice node (1-based list, 0 = none).
    pub fn render_branch_check(
        &self,
        exchange: &Exchange,
        description: &str,
        branches: &[String],
    ) -> Result<String> {
        let template = self.env.get_template("branch_check")?;
        let rendered = template.render(context! {
            user => exchange.user.trim(),
            assistant => exchange.assistant.trim(),
            description => description.trim(),
            branches => branches,
        })?;
        Ok(rendered)
    }

    /// Objective + instruction prompt for outline generation.
    pub fn render_breakdown(&self, objective: &str, instruction: &str) -> Result<String> {
        let template = self.env.get_template("breakdown")?;
        let rendered = template.render(context! {
            objective => objective.trim(),
            instruction => instruction.trim(),
        })?;
        Ok(rendered)
    }
}

/// Status line describing the frontier node, for injection into the host
/// conversation's prompt.
pub fn injection_text(node: &Node) -> String {
    let label = match node.kind {
        NodeKind::Task => "Current task",
        NodeKind::Choice => "Current choice",
    };
    match node.perspective.as_deref() {
        Some(perspective) if !perspective.trim().is_empty() => {
            format!(
                "[{label}: {}]\n[Perspective: {}]",
                node.description.trim(),
                perspective.trim()
            )
        }
        _ => format!("[{label}: {}]", node.description.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::{Exchange, PromptEngine, injection_text};
    use crate::test_support::{choice, task};

    fn exchange() -> Exchange {
        Exchange {
            user: "I open the gate".to_string(),
            assistant: "The gate creaks open.".to_string(),
        }
    }

    #[test]
    fn completion_check_includes_exchange_and_description() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_completion_check(&exchange(), "open the gate")
            .expect("render");

        assert!(prompt.contains("User: I open the gate"));
        assert!(prompt.contains("open the gate"));
        assert!(prompt.contains("\"yes\" or \"no\""));
    }

    #[test]
    fn branch_check_numbers_branches_from_one() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_branch_check(
                &exchange(),
                "which road?",
                &["left".to_string(), "right".to_string()],
            )
            .expect("render");

        assert!(prompt.contains("1. left"));
        assert!(prompt.contains("2. right"));
        assert!(prompt.contains("answer \"0\""));
    }

    #[test]
    fn injection_text_reflects_kind_and_perspective() {
        assert_eq!(injection_text(&task(1, "find the key")), "[Current task: find the key]");
        assert_eq!(
            injection_text(&choice(2, "which road?")),
            "[Current choice: which road?]"
        );

        let mut annotated = task(3, "run");
        annotated.perspective = Some("as the fox".to_string());
        assert_eq!(
            injection_text(&annotated),
            "[Current task: run]\n[Perspective: as the fox]"
        );
    }
}
