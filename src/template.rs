//! Prompt rendering for dispatched agents.

use std::path::Path;

use minijinja::Environment;
use serde::Serialize;

use crate::tracker::Issue;
use crate::worktree::{self, Worktree};

const AGENT_PROMPT_TEMPLATE: &str = include_str!("templates/agent-prompt.md.jinja");

/// Context data passed to the agent prompt template
#[derive(Debug, Serialize)]
pub struct PromptContext {
    pub key: String,
    pub summary: String,
    /// Full issue as pretty-printed JSON
    pub issue_json: String,
    /// Absolute workspace directory, the only place the agent may write
    pub workspace: String,
    /// Command the agent runs to comment on the issue
    pub comment_command: String,
    /// Branch shared by every worktree of this issue
    pub branch: String,
    pub repositories: Vec<RepositoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct RepositoryEntry {
    pub url: String,
    pub path: String,
}

impl PromptContext {
    pub fn new(
        issue: &Issue,
        workspace: &Path,
        worktrees: &[Worktree],
        comment_command: &str,
    ) -> Self {
        Self {
            key: issue.key.to_string(),
            summary: issue.summary.clone(),
            issue_json: issue.to_pretty_json(),
            workspace: workspace.display().to_string(),
            comment_command: comment_command.to_string(),
            branch: worktree::branch_name(&issue.key),
            repositories: worktrees
                .iter()
                .map(|w| RepositoryEntry {
                    url: w.repository.clone(),
                    path: w.path.display().to_string(),
                })
                .collect(),
        }
    }
}

/// Render the task prompt handed to the agent
pub fn render_agent_prompt(ctx: &PromptContext) -> anyhow::Result<String> {
    let mut env = Environment::new();
    env.add_template("agent-prompt", AGENT_PROMPT_TEMPLATE)?;

    let template = env.get_template("agent-prompt")?;
    let rendered = template.render(ctx)?;

    Ok(rendered)
}
