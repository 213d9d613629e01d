use clap::Args;

use super::GlobalArgs;
use crate::error::ExitError;
use crate::tracker::jira::JiraClient;
use crate::tracker::{IssueKey, publish_comment};

/// Post a plain-text comment to an issue. Run by dispatched agents.
#[derive(Debug, Args)]
pub struct CommentArgs {
    /// Issue key, e.g. PROJ-123
    #[arg(long)]
    pub issue: String,

    /// Comment text
    pub text: String,
}

impl CommentArgs {
    pub fn execute(&self, global: &GlobalArgs) -> anyhow::Result<()> {
        let key: IssueKey = self
            .issue
            .parse()
            .map_err(|e| ExitError::Other(format!("{e}")))?;
        if self.text.trim().is_empty() {
            return Err(ExitError::Other("comment text must not be empty".into()).into());
        }

        let config = global.load_config()?;
        let client = JiraClient::new(&global.credentials(&config)?);
        let id = publish_comment(&client, &key, &self.text)
            .map_err(|e| ExitError::Tracker(format!("commenting on {key}: {e}")))?;

        println!("{id}");
        Ok(())
    }
}
