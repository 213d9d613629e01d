use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::info;

use super::GlobalArgs;
use crate::config::Config;
use crate::dispatch::{AgentCommand, DispatchPool, Dispatcher, handle_issue};
use crate::error::ExitError;
use crate::poller::{DrainOutcome, Poller};
use crate::shutdown::ShutdownSignal;
use crate::tracker::jira::{JiraClient, JiraCredentials};
use crate::tracker::{Issue, Tracker};
use crate::workspace::WorkspaceStore;
use crate::worktree::WorktreeProvisioner;

/// Label used when neither the flag, the environment nor the config names one.
pub const DEFAULT_LABEL: &str = "agent-assign";

#[derive(Debug, Args)]
pub struct PollArgs {
    /// Label that marks issues for the agent
    #[arg(long, env = "JIRA_AGENT_LABEL")]
    pub label: Option<String>,

    /// Seconds between polls
    #[arg(long)]
    pub interval: Option<u64>,

    /// Drain the search once, wait for dispatched agents, and exit
    #[arg(long)]
    pub once: bool,

    /// Maximum number of agents running at once
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Agent profile passed as --profile
    #[arg(long, env = "JIRA_AGENT_PROFILE_ID")]
    pub profile_id: Option<String>,
}

impl PollArgs {
    pub fn execute(&self, global: &GlobalArgs) -> anyhow::Result<()> {
        let mut config = global.load_config()?;
        let label = self.apply(&mut config)?;
        let credentials = global.credentials(&config)?;
        let tracker: Arc<dyn Tracker> = Arc::new(JiraClient::new(&credentials));

        let shutdown = ShutdownSignal::new();
        shutdown.install_handler()?;
        run(tracker, &credentials, &config, &label, self.once, shutdown)
    }

    /// Fold command-line overrides into `config` and resolve the label.
    fn apply(&self, config: &mut Config) -> anyhow::Result<String> {
        if let Some(interval) = self.interval {
            config.poll.interval_secs = interval;
        }
        if let Some(max) = self.max_concurrent {
            config.agent.max_concurrent = max;
        }
        if self.profile_id.is_some() {
            config.agent.profile_id.clone_from(&self.profile_id);
        }
        config.validate()?;

        let label = self
            .label
            .clone()
            .or_else(|| config.jira.label.clone())
            .unwrap_or_else(|| DEFAULT_LABEL.to_string());
        let label = label.trim();
        if label.is_empty() {
            return Err(ExitError::Config("label must not be empty".into()).into());
        }
        Ok(label.to_string())
    }
}

/// Poll `tracker` and dispatch agents until `shutdown` fires (or for one
/// drain with `once`). Returns after every dispatched agent has exited.
///
/// `credentials` are handed to each agent's environment for its comment
/// command.
pub fn run(
    tracker: Arc<dyn Tracker>,
    credentials: &JiraCredentials,
    config: &Config,
    label: &str,
    once: bool,
    shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    let store = WorkspaceStore::open(&config.workspaces.root)?;
    let dispatcher = Dispatcher::new(
        WorktreeProvisioner::new(&config.workspaces.repos_root, config.repositories.clone()),
        AgentCommand::from_config(&config.agent).with_credentials(credentials),
        &config.agent.comment_command,
    );
    let mut pool = DispatchPool::start(config.agent.max_concurrent, dispatcher)?;

    let mut poller = Poller::new(
        tracker,
        label,
        config.poll.page_size,
        Duration::from_secs(config.poll.interval_secs),
        shutdown,
    );
    info!(
        workspaces = %store.root().display(),
        repositories = config.repositories.len(),
        max_concurrent = config.agent.max_concurrent,
        "jira agent started"
    );

    let mut handler = |issue: &Issue| handle_issue(&store, &pool, issue).map(|_| ());
    let result = if once {
        let report = poller.drain(&mut handler);
        info!(
            pages = report.pages,
            issues = report.issues,
            handler_errors = report.handler_errors,
            "drain finished"
        );
        match report.outcome {
            DrainOutcome::Exhausted => Ok(()),
            DrainOutcome::Failed => {
                Err(ExitError::Tracker(format!("searching issues labeled {label:?} failed")).into())
            }
            DrainOutcome::Interrupted => Err(ExitError::Interrupted.into()),
        }
    } else {
        poller.run(handler);
        Ok(())
    };

    pool.shutdown();
    info!("all dispatched agents finished");
    result
}
