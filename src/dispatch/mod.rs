//! Dispatching agents into claimed workspaces.
//!
//! [`handle_issue`] is the per-issue step of a drain: claim the workspace,
//! then hand the issue to the [`DispatchPool`]. A pool worker runs
//! [`Dispatcher::run`], which provisions worktrees and runs the agent to
//! completion with its output in `output.log`.

pub mod pool;

use std::fs::File;
use std::path::PathBuf;

use tracing::{error, info, info_span, warn};

use crate::config::AgentConfig;
use crate::subprocess::Tool;
use crate::template::{PromptContext, render_agent_prompt};
use crate::tracker::Issue;
use crate::tracker::jira::{ENV_EMAIL, ENV_HOST, ENV_TOKEN, JiraCredentials};
use crate::workspace::{Claim, OUTPUT_LOG, WorkspaceStore};
use crate::worktree::WorktreeProvisioner;

pub use pool::{DispatchPool, DispatchRecord, DispatchRegistry, DispatchState};

/// An issue whose workspace has been claimed and that waits for an agent.
#[derive(Debug, Clone)]
pub struct Job {
    pub issue: Issue,
    pub workspace: PathBuf,
}

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The agent exited with status 0.
    Completed,
    /// The agent ran and exited unsuccessfully (`None` when killed by a signal).
    AgentFailed { exit_code: Option<i32> },
    /// Workspace setup failed; the agent was never started.
    SetupFailed(String),
    /// The agent process could not be started or waited on.
    LaunchFailed(String),
}

/// The external agent invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub prompt_flag: String,
    pub profile_id: Option<String>,
    /// Extra environment for the agent, e.g. the Jira settings its comment
    /// command needs.
    pub env: Vec<(String, String)>,
}

impl std::fmt::Debug for AgentCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("AgentCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("prompt_flag", &self.prompt_flag)
            .field("profile_id", &self.profile_id)
            .field("env", &env_keys)
            .finish()
    }
}

impl AgentCommand {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            prompt_flag: config.prompt_flag.clone(),
            profile_id: config.profile_id.clone().filter(|p| !p.is_empty()),
            env: Vec::new(),
        }
    }

    /// Hand the Jira connection to the agent through `JIRA_AGENT_*`
    /// variables, so `comment` works from inside the workspace.
    #[must_use]
    pub fn with_credentials(mut self, credentials: &JiraCredentials) -> Self {
        self.env.extend([
            (ENV_HOST.to_string(), credentials.host.clone()),
            (ENV_EMAIL.to_string(), credentials.email.clone()),
            (ENV_TOKEN.to_string(), credentials.token.clone()),
        ]);
        self
    }

    /// `<program> <args..> [<prompt-flag>] <prompt> [--profile <id>]`, in its
    /// own process group so an interrupt meant for the poller spares it.
    pub fn tool(&self, prompt: &str) -> Tool {
        let mut tool = Tool::new(&self.program)
            .args(self.args.as_slice())
            .new_process_group();
        for (key, value) in &self.env {
            tool = tool.env(key, value);
        }
        if !self.prompt_flag.is_empty() {
            tool = tool.arg(&self.prompt_flag);
        }
        tool = tool.arg(prompt);
        if let Some(profile) = &self.profile_id {
            tool = tool.arg("--profile").arg(profile);
        }
        tool
    }
}

/// Everything a pool worker needs to take a job from claim to agent exit.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    provisioner: WorktreeProvisioner,
    agent: AgentCommand,
    comment_command: String,
}

impl Dispatcher {
    pub fn new(provisioner: WorktreeProvisioner, agent: AgentCommand, comment_command: &str) -> Self {
        Self {
            provisioner,
            agent,
            comment_command: comment_command.to_string(),
        }
    }

    /// Set up the workspace and run the agent to completion. No timeout.
    pub fn run(&self, job: &Job) -> DispatchOutcome {
        let key = &job.issue.key;
        let log_path = job.workspace.join(OUTPUT_LOG);
        let span = info_span!("dispatch", key = %key, log_path = %log_path.display());
        let _guard = span.enter();

        let log = match File::create(&log_path) {
            Ok(file) => file,
            Err(e) => {
                error!(error = %e, "failed to create output log file");
                return Self::record_failure(job, DispatchOutcome::SetupFailed(e.to_string()));
            }
        };

        let worktrees = match self.provisioner.provision(&job.workspace, key) {
            Ok(worktrees) => worktrees,
            Err(e) => {
                error!(
                    repository = e.repository(),
                    error = %e,
                    "failed to set up repository worktrees"
                );
                return Self::record_failure(job, DispatchOutcome::SetupFailed(e.to_string()));
            }
        };

        let ctx = PromptContext::new(&job.issue, &job.workspace, &worktrees, &self.comment_command);
        let prompt = match render_agent_prompt(&ctx) {
            Ok(prompt) => prompt,
            Err(e) => {
                error!(error = %format!("{e:#}"), "failed to render agent prompt");
                return Self::record_failure(job, DispatchOutcome::SetupFailed(format!("{e:#}")));
            }
        };

        let tool = self.agent.tool(&prompt).current_dir(&job.workspace);
        info!(program = tool.program(), "starting agent");
        let mut child = match tool.spawn_logged(&log) {
            Ok(child) => child,
            Err(e) => {
                error!(error = %format!("{e:#}"), "failed to start agent");
                return Self::record_failure(job, DispatchOutcome::LaunchFailed(format!("{e:#}")));
            }
        };

        match child.wait() {
            Ok(status) if status.success() => {
                info!("agent completed");
                DispatchOutcome::Completed
            }
            Ok(status) => {
                error!(exit_code = ?status.code(), "agent command failed");
                DispatchOutcome::AgentFailed {
                    exit_code: status.code(),
                }
            }
            Err(e) => {
                error!(error = %e, "failed waiting for agent");
                Self::record_failure(job, DispatchOutcome::LaunchFailed(e.to_string()))
            }
        }
    }

    /// The claim stays; leave a marker so operators can find the workspace.
    /// Setup failures and agent launch failures get different markers.
    fn record_failure(job: &Job, outcome: DispatchOutcome) -> DispatchOutcome {
        let written = match &outcome {
            DispatchOutcome::SetupFailed(reason) => {
                WorkspaceStore::mark_setup_failed(&job.workspace, reason)
            }
            DispatchOutcome::LaunchFailed(reason) => {
                WorkspaceStore::mark_dispatch_failed(&job.workspace, reason)
            }
            DispatchOutcome::Completed | DispatchOutcome::AgentFailed { .. } => Ok(()),
        };
        if let Err(e) = written {
            warn!(error = %e, "failed to write failure marker");
        }
        outcome
    }
}

/// Claim `issue` and queue it for dispatch when the claim is new.
///
/// `AlreadyClaimed` is the normal outcome for every issue seen in an earlier
/// tick. Claim errors are returned; nothing was claimed, so the issue is
/// retried on the next tick.
pub fn handle_issue(
    store: &WorkspaceStore,
    pool: &DispatchPool,
    issue: &Issue,
) -> anyhow::Result<Claim> {
    let claim = store.claim(&issue.key)?;
    if let Claim::Claimed(workspace) = &claim {
        info!(key = %issue.key, workspace = %workspace.display(), "processing issue");
        pool.submit(Job {
            issue: issue.clone(),
            workspace: workspace.clone(),
        })?;
    }
    Ok(claim)
}
