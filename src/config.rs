use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Config file looked up in the current directory.
pub const CONFIG_TOML: &str = "jira-agent.toml";

/// Find the config file: `./jira-agent.toml`, then
/// `<config dir>/jira-agent/config.toml`. Returns None if neither exists.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    let local = dir.join(CONFIG_TOML);
    if local.exists() {
        return Some(local);
    }
    let user = dirs::config_dir()?.join("jira-agent").join("config.toml");
    if user.exists() {
        return Some(user);
    }
    None
}

/// Top-level jira-agent.toml config.
///
/// Every section is optional. Credentials are deliberately absent: the API
/// token only comes from the environment or the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub jira: JiraConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub workspaces: WorkspacesConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Repositories to check out as worktrees in every workspace, in order.
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct JiraConfig {
    /// Jira site, e.g. `acme.atlassian.net`
    #[serde(default)]
    pub host: Option<String>,
    /// Account email used for basic auth
    #[serde(default)]
    pub email: Option<String>,
    /// Label that marks issues for the agent
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkspacesConfig {
    /// Directory holding one workspace per issue
    #[serde(default = "default_workspaces_root")]
    pub root: PathBuf,
    /// Directory holding the existing clones, one per repository name
    #[serde(default = "default_repos_root")]
    pub repos_root: PathBuf,
}

impl Default for WorkspacesConfig {
    fn default() -> Self {
        Self {
            root: default_workspaces_root(),
            repos_root: default_repos_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentConfig {
    /// Agent executable
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments placed before the prompt
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Flag that precedes the prompt; empty passes the prompt positionally
    #[serde(default = "default_prompt_flag")]
    pub prompt_flag: String,
    /// Optional agent profile, passed as `--profile <id>`
    #[serde(default)]
    pub profile_id: Option<String>,
    /// Command the agent runs to post comments back to the issue
    #[serde(default = "default_comment_command")]
    pub comment_command: String,
    /// Maximum number of agents running at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            prompt_flag: default_prompt_flag(),
            profile_id: None,
            comment_command: default_comment_command(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// A repository to provision as a worktree, as `owner/name` plus the branch
/// the per-issue branch starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Repository {
    pub url: String,
    pub branch: String,
}

fn re_repository_url() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("repository regex is valid")
    })
}

impl Repository {
    /// Repository name: the part after the owner, without a `.git` suffix.
    pub fn name(&self) -> &str {
        let url = self.url.strip_suffix(".git").unwrap_or(&self.url);
        url.rsplit('/').next().unwrap_or(url)
    }

    fn validate(&self) -> Result<(), String> {
        let url = self.url.strip_suffix(".git").unwrap_or(&self.url);
        if !re_repository_url().is_match(url) {
            return Err(format!(
                "invalid repository url {:?}: expected owner/name",
                self.url
            ));
        }
        if matches!(self.name(), "." | "..") {
            return Err(format!("invalid repository name in {:?}", self.url));
        }
        if self.branch.trim().is_empty() {
            return Err(format!("repository {:?} has an empty branch", self.url));
        }
        Ok(())
    }
}

fn default_interval_secs() -> u64 { 5 }
fn default_page_size() -> u32 { crate::tracker::DEFAULT_PAGE_SIZE }
fn default_workspaces_root() -> PathBuf { PathBuf::from("workspaces") }
fn default_repos_root() -> PathBuf { PathBuf::from("repos") }
fn default_program() -> String { "warp-cli-dev".into() }
fn default_args() -> Vec<String> { vec!["agent".into(), "run".into(), "--debug".into()] }
fn default_prompt_flag() -> String { "--prompt".into() }
fn default_comment_command() -> String { "jira-agent".into() }
fn default_max_concurrent() -> usize { 4 }

impl Config {
    /// Load and validate config from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse_toml(&contents)
    }

    /// Parse and validate config from a TOML string.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_TOML}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later, mid-poll.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut problems = Vec::new();

        if self.poll.interval_secs == 0 {
            problems.push("poll.interval_secs must be at least 1".to_string());
        }
        if self.poll.page_size == 0 {
            problems.push("poll.page_size must be at least 1".to_string());
        }
        if self.agent.program.trim().is_empty() {
            problems.push("agent.program must not be empty".to_string());
        }
        if self.agent.max_concurrent == 0 {
            problems.push("agent.max_concurrent must be at least 1".to_string());
        }

        let mut names = HashSet::new();
        for repo in &self.repositories {
            if let Err(problem) = repo.validate() {
                problems.push(problem);
            } else if !names.insert(repo.name()) {
                problems.push(format!(
                    "duplicate repository name {:?} (from {:?})",
                    repo.name(),
                    repo.url
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ExitError::Config(problems.join("; ")).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_toml_config() {
        let toml_str = r#"
[jira]
host = "acme.atlassian.net"
email = "bot@acme.io"
label = "agent-assign"

[poll]
interval_secs = 10
page_size = 25

[workspaces]
root = "/srv/agent/workspaces"
repos_root = "/srv/agent/repos"

[agent]
program = "claude"
args = ["-p"]
prompt_flag = ""
profile_id = "prof-1"
comment_command = "/usr/local/bin/jira-agent"
max_concurrent = 2

[[repositories]]
url = "acme/server"
branch = "main"

[[repositories]]
url = "acme/client.git"
branch = "develop"
"#;
        let config = Config::parse_toml(toml_str).unwrap();
        assert_eq!(config.jira.host.as_deref(), Some("acme.atlassian.net"));
        assert_eq!(config.jira.label.as_deref(), Some("agent-assign"));
        assert_eq!(config.poll.interval_secs, 10);
        assert_eq!(config.poll.page_size, 25);
        assert_eq!(config.workspaces.root, PathBuf::from("/srv/agent/workspaces"));
        assert_eq!(config.agent.program, "claude");
        assert_eq!(config.agent.prompt_flag, "");
        assert_eq!(config.agent.profile_id.as_deref(), Some("prof-1"));
        assert_eq!(config.agent.max_concurrent, 2);
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.repositories[0].name(), "server");
        assert_eq!(config.repositories[1].name(), "client");
        assert_eq!(config.repositories[1].branch, "develop");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse_toml("").unwrap();
        assert_eq!(config.poll.interval_secs, 5);
        assert_eq!(config.poll.page_size, 50);
        assert_eq!(config.workspaces.root, PathBuf::from("workspaces"));
        assert_eq!(config.workspaces.repos_root, PathBuf::from("repos"));
        assert_eq!(config.agent.program, "warp-cli-dev");
        assert_eq!(config.agent.args, vec!["agent", "run", "--debug"]);
        assert_eq!(config.agent.prompt_flag, "--prompt");
        assert_eq!(config.agent.comment_command, "jira-agent");
        assert_eq!(config.agent.max_concurrent, 4);
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn repository_without_owner_is_a_config_error() {
        let err = Config::parse_toml(
            r#"
[[repositories]]
url = "server"
branch = "main"
"#,
        )
        .unwrap_err();
        let exit = err.downcast_ref::<ExitError>().unwrap();
        assert!(matches!(exit, ExitError::Config(_)));
        assert!(err.to_string().contains("expected owner/name"));
    }

    #[test]
    fn repository_missing_branch_fails_to_parse() {
        let err = Config::parse_toml(
            r#"
[[repositories]]
url = "acme/server"
"#,
        )
        .unwrap_err();
        assert!(err.downcast_ref::<ExitError>().is_some());
    }

    #[test]
    fn duplicate_repository_names_are_rejected() {
        let err = Config::parse_toml(
            r#"
[[repositories]]
url = "acme/server"
branch = "main"

[[repositories]]
url = "other/server"
branch = "main"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate repository name"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = Config::parse_toml(
            r#"
[poll]
interval_secs = 0

[agent]
max_concurrent = 0
"#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("poll.interval_secs"));
        assert!(msg.contains("agent.max_concurrent"));
    }

    #[test]
    fn repository_rejects_traversal_names() {
        let repo = Repository {
            url: "acme/..".into(),
            branch: "main".into(),
        };
        assert!(repo.validate().is_err());
        let repo = Repository {
            url: "../etc/passwd".into(),
            branch: "main".into(),
        };
        assert!(repo.validate().is_err());
    }
}
