pub mod comment;
pub mod poll;
pub mod schema;
pub mod status;

use std::path::PathBuf;

use clap::Args;

use crate::config::{Config, find_config};
use crate::error::ExitError;
use crate::telemetry::LogFormat;
use crate::tracker::jira::{ENV_EMAIL, ENV_HOST, ENV_TOKEN, JiraCredentials};

/// Options accepted by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Config file (default: ./jira-agent.toml, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Jira site, e.g. acme.atlassian.net
    #[arg(long, global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Account email for the Jira API
    #[arg(long, global = true, env = ENV_EMAIL)]
    pub email: Option<String>,

    /// Jira API token
    #[arg(long, global = true, env = ENV_TOKEN, hide_env_values = true)]
    pub token: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl GlobalArgs {
    /// Load the config file named by `--config`, or the first one found.
    /// No file at all means defaults; a named file that is missing is an error.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let path = match &self.config {
            Some(path) if !path.is_file() => {
                return Err(ExitError::Config(format!(
                    "config file {} not found",
                    path.display()
                ))
                .into());
            }
            Some(path) => Some(path.clone()),
            None => find_config(&std::env::current_dir()?),
        };
        match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Config::load(&path)
            }
            None => Ok(Config::default()),
        }
    }

    /// Credentials from flags and environment, falling back to the config
    /// file for host and email. The token never comes from the file.
    pub fn credentials(&self, config: &Config) -> anyhow::Result<JiraCredentials> {
        let host = non_empty(self.host.as_ref().or(config.jira.host.as_ref()))
            .ok_or_else(|| missing("Jira host", "--host", ENV_HOST))?;
        let email = non_empty(self.email.as_ref().or(config.jira.email.as_ref()))
            .ok_or_else(|| missing("Jira email", "--email", ENV_EMAIL))?;
        let token = non_empty(self.token.as_ref())
            .ok_or_else(|| missing("Jira API token", "--token", ENV_TOKEN))?;
        Ok(JiraCredentials { host, email, token })
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(String::from)
}

fn missing(what: &str, flag: &str, var: &str) -> ExitError {
    ExitError::Config(format!("{what} is required (set {flag} or {var})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> GlobalArgs {
        GlobalArgs {
            config: None,
            host: None,
            email: None,
            token: None,
            log_format: LogFormat::Pretty,
        }
    }

    #[test]
    fn flags_win_over_config_file() {
        let mut config = Config::default();
        config.jira.host = Some("file.atlassian.net".into());
        config.jira.email = Some("file@acme.io".into());
        let global = GlobalArgs {
            host: Some("flag.atlassian.net".into()),
            token: Some("t".into()),
            ..args()
        };
        let creds = global.credentials(&config).unwrap();
        assert_eq!(creds.host, "flag.atlassian.net");
        assert_eq!(creds.email, "file@acme.io");
        assert_eq!(creds.token, "t");
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let mut config = Config::default();
        config.jira.host = Some("acme.atlassian.net".into());
        config.jira.email = Some("bot@acme.io".into());
        let err = args().credentials(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::Config(_))
        ));
        assert!(err.to_string().contains("JIRA_AGENT_TOKEN"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let global = GlobalArgs {
            host: Some("  ".into()),
            email: Some("bot@acme.io".into()),
            token: Some("t".into()),
            ..args()
        };
        let err = global.credentials(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("Jira host"));
    }

    #[test]
    fn named_config_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let global = GlobalArgs {
            config: Some(dir.path().join("nope.toml")),
            ..args()
        };
        let err = global.load_config().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::Config(_))
        ));
    }

    #[test]
    fn named_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[poll]\ninterval_secs = 30\n").unwrap();
        let global = GlobalArgs {
            config: Some(path),
            ..args()
        };
        assert_eq!(global.load_config().unwrap().poll.interval_secs, 30);
    }
}
