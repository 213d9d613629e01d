//! jira-agent - poll Jira for labeled issues and dispatch coding agents into
//! per-issue workspaces

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod poller;
pub mod shutdown;
pub mod subprocess;
pub mod telemetry;
pub mod template;
pub mod tracker;
pub mod workspace;
pub mod worktree;
