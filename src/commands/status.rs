use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use super::GlobalArgs;
use crate::workspace::{WorkspaceEntry, WorkspaceStore};

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// List claimed workspaces and whether their setup failed.
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub root: PathBuf,
    pub total: usize,
    pub setup_failed: usize,
    pub dispatch_failed: usize,
    pub workspaces: Vec<WorkspaceEntry>,
}

impl StatusReport {
    fn new(root: PathBuf, workspaces: Vec<WorkspaceEntry>) -> Self {
        Self {
            root,
            total: workspaces.len(),
            setup_failed: workspaces.iter().filter(|w| w.setup_failure.is_some()).count(),
            dispatch_failed: workspaces
                .iter()
                .filter(|w| w.dispatch_failure.is_some())
                .count(),
            workspaces,
        }
    }

    fn render_text(&self) -> String {
        let mut out = format!(
            "{} workspaces in {} ({} setup failed, {} dispatch failed)\n",
            self.total,
            self.root.display(),
            self.setup_failed,
            self.dispatch_failed
        );
        for w in &self.workspaces {
            let state = match (&w.setup_failure, &w.dispatch_failure, w.has_output_log) {
                (Some(reason), _, _) => format!("setup failed: {reason}"),
                (None, Some(reason), _) => format!("dispatch failed: {reason}"),
                (None, None, true) => "dispatched".to_string(),
                (None, None, false) => "claimed".to_string(),
            };
            out.push_str(&format!("  {:<16} {state}\n", w.key));
        }
        out
    }
}

impl StatusArgs {
    pub fn execute(&self, global: &GlobalArgs) -> anyhow::Result<()> {
        let config = global.load_config()?;
        let root = &config.workspaces.root;
        // Reporting must not create the root as a side effect.
        let workspaces = if root.is_dir() {
            WorkspaceStore::open(root)?.list()?
        } else {
            Vec::new()
        };
        let report = StatusReport::new(root.clone(), workspaces);

        match self.format {
            OutputFormat::Text => print!("{}", report.render_text()),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }
        Ok(())
    }
}
