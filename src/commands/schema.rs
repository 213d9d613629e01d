use std::io::Write;

use schemars::schema_for;

use crate::config::Config;

/// Print the JSON Schema for `jira-agent.toml`.
pub fn execute() -> anyhow::Result<()> {
    let schema = schema_for!(Config);
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &schema)?;
    writeln!(stdout)?;
    Ok(())
}
