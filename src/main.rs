use std::process::ExitCode;

use clap::{Parser, Subcommand};

use jira_agent::commands::comment::CommentArgs;
use jira_agent::commands::poll::PollArgs;
use jira_agent::commands::status::StatusArgs;
use jira_agent::commands::{self, GlobalArgs};
use jira_agent::{error, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "jira-agent",
    version,
    about = "Poll Jira for labeled issues and dispatch coding agents"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll for labeled issues and dispatch an agent for each new one
    Poll(PollArgs),
    /// Add a comment to an issue and print its id
    Comment(CommentArgs),
    /// List claimed workspaces
    Status(StatusArgs),
    /// Print the JSON Schema for jira-agent.toml
    Schema,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Poll(_) => "poll",
            Self::Comment(_) => "comment",
            Self::Status(_) => "status",
            Self::Schema => "schema",
        }
    }
}

fn main() -> ExitCode {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    telemetry::init(cli.global.log_format);

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match &cli.command {
        Commands::Poll(args) => args.execute(&cli.global),
        Commands::Comment(args) => args.execute(&cli.global),
        Commands::Status(args) => args.execute(&cli.global),
        Commands::Schema => commands::schema::execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
