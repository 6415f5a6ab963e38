pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley operator CLI",
    long_about = "Operate the parley dialogue service: migrations, readiness checks, config inspection, decision explanations and conversation expiry.",
    after_help = "Examples:\n  parley doctor --json\n  parley explain --user u1 \"Calculate 25 + 15\"\n  parley expire --older-than-days 7"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and seed the outlet directory")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, schema version and outlet data")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Show the decision the planner would make for a message, without side effects"
    )]
    Explain {
        #[arg(long, help = "User the message is attributed to")]
        user: String,
        #[arg(long, help = "Existing conversation to read prior-turn context from")]
        conversation: Option<String>,
        message: String,
    },
    #[command(about = "Delete conversations idle for longer than the retention window")]
    Expire {
        #[arg(long, help = "Override store.retention_days for this run")]
        older_than_days: Option<u32>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Explain { user, conversation, message } => {
            commands::explain::run(&user, &message, conversation.as_deref())
        }
        Command::Expire { older_than_days } => commands::expire::run(older_than_days),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
