pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "fixflow",
    about = "FixFlow operator CLI",
    long_about = "Inspect configuration, apply migrations, check readiness, and chat with a FixFlow domain agent from the terminal.",
    after_help = "Examples:\n  fixflow doctor --json\n  fixflow config\n  fixflow chat --domain bank --session demo-1"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model endpoint readiness, and session store checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Talk to one domain agent over stdin, one message per line")]
    Chat {
        #[arg(long, help = "Domain key, e.g. bank, hospital or ecommerce")]
        domain: String,
        #[arg(long, help = "Session id to continue; a fresh one is generated when omitted")]
        session: Option<String>,
        #[arg(long, help = "Keep the conversation in memory instead of the configured database")]
        ephemeral: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Chat { domain, session, ephemeral } => {
            commands::chat::run(commands::chat::ChatOptions { domain, session, ephemeral })
        }
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
