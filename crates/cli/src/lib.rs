pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "dialgate",
    about = "Dialgate operator CLI",
    long_about = "Operate the Dialgate webhook gateway: migrations, config inspection, readiness checks, vault keys, and workflow blueprints.",
    after_help = "Examples:\n  dialgate doctor --json\n  dialgate config\n  dialgate blueprint --url https://example.com/api/webhooks/ingest --secret <secret> --name \"Front Desk\""
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
    #[command(about = "Validate config, vault key readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Generate a fresh 32-byte vault encryption key")]
    Keygen,
    #[command(about = "Print the workflow blueprint that relays call reports to the ingest endpoint")]
    Blueprint {
        #[arg(long, help = "Public URL of the ingest endpoint")]
        url: String,
        #[arg(long, help = "Agent secret sent in the x-agent-secret header")]
        secret: String,
        #[arg(long, help = "Agent display name")]
        name: String,
        #[arg(long, help = "Workflow name shown in the automation tool")]
        workflow_name: Option<String>,
        #[arg(long, help = "Import the workflow as active")]
        active: bool,
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
        Command::Keygen => commands::keygen::run(),
        Command::Blueprint { url, secret, name, workflow_name, active } => {
            commands::blueprint::run(commands::blueprint::BlueprintArgs {
                url,
                secret,
                name,
                workflow_name,
                active,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
