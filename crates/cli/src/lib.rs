pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "cadence",
    about = "Cadence scheduling assistant",
    long_about = "Turn a conversation transcript into calendar actions through a planner/executor dialogue, and inspect the runtime configuration.",
    after_help = "Examples:\n  cadence run --transcript conversation.md\n  cadence run --reference-time 2025-01-22T09:00:00+05:00 --json\n  cadence doctor --json\n  cadence config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to the TOML config file (default: cadence.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run one scheduling session over a transcript and report its outcome")]
    Run {
        #[arg(long, help = "Transcript to read (default: session.transcript_path)")]
        transcript: Option<PathBuf>,
        #[arg(long, help = "Reference time with the session offset (default: now)")]
        reference_time: Option<String>,
        #[arg(long, help = "Maximum number of planner turns")]
        turn_budget: Option<u32>,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, planner credentials, and calendar credential readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config;

    let result = match cli.command {
        Command::Run { transcript, reference_time, turn_budget, json } => {
            commands::run::run(commands::run::RunArgs {
                config_path,
                transcript,
                reference_time,
                turn_budget,
                json,
            })
        }
        Command::Config => commands::CommandResult {
            exit_code: 0,
            output: commands::config::run(config_path.as_deref()),
        },
        Command::Doctor { json } => commands::doctor::run(json, config_path.as_deref()),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
