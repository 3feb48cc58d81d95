use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cadence_agent::{ActionExecutor, OpenAiPlanner, SessionController};
use cadence_calendar::google::http_client;
use cadence_calendar::{CredentialStore, GoogleCalendarGateway, OAuthRefresher};
use cadence_core::audit::InMemoryAuditSink;
use cadence_core::config::{AppConfig, CalendarConfig, ConfigOverrides, LoadOptions};
use cadence_core::domain::session::{Role, SessionId, SessionOutcome, SessionStatus, TurnHistory};
use cadence_core::domain::timestamp::ZonedTimestamp;
use cadence_core::registry::ActionRegistry;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::commands::{
    CommandResult, EXIT_ABORTED, EXIT_CALENDAR_INIT, EXIT_CONFIG, EXIT_DONE,
};
use crate::logging::init_logging;

#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub config_path: Option<PathBuf>,
    pub transcript: Option<PathBuf>,
    pub reference_time: Option<String>,
    pub turn_budget: Option<u32>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    command: &'static str,
    status: &'static str,
    error_class: Option<&'static str>,
    message: String,
    session_id: &'a SessionId,
    planner_turns: usize,
    audit_events: usize,
    history: &'a TurnHistory,
}

pub fn run(args: RunArgs) -> CommandResult {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "run",
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                EXIT_CONFIG,
            );
        }
    };
    runtime.block_on(execute(args))
}

pub async fn execute(args: RunArgs) -> CommandResult {
    let config = match AppConfig::load(LoadOptions {
        config_path: args.config_path.clone(),
        require_file: false,
        overrides: ConfigOverrides {
            turn_budget: args.turn_budget,
            transcript_path: args.transcript.clone(),
            ..ConfigOverrides::default()
        },
    }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("run", "config_validation", error.to_string(), EXIT_CONFIG)
        }
    };
    if let Err(error) = init_logging(&config.logging) {
        eprintln!("cadence: {error:#}");
    }

    let offset = config.session.utc_offset;
    let reference = match args.reference_time.as_deref() {
        Some(raw) => match ZonedTimestamp::parse_in(raw, offset) {
            Ok(reference) => reference,
            Err(error) => {
                return CommandResult::failure(
                    "run",
                    "reference_time",
                    format!("--reference-time `{raw}`: {error}"),
                    EXIT_CONFIG,
                );
            }
        },
        None => offset.now(),
    };

    let planner = match OpenAiPlanner::from_config(&config.planner) {
        Ok(planner) => planner,
        Err(error) => {
            return CommandResult::failure("run", "planner_init", error.to_string(), EXIT_CONFIG)
        }
    };
    let gateway = match calendar_gateway(&config.calendar).await {
        Ok(gateway) => gateway,
        Err(error) => {
            return CommandResult::failure(
                "run",
                "calendar_init",
                format!("{error:#}"),
                EXIT_CALENDAR_INIT,
            );
        }
    };

    let audit = Arc::new(InMemoryAuditSink::default());
    let executor = ActionExecutor::new(ActionRegistry::new(offset), gateway)
        .with_deadline(Duration::from_secs(config.calendar.request_timeout_secs))
        .with_audit(audit.clone());
    let controller = SessionController::new(planner, executor);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(event_name = "cli.run.interrupted", "stopping after the current turn");
            on_interrupt.cancel();
        }
    });

    let outcome = controller
        .run_from_path(
            &config.session.transcript_path,
            reference,
            config.session.turn_budget,
            &cancel,
        )
        .await;
    interrupt.abort();

    report(&outcome, audit.events().len(), args.json)
}

async fn calendar_gateway(config: &CalendarConfig) -> Result<GoogleCalendarGateway> {
    let client = http_client(Duration::from_secs(config.request_timeout_secs))
        .context("building calendar http client")?;
    let refresher = Arc::new(OAuthRefresher::from_config(client, config));
    let credentials = CredentialStore::persisted(refresher, config.token_path.clone()).await;
    GoogleCalendarGateway::from_config(config, Arc::new(credentials))
        .with_context(|| format!("calendar `{}` at {}", config.calendar_id, config.base_url))
}

pub fn report(outcome: &SessionOutcome, audit_events: usize, json: bool) -> CommandResult {
    let (exit_code, status, error_class, message) = match &outcome.status {
        SessionStatus::Done => (
            EXIT_DONE,
            "done",
            None,
            format!("session finished after {} planner turns", outcome.history.planner_turns()),
        ),
        SessionStatus::Aborted { fault } => {
            (EXIT_ABORTED, "aborted", Some(fault.code()), fault.to_string())
        }
    };

    if json {
        return CommandResult::json(
            exit_code,
            &RunReport {
                command: "run",
                status,
                error_class,
                message,
                session_id: &outcome.session_id,
                planner_turns: outcome.history.planner_turns(),
                audit_events,
                history: &outcome.history,
            },
        );
    }

    let mut lines = Vec::new();
    for turn in outcome.history.turns() {
        let label = match turn.role {
            Role::System => "system",
            Role::Planner => "planner",
            Role::Executor => "executor",
        };
        if turn.role == Role::Executor {
            lines.push(format!("[{label}]"));
            lines.extend(turn.content.lines().map(|line| format!("  {line}")));
            continue;
        }
        lines.push(format!("[{label}] {}", turn.content.trim()));
        for request in &turn.requests {
            lines.push(format!("  -> {} ({})", request.action_name, request.id));
        }
    }
    lines.push(format!("session {} {status}: {message}", outcome.session_id));

    CommandResult { exit_code, output: lines.join("\n") }
}
