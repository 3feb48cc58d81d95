use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cadence_calendar::google::http_client;
use cadence_calendar::{CredentialStore, OAuthRefresher};
use cadence_core::config::{AppConfig, CalendarConfig, LoadOptions, PlannerProvider};
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_CONFIG, EXIT_DONE};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 3] =
    ["planner_credentials", "calendar_credentials", "transcript_readable"];

pub fn run(json_output: bool, config_path: Option<&Path>) -> CommandResult {
    let report = build_report(config_path);
    let exit_code = if report.overall_status == CheckStatus::Pass { EXIT_DONE } else { EXIT_CONFIG };

    if json_output {
        return CommandResult::json(exit_code, &report);
    }
    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(config_path: Option<&Path>) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions {
        config_path: config_path.map(Path::to_path_buf),
        ..LoadOptions::default()
    }) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_planner_credentials(&config));
            checks.push(check_calendar_credentials(&config.calendar));
            checks.push(check_transcript(&config.session.transcript_path));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_planner_credentials(config: &AppConfig) -> DoctorCheck {
    let planner = &config.planner;
    match (planner.provider, planner.api_key.is_some()) {
        (_, true) => DoctorCheck::pass(
            "planner_credentials",
            format!("api key present for {} at {}", planner.model, planner.effective_base_url()),
        ),
        (PlannerProvider::Ollama, false) => DoctorCheck::pass(
            "planner_credentials",
            format!("local provider at {} needs no key", planner.effective_base_url()),
        ),
        (PlannerProvider::OpenAi, false) => DoctorCheck::fail(
            "planner_credentials",
            "no api key (set CADENCE_PLANNER_API_KEY or OPENAI_API_KEY)",
        ),
    }
}

fn check_calendar_credentials(calendar: &CalendarConfig) -> DoctorCheck {
    if calendar.client_id.is_some()
        && calendar.client_secret.is_some()
        && calendar.refresh_token.is_some()
    {
        return DoctorCheck::pass(
            "calendar_credentials",
            "oauth client and refresh token configured",
        );
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "calendar_credentials",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let usable = runtime.block_on(async {
        let client = http_client(Duration::from_secs(calendar.request_timeout_secs))?;
        let refresher = Arc::new(OAuthRefresher::from_config(client, calendar));
        let store = CredentialStore::persisted(refresher, calendar.token_path.clone()).await;
        Ok::<bool, cadence_core::errors::GatewayError>(store.has_usable_token().await)
    });

    match usable {
        Ok(true) => DoctorCheck::pass(
            "calendar_credentials",
            format!("unexpired token in `{}`", calendar.token_path.display()),
        ),
        Ok(false) => DoctorCheck::fail(
            "calendar_credentials",
            format!(
                "no refresh credentials configured and no usable token in `{}`",
                calendar.token_path.display()
            ),
        ),
        Err(error) => DoctorCheck::fail("calendar_credentials", error.to_string()),
    }
}

fn check_transcript(path: &Path) -> DoctorCheck {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => DoctorCheck::pass(
            "transcript_readable",
            format!("`{}` ({} bytes)", path.display(), metadata.len()),
        ),
        Ok(_) => DoctorCheck::fail("transcript_readable", format!("`{}` is not a file", path.display())),
        Err(error) => DoctorCheck::fail("transcript_readable", format!("`{}`: {error}", path.display())),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];
    lines.extend(report.checks.iter().map(|check| {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        format!("- [{marker}] {}: {}", check.name, check.details)
    }));
    lines.join("\n")
}
