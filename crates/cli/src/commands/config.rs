use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use cadence_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::SecretString;
use toml::Value;

/// One rendered config field: dotted key, display value, and the env vars that can set it.
struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run(config_path: Option<&Path>) -> String {
    let config = match AppConfig::load(LoadOptions {
        config_path: config_path.map(Path::to_path_buf),
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = resolve_config_path(config_path);
    let file_doc = load_config_file_doc(file_path.as_deref());

    let fields = [
        Field::new(
            "session.utc_offset",
            config.session.utc_offset.to_string(),
            &["CADENCE_SESSION_UTC_OFFSET"],
        ),
        Field::new(
            "session.turn_budget",
            config.session.turn_budget.to_string(),
            &["CADENCE_SESSION_TURN_BUDGET"],
        ),
        Field::new(
            "session.transcript_path",
            config.session.transcript_path.display().to_string(),
            &["CADENCE_SESSION_TRANSCRIPT_PATH"],
        ),
        Field::new("planner.provider", config.planner.provider.as_str(), &["CADENCE_PLANNER_PROVIDER"]),
        Field::new("planner.model", config.planner.model.clone(), &["CADENCE_PLANNER_MODEL"]),
        Field::new(
            "planner.base_url",
            config.planner.effective_base_url(),
            &["CADENCE_PLANNER_BASE_URL"],
        ),
        Field::new(
            "planner.api_key",
            redact(config.planner.api_key.as_ref()),
            &["CADENCE_PLANNER_API_KEY", "OPENAI_API_KEY"],
        ),
        Field::new(
            "planner.timeout_secs",
            config.planner.timeout_secs.to_string(),
            &["CADENCE_PLANNER_TIMEOUT_SECS"],
        ),
        Field::new(
            "planner.temperature",
            config.planner.temperature.to_string(),
            &["CADENCE_PLANNER_TEMPERATURE"],
        ),
        Field::new("calendar.base_url", config.calendar.base_url.clone(), &["CADENCE_CALENDAR_BASE_URL"]),
        Field::new("calendar.calendar_id", config.calendar.calendar_id.clone(), &["CADENCE_CALENDAR_ID"]),
        Field::new(
            "calendar.time_zone",
            config.calendar.time_zone.clone(),
            &["CADENCE_CALENDAR_TIME_ZONE"],
        ),
        Field::new(
            "calendar.token_url",
            config.calendar.token_url.clone(),
            &["CADENCE_CALENDAR_TOKEN_URL"],
        ),
        Field::new(
            "calendar.client_id",
            config.calendar.client_id.as_deref().unwrap_or("<unset>"),
            &["CADENCE_CALENDAR_CLIENT_ID"],
        ),
        Field::new(
            "calendar.client_secret",
            redact(config.calendar.client_secret.as_ref()),
            &["CADENCE_CALENDAR_CLIENT_SECRET"],
        ),
        Field::new(
            "calendar.refresh_token",
            redact(config.calendar.refresh_token.as_ref()),
            &["CADENCE_CALENDAR_REFRESH_TOKEN"],
        ),
        Field::new(
            "calendar.token_path",
            config.calendar.token_path.display().to_string(),
            &["CADENCE_CALENDAR_TOKEN_PATH"],
        ),
        Field::new(
            "calendar.request_timeout_secs",
            config.calendar.request_timeout_secs.to_string(),
            &["CADENCE_CALENDAR_REQUEST_TIMEOUT_SECS"],
        ),
        Field::new(
            "logging.level",
            config.logging.level.clone(),
            &["CADENCE_LOGGING_LEVEL", "CADENCE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            config.logging.format.as_str(),
            &["CADENCE_LOGGING_FORMAT", "CADENCE_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|field| {
        let source = field_source(field, file_doc.as_ref(), file_path.as_deref());
        format!("- {} = {} (source: {source})", field.key, field.value)
    }));
    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(field: &Field, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if file_doc.is_some_and(|doc| contains_path(doc, field.key)) {
        let file = file_path.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("config file"));
        return format!("file ({})", file.display());
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |current, key| current.get(key)).is_some()
}

fn redact(secret: Option<&SecretString>) -> &'static str {
    match secret {
        Some(_) => "<redacted>",
        None => "<unset>",
    }
}
