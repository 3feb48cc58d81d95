use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::timestamp::SessionOffset;

pub const DEFAULT_CONFIG_FILE: &str = "cadence.toml";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
pub const GOOGLE_CALENDAR_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub planner: PlannerConfig,
    pub calendar: CalendarConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub utc_offset: SessionOffset,
    pub turn_budget: u32,
    pub transcript_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct PlannerConfig {
    pub provider: PlannerProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl PlannerConfig {
    pub fn effective_base_url(&self) -> &str {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/'),
            None => match self.provider {
                PlannerProvider::OpenAi => OPENAI_BASE_URL,
                PlannerProvider::Ollama => OLLAMA_BASE_URL,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub base_url: String,
    pub calendar_id: String,
    /// IANA zone label attached to event bodies; the offset check uses `session.utc_offset`.
    pub time_zone: String,
    pub token_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub token_path: PathBuf,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl PlannerProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub utc_offset: Option<SessionOffset>,
    pub turn_budget: Option<u32>,
    pub transcript_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub planner_provider: Option<PlannerProvider>,
    pub planner_model: Option<String>,
    pub planner_api_key: Option<String>,
    pub calendar_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                utc_offset: SessionOffset::default(),
                turn_budget: 8,
                transcript_path: PathBuf::from("conversation.md"),
            },
            planner: PlannerConfig {
                provider: PlannerProvider::OpenAi,
                api_key: None,
                base_url: None,
                model: "gpt-4".to_string(),
                timeout_secs: 60,
                temperature: 0.0,
            },
            calendar: CalendarConfig {
                base_url: GOOGLE_CALENDAR_BASE_URL.to_string(),
                calendar_id: "primary".to_string(),
                time_zone: "Asia/Karachi".to_string(),
                token_url: GOOGLE_TOKEN_URL.to_string(),
                client_id: None,
                client_secret: None,
                refresh_token: None,
                token_path: PathBuf::from("token.json"),
                request_timeout_secs: 20,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for PlannerProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported planner provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(session) = patch.session {
            if let Some(utc_offset) = session.utc_offset {
                self.session.utc_offset = parse_offset("session.utc_offset", &utc_offset)?;
            }
            if let Some(turn_budget) = session.turn_budget {
                self.session.turn_budget = turn_budget;
            }
            if let Some(transcript_path) = session.transcript_path {
                self.session.transcript_path = transcript_path;
            }
        }

        if let Some(planner) = patch.planner {
            if let Some(provider) = planner.provider {
                self.planner.provider = provider;
            }
            if let Some(api_key) = planner.api_key {
                self.planner.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = planner.base_url {
                self.planner.base_url = Some(base_url);
            }
            if let Some(model) = planner.model {
                self.planner.model = model;
            }
            if let Some(timeout_secs) = planner.timeout_secs {
                self.planner.timeout_secs = timeout_secs;
            }
            if let Some(temperature) = planner.temperature {
                self.planner.temperature = temperature;
            }
        }

        if let Some(calendar) = patch.calendar {
            if let Some(base_url) = calendar.base_url {
                self.calendar.base_url = base_url;
            }
            if let Some(calendar_id) = calendar.calendar_id {
                self.calendar.calendar_id = calendar_id;
            }
            if let Some(time_zone) = calendar.time_zone {
                self.calendar.time_zone = time_zone;
            }
            if let Some(token_url) = calendar.token_url {
                self.calendar.token_url = token_url;
            }
            if let Some(client_id) = calendar.client_id {
                self.calendar.client_id = Some(client_id);
            }
            if let Some(client_secret) = calendar.client_secret {
                self.calendar.client_secret = Some(secret_value(client_secret));
            }
            if let Some(refresh_token) = calendar.refresh_token {
                self.calendar.refresh_token = Some(secret_value(refresh_token));
            }
            if let Some(token_path) = calendar.token_path {
                self.calendar.token_path = token_path;
            }
            if let Some(request_timeout_secs) = calendar.request_timeout_secs {
                self.calendar.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CADENCE_SESSION_UTC_OFFSET") {
            self.session.utc_offset = parse_offset("CADENCE_SESSION_UTC_OFFSET", &value)?;
        }
        if let Some(value) = read_env("CADENCE_SESSION_TURN_BUDGET") {
            self.session.turn_budget = parse_u32("CADENCE_SESSION_TURN_BUDGET", &value)?;
        }
        if let Some(value) = read_env("CADENCE_SESSION_TRANSCRIPT_PATH") {
            self.session.transcript_path = PathBuf::from(value);
        }

        if let Some(value) = read_env("CADENCE_PLANNER_PROVIDER") {
            self.planner.provider = value.parse()?;
        }
        let api_key = read_env("CADENCE_PLANNER_API_KEY").or_else(|| read_env("OPENAI_API_KEY"));
        if let Some(value) = api_key {
            self.planner.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CADENCE_PLANNER_BASE_URL") {
            self.planner.base_url = Some(value);
        }
        if let Some(value) = read_env("CADENCE_PLANNER_MODEL") {
            self.planner.model = value;
        }
        if let Some(value) = read_env("CADENCE_PLANNER_TIMEOUT_SECS") {
            self.planner.timeout_secs = parse_u64("CADENCE_PLANNER_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CADENCE_PLANNER_TEMPERATURE") {
            self.planner.temperature = parse_f32("CADENCE_PLANNER_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("CADENCE_CALENDAR_BASE_URL") {
            self.calendar.base_url = value;
        }
        if let Some(value) = read_env("CADENCE_CALENDAR_ID") {
            self.calendar.calendar_id = value;
        }
        if let Some(value) = read_env("CADENCE_CALENDAR_TIME_ZONE") {
            self.calendar.time_zone = value;
        }
        if let Some(value) = read_env("CADENCE_CALENDAR_TOKEN_URL") {
            self.calendar.token_url = value;
        }
        if let Some(value) = read_env("CADENCE_CALENDAR_CLIENT_ID") {
            self.calendar.client_id = Some(value);
        }
        if let Some(value) = read_env("CADENCE_CALENDAR_CLIENT_SECRET") {
            self.calendar.client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("CADENCE_CALENDAR_REFRESH_TOKEN") {
            self.calendar.refresh_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CADENCE_CALENDAR_TOKEN_PATH") {
            self.calendar.token_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("CADENCE_CALENDAR_REQUEST_TIMEOUT_SECS") {
            self.calendar.request_timeout_secs =
                parse_u64("CADENCE_CALENDAR_REQUEST_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("CADENCE_LOGGING_LEVEL").or_else(|| read_env("CADENCE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CADENCE_LOGGING_FORMAT").or_else(|| read_env("CADENCE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(utc_offset) = overrides.utc_offset {
            self.session.utc_offset = utc_offset;
        }
        if let Some(turn_budget) = overrides.turn_budget {
            self.session.turn_budget = turn_budget;
        }
        if let Some(transcript_path) = overrides.transcript_path {
            self.session.transcript_path = transcript_path;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(provider) = overrides.planner_provider {
            self.planner.provider = provider;
        }
        if let Some(model) = overrides.planner_model {
            self.planner.model = model;
        }
        if let Some(api_key) = overrides.planner_api_key {
            self.planner.api_key = Some(secret_value(api_key));
        }
        if let Some(calendar_id) = overrides.calendar_id {
            self.calendar.calendar_id = calendar_id;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_session(&self.session)?;
        validate_planner(&self.planner)?;
        validate_calendar(&self.calendar)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.turn_budget == 0 || session.turn_budget > 64 {
        return Err(ConfigError::Validation(
            "session.turn_budget must be in range 1..=64".to_string(),
        ));
    }

    if session.transcript_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "session.transcript_path must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_planner(planner: &PlannerConfig) -> Result<(), ConfigError> {
    if planner.timeout_secs == 0 || planner.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "planner.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&planner.temperature) {
        return Err(ConfigError::Validation(
            "planner.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if planner.model.trim().is_empty() {
        return Err(ConfigError::Validation("planner.model must not be empty".to_string()));
    }

    if let Some(base_url) = &planner.base_url {
        ensure_http_url("planner.base_url", base_url)?;
    }

    if planner.provider == PlannerProvider::OpenAi {
        let missing = planner
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "planner.api_key is required for the openai provider (set CADENCE_PLANNER_API_KEY or OPENAI_API_KEY)"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_calendar(calendar: &CalendarConfig) -> Result<(), ConfigError> {
    ensure_http_url("calendar.base_url", &calendar.base_url)?;
    ensure_http_url("calendar.token_url", &calendar.token_url)?;

    if calendar.calendar_id.trim().is_empty() {
        return Err(ConfigError::Validation("calendar.calendar_id must not be empty".to_string()));
    }

    if calendar.time_zone.trim().is_empty() {
        return Err(ConfigError::Validation("calendar.time_zone must not be empty".to_string()));
    }

    if calendar.request_timeout_secs == 0 || calendar.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "calendar.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn ensure_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must start with http:// or https://")))
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_offset(key: &str, value: &str) -> Result<SessionOffset, ConfigError> {
    value.parse::<SessionOffset>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    session: Option<SessionPatch>,
    planner: Option<PlannerPatch>,
    calendar: Option<CalendarPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    utc_offset: Option<String>,
    turn_budget: Option<u32>,
    transcript_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct PlannerPatch {
    provider: Option<PlannerProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarPatch {
    base_url: Option<String>,
    calendar_id: Option<String>,
    time_zone: Option<String>,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    token_path: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
