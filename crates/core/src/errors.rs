use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Local rejection of a proposed action before it reaches the calendar.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "argument", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("missing required argument `{0}`")]
    MissingArgument(String),
    #[error("argument `{0}` has the wrong type")]
    TypeMismatch(String),
    #[error("argument `{0}` must be an ISO-8601 timestamp carrying the session UTC offset")]
    BadTimestampFormat(String),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("argument `{0}` is not accepted by this action")]
    UnexpectedArgument(String),
    #[error("arguments are not a JSON object: {0}")]
    UndecodableArguments(String),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingArgument(_) => "missing_argument",
            Self::TypeMismatch(_) => "type_mismatch",
            Self::BadTimestampFormat(_) => "bad_timestamp_format",
            Self::UnknownAction(_) => "unknown_action",
            Self::UnexpectedArgument(_) => "unexpected_argument",
            Self::UndecodableArguments(_) => "undecodable_arguments",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyViolation {
    #[error(
        "scheduleMeeting requires a checkAvailability with an available verdict in the same planner turn"
    )]
    AvailabilityNotConfirmed,
}

impl PolicyViolation {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AvailabilityNotConfirmed => "availability_not_confirmed",
        }
    }
}

/// Failure surfaced by the calendar backend boundary. Transport faults never
/// escape the gateway in any other shape.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum GatewayError {
    #[error("calendar backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("calendar credentials expired: {0}")]
    AuthExpired(String),
    #[error("calendar backend rejected the request: {0}")]
    BackendRejected(String),
    #[error("calendar event not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::AuthExpired(_) => "auth_expired",
            Self::BackendRejected(_) => "backend_rejected",
            Self::NotFound(_) => "not_found",
        }
    }
}

/// Faults that end a session. Everything else is recovered into an action result.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum SessionFault {
    #[error("turn budget of {budget} planner turns exhausted")]
    TurnBudgetExhausted { budget: u32 },
    #[error("transcript could not be read: {0}")]
    TranscriptUnreadable(String),
    #[error("planner could not be reached: {0}")]
    PlannerUnreachable(String),
    #[error("session cancelled before completion")]
    Cancelled,
    #[error("dialogue protocol violated: {0}")]
    Internal(String),
}

impl SessionFault {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TurnBudgetExhausted { .. } => "turn_budget_exhausted",
            Self::TranscriptUnreadable(_) => "transcript_unreadable",
            Self::PlannerUnreachable(_) => "planner_unreachable",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{GatewayError, SessionFault, ValidationError};

    #[test]
    fn validation_error_serializes_with_stable_code() {
        let encoded = serde_json::to_value(ValidationError::MissingArgument("startTime".into()))
            .expect("serialize");

        assert_eq!(encoded["code"], "missing_argument");
        assert_eq!(encoded["argument"], "startTime");
        assert_eq!(ValidationError::MissingArgument("startTime".into()).code(), "missing_argument");
    }

    #[test]
    fn gateway_error_message_carries_detail() {
        let error = GatewayError::NotFound("evt-404".to_owned());

        assert_eq!(error.code(), "not_found");
        assert!(error.to_string().contains("evt-404"));
    }

    #[test]
    fn session_fault_budget_message_names_budget() {
        let fault = SessionFault::TurnBudgetExhausted { budget: 4 };

        assert_eq!(fault.code(), "turn_budget_exhausted");
        assert_eq!(fault.to_string(), "turn budget of 4 planner turns exhausted");
        let encoded = serde_json::to_value(&fault).expect("serialize");
        assert_eq!(encoded["code"], "turn_budget_exhausted");
        assert_eq!(encoded["detail"]["budget"], 4);
    }
}
