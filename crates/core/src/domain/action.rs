use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::timestamp::TimeWindow;
use crate::errors::{GatewayError, PolicyViolation, ValidationError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionName {
    CheckAvailability,
    ScheduleMeeting,
    RescheduleMeeting,
    CancelMeeting,
}

impl ActionName {
    pub const ALL: [ActionName; 4] = [
        ActionName::CheckAvailability,
        ActionName::ScheduleMeeting,
        ActionName::RescheduleMeeting,
        ActionName::CancelMeeting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckAvailability => "checkAvailability",
            Self::ScheduleMeeting => "scheduleMeeting",
            Self::RescheduleMeeting => "rescheduleMeeting",
            Self::CancelMeeting => "cancelMeeting",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == raw)
    }

    /// Mutating actions change the shared calendar; availability checks only read it.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::CheckAvailability)
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(format!("req-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Argument value as proposed by the planner, before schema checks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    Text(String),
    List(Vec<String>),
    Other(Value),
}

impl ArgumentValue {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            Value::Array(items) if items.iter().all(Value::is_string) => Self::List(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(text) => Some(text),
                        _ => None,
                    })
                    .collect(),
            ),
            other => Self::Other(other),
        }
    }
}

impl From<&str> for ArgumentValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Vec<&str>> for ArgumentValue {
    fn from(values: Vec<&str>) -> Self {
        Self::List(values.into_iter().map(str::to_owned).collect())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: RequestId,
    pub action_name: String,
    pub arguments: BTreeMap<String, ArgumentValue>,
    /// Raw argument text the planner sent when it was not a JSON object. The registry
    /// rejects such a request on its own without touching the rest of the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undecodable_arguments: Option<String>,
}

impl ActionRequest {
    pub fn new(action_name: impl Into<String>, arguments: BTreeMap<String, ArgumentValue>) -> Self {
        Self::with_id(RequestId::generate(), action_name, arguments)
    }

    pub fn with_id(
        id: RequestId,
        action_name: impl Into<String>,
        arguments: BTreeMap<String, ArgumentValue>,
    ) -> Self {
        Self { id, action_name: action_name.into(), arguments, undecodable_arguments: None }
    }

    pub fn undecodable(id: RequestId, action_name: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            id,
            action_name: action_name.into(),
            arguments: BTreeMap::new(),
            undecodable_arguments: Some(raw.into()),
        }
    }
}

/// Opaque identifier of an event in the external calendar.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeetingReference(pub String);

impl fmt::Display for MeetingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityVerdict {
    pub available: bool,
}

impl AvailabilityVerdict {
    /// Any busy attendee makes the whole set unavailable.
    pub fn conjunctive<I>(busy_flags: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        Self { available: !busy_flags.into_iter().any(|busy| busy) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingDraft {
    pub title: String,
    pub description: Option<String>,
    pub window: TimeWindow,
    pub attendees: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatedAction {
    CheckAvailability { window: TimeWindow, attendees: Vec<String> },
    ScheduleMeeting(MeetingDraft),
    RescheduleMeeting { reference: MeetingReference, window: TimeWindow },
    CancelMeeting { reference: MeetingReference },
}

impl ValidatedAction {
    pub fn name(&self) -> ActionName {
        match self {
            Self::CheckAvailability { .. } => ActionName::CheckAvailability,
            Self::ScheduleMeeting(_) => ActionName::ScheduleMeeting,
            Self::RescheduleMeeting { .. } => ActionName::RescheduleMeeting,
            Self::CancelMeeting { .. } => ActionName::CancelMeeting,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedRequest {
    pub id: RequestId,
    pub action: ValidatedAction,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionPayload {
    Availability { available: bool },
    Scheduled { reference: MeetingReference },
    Rescheduled { reference: MeetingReference },
    Cancelled { reference: MeetingReference },
}

impl From<AvailabilityVerdict> for ActionPayload {
    fn from(verdict: AvailabilityVerdict) -> Self {
        Self::Availability { available: verdict.available }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureKind {
    Validation(Vec<ValidationError>),
    Policy(PolicyViolation),
    Gateway(GatewayError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ActionFailure {
    pub fn validation(reasons: Vec<ValidationError>) -> Self {
        let message =
            reasons.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
        Self { kind: FailureKind::Validation(reasons), message }
    }

    pub fn policy(violation: PolicyViolation) -> Self {
        Self { message: violation.to_string(), kind: FailureKind::Policy(violation) }
    }

    pub fn gateway(error: GatewayError) -> Self {
        Self { message: error.to_string(), kind: FailureKind::Gateway(error) }
    }

    pub fn code(&self) -> &'static str {
        match &self.kind {
            FailureKind::Validation(reasons) if reasons.len() == 1 => reasons[0].code(),
            FailureKind::Validation(_) => "validation_failed",
            FailureKind::Policy(violation) => violation.code(),
            FailureKind::Gateway(error) => error.code(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ActionOutcome {
    Success(ActionPayload),
    Failure(ActionFailure),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub request_id: RequestId,
    pub action_name: String,
    pub outcome: ActionOutcome,
}

impl ActionResult {
    pub fn success(
        request_id: RequestId,
        action_name: impl Into<String>,
        payload: ActionPayload,
    ) -> Self {
        Self { request_id, action_name: action_name.into(), outcome: ActionOutcome::Success(payload) }
    }

    pub fn failure(
        request_id: RequestId,
        action_name: impl Into<String>,
        failure: ActionFailure,
    ) -> Self {
        Self { request_id, action_name: action_name.into(), outcome: ActionOutcome::Failure(failure) }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ActionOutcome::Success(_))
    }

    pub fn failure_detail(&self) -> Option<&ActionFailure> {
        match &self.outcome {
            ActionOutcome::Failure(failure) => Some(failure),
            ActionOutcome::Success(_) => None,
        }
    }

    /// One-line rendering fed back to the planner.
    pub fn summary(&self) -> String {
        match &self.outcome {
            ActionOutcome::Success(ActionPayload::Availability { available: true }) => {
                format!("{} {}: all attendees are free", self.action_name, self.request_id)
            }
            ActionOutcome::Success(ActionPayload::Availability { available: false }) => {
                format!("{} {}: at least one attendee is busy", self.action_name, self.request_id)
            }
            ActionOutcome::Success(ActionPayload::Scheduled { reference }) => {
                format!("{} {}: created event {reference}", self.action_name, self.request_id)
            }
            ActionOutcome::Success(ActionPayload::Rescheduled { reference }) => {
                format!("{} {}: moved event {reference}", self.action_name, self.request_id)
            }
            ActionOutcome::Success(ActionPayload::Cancelled { reference }) => {
                format!("{} {}: cancelled event {reference}", self.action_name, self.request_id)
            }
            ActionOutcome::Failure(failure) => format!(
                "{} {}: failed ({}) {}",
                self.action_name,
                self.request_id,
                failure.code(),
                failure.message
            ),
        }
    }
}
