pub mod audit;
pub mod config;
pub mod dialogue;
pub mod domain;
pub mod errors;
pub mod registry;

pub use dialogue::{DialogueEvent, DialogueMachine, DialogueState, DialogueTransitionError};
pub use domain::action::{
    ActionFailure, ActionName, ActionOutcome, ActionPayload, ActionRequest, ActionResult,
    ArgumentValue, AvailabilityVerdict, FailureKind, MeetingDraft, MeetingReference, RequestId,
    ValidatedAction, ValidatedRequest,
};
pub use domain::session::{Role, SessionId, SessionOutcome, SessionStatus, Turn, TurnHistory};
pub use domain::timestamp::{SessionOffset, TimeWindow, ZonedTimestamp};
pub use errors::{GatewayError, PolicyViolation, SessionFault, ValidationError};
pub use registry::{ActionRegistry, ActionSchema, Rejection};
