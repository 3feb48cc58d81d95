use serde::{Deserialize, Serialize};

use crate::errors::SessionFault;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueState {
    AwaitingPlanner,
    PlannerResponded,
    Validating,
    Dispatching,
    Done,
    Aborted(SessionFault),
}

impl DialogueState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueEvent {
    PlannerReplied { request_count: usize },
    RequestsQueued,
    ValidationFinished { accepted: usize, rejected: usize },
    DispatchFinished,
    CancelRequested,
    BudgetExhausted { budget: u32 },
    PlannerFailed { reason: String },
}

/// Side effects the controller performs after a transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueAction {
    ValidateRequests,
    DispatchRequests,
    AppendExecutorTurn,
    InvokePlanner,
    CloseSession,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: DialogueState,
    pub to: DialogueState,
    pub event: DialogueEvent,
    pub actions: Vec<DialogueAction>,
}
