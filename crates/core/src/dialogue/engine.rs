use thiserror::Error;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::dialogue::states::{DialogueAction, DialogueEvent, DialogueState, TransitionOutcome};
use crate::domain::session::SessionId;
use crate::errors::SessionFault;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DialogueTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: DialogueState, event: DialogueEvent },
    #[error("session already finished in {state:?}")]
    AlreadyTerminal { state: DialogueState },
}

/// Pure planner/executor turn-taking machine. Holds no state of its own; the
/// controller owns the current state and feeds events in.
#[derive(Clone, Copy, Debug, Default)]
pub struct DialogueMachine;

impl DialogueMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_state(&self) -> DialogueState {
        DialogueState::AwaitingPlanner
    }

    pub fn apply(
        &self,
        current: &DialogueState,
        event: &DialogueEvent,
    ) -> Result<TransitionOutcome, DialogueTransitionError> {
        transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &DialogueState,
        event: &DialogueEvent,
        sink: &S,
        session_id: &SessionId,
    ) -> Result<TransitionOutcome, DialogueTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        Some(session_id.clone()),
                        None,
                        "dialogue.transition_applied",
                        AuditCategory::Session,
                        "dialogue-machine",
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        Some(session_id.clone()),
                        None,
                        "dialogue.transition_rejected",
                        AuditCategory::Session,
                        "dialogue-machine",
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

fn transition(
    current: &DialogueState,
    event: &DialogueEvent,
) -> Result<TransitionOutcome, DialogueTransitionError> {
    use DialogueAction::{
        AppendExecutorTurn, CloseSession, DispatchRequests, InvokePlanner, ValidateRequests,
    };
    use DialogueEvent::{
        BudgetExhausted, CancelRequested, DispatchFinished, PlannerFailed, PlannerReplied,
        RequestsQueued, ValidationFinished,
    };
    use DialogueState::{
        Aborted, AwaitingPlanner, Dispatching, Done, PlannerResponded, Validating,
    };

    if current.is_terminal() {
        return Err(DialogueTransitionError::AlreadyTerminal { state: current.clone() });
    }

    let (to, actions) = match (current, event) {
        (AwaitingPlanner, PlannerReplied { request_count: 0 }) => (Done, vec![CloseSession]),
        (AwaitingPlanner, PlannerReplied { .. }) => (PlannerResponded, Vec::new()),
        (AwaitingPlanner, CancelRequested) => {
            (Aborted(SessionFault::Cancelled), vec![CloseSession])
        }
        (AwaitingPlanner, BudgetExhausted { budget }) => {
            (Aborted(SessionFault::TurnBudgetExhausted { budget: *budget }), vec![CloseSession])
        }
        (AwaitingPlanner, PlannerFailed { reason }) => {
            (Aborted(SessionFault::PlannerUnreachable(reason.clone())), vec![CloseSession])
        }
        (PlannerResponded, RequestsQueued) => (Validating, vec![ValidateRequests]),
        (Validating, ValidationFinished { .. }) => (Dispatching, vec![DispatchRequests]),
        (Dispatching, DispatchFinished) => {
            (AwaitingPlanner, vec![AppendExecutorTurn, InvokePlanner])
        }
        _ => {
            return Err(DialogueTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditOutcome, InMemoryAuditSink};
    use crate::dialogue::engine::{DialogueMachine, DialogueTransitionError};
    use crate::dialogue::states::{DialogueAction, DialogueEvent, DialogueState};
    use crate::domain::session::SessionId;
    use crate::errors::SessionFault;

    #[test]
    fn full_cycle_returns_to_awaiting_planner() {
        let machine = DialogueMachine::new();
        let mut state = machine.initial_state();

        for event in [
            DialogueEvent::PlannerReplied { request_count: 2 },
            DialogueEvent::RequestsQueued,
            DialogueEvent::ValidationFinished { accepted: 1, rejected: 1 },
        ] {
            state = machine.apply(&state, &event).expect("cycle step").to;
        }
        assert_eq!(state, DialogueState::Dispatching);

        let back = machine.apply(&state, &DialogueEvent::DispatchFinished).expect("dispatch done");
        assert_eq!(back.to, DialogueState::AwaitingPlanner);
        assert_eq!(
            back.actions,
            vec![DialogueAction::AppendExecutorTurn, DialogueAction::InvokePlanner]
        );
    }

    #[test]
    fn planner_turn_without_requests_finishes() {
        let outcome = DialogueMachine::new()
            .apply(&DialogueState::AwaitingPlanner, &DialogueEvent::PlannerReplied {
                request_count: 0,
            })
            .expect("awaiting -> done");

        assert_eq!(outcome.to, DialogueState::Done);
        assert!(outcome.to.is_terminal());
    }

    #[test]
    fn aborts_only_from_awaiting_planner() {
        let machine = DialogueMachine::new();

        let budget = machine
            .apply(&DialogueState::AwaitingPlanner, &DialogueEvent::BudgetExhausted { budget: 3 })
            .expect("budget abort");
        assert_eq!(
            budget.to,
            DialogueState::Aborted(SessionFault::TurnBudgetExhausted { budget: 3 })
        );

        let cancelled = machine
            .apply(&DialogueState::AwaitingPlanner, &DialogueEvent::CancelRequested)
            .expect("cancel abort");
        assert_eq!(cancelled.to, DialogueState::Aborted(SessionFault::Cancelled));

        let mid_dispatch = machine
            .apply(&DialogueState::Dispatching, &DialogueEvent::CancelRequested)
            .expect_err("dispatches finish before cancel is honoured");
        assert!(matches!(mid_dispatch, DialogueTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_states_accept_no_events() {
        let error = DialogueMachine::new()
            .apply(&DialogueState::Done, &DialogueEvent::RequestsQueued)
            .expect_err("done is final");

        assert!(matches!(error, DialogueTransitionError::AlreadyTerminal { .. }));
    }

    #[test]
    fn audited_transitions_record_rejections() {
        let sink = InMemoryAuditSink::default();
        let machine = DialogueMachine::new();
        let session = SessionId("sess-audit".to_owned());

        machine
            .apply_with_audit(
                &DialogueState::AwaitingPlanner,
                &DialogueEvent::PlannerReplied { request_count: 1 },
                &sink,
                &session,
            )
            .expect("valid transition");
        machine
            .apply_with_audit(
                &DialogueState::AwaitingPlanner,
                &DialogueEvent::DispatchFinished,
                &sink,
                &session,
            )
            .expect_err("invalid transition");

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome, AuditOutcome::Success);
        assert_eq!(events[1].outcome, AuditOutcome::Rejected);
        assert_eq!(events[1].session_id, Some(session));
    }
}
