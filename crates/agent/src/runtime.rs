use std::path::Path;
use std::sync::Arc;

use cadence_calendar::CalendarGateway;
use cadence_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use cadence_core::dialogue::{DialogueEvent, DialogueMachine, DialogueState};
use cadence_core::domain::action::ActionRequest;
use cadence_core::domain::session::{SessionId, SessionOutcome, SessionStatus, Turn, TurnHistory};
use cadence_core::domain::timestamp::{SessionOffset, ZonedTimestamp};
use cadence_core::errors::SessionFault;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::ActionExecutor;
use crate::llm::{PlannerContext, PlannerOracle};
use crate::planner::PlannerOutput;
use crate::prompt::{planner_instructions, seed_turn};

/// Owns the lifecycle of planner/executor sessions. Each call to `run_session*` is an
/// independent session with its own history; the controller itself holds no session state.
pub struct SessionController<P, G> {
    planner: P,
    executor: ActionExecutor<G>,
    machine: DialogueMachine,
    audit: Arc<dyn AuditSink>,
}

impl<P, G> SessionController<P, G>
where
    P: PlannerOracle,
    G: CalendarGateway,
{
    /// Shares the executor's audit sink.
    pub fn new(planner: P, executor: ActionExecutor<G>) -> Self {
        let audit = executor.audit().clone();
        Self { planner, executor, machine: DialogueMachine::new(), audit }
    }

    pub fn offset(&self) -> SessionOffset {
        self.executor.registry().offset()
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }

    pub fn executor(&self) -> &ActionExecutor<G> {
        &self.executor
    }

    pub async fn run_session(
        &self,
        transcript: &str,
        reference: ZonedTimestamp,
        turn_budget: u32,
    ) -> SessionOutcome {
        self.run_session_with_cancel(transcript, reference, turn_budget, &CancellationToken::new())
            .await
    }

    /// Cancellation is observed before each planner turn. Calendar calls already in flight
    /// are allowed to finish.
    pub async fn run_session_with_cancel(
        &self,
        transcript: &str,
        reference: ZonedTimestamp,
        turn_budget: u32,
        cancel: &CancellationToken,
    ) -> SessionOutcome {
        let session_id = SessionId::generate();
        let offset = self.offset();
        let mut history = TurnHistory::seeded(seed_turn(transcript, offset));
        let instructions = planner_instructions(offset, &reference);
        let tools = self.executor.registry().tool_definitions();

        info!(
            event_name = "session.started",
            session_id = %session_id,
            reference_time = %reference,
            turn_budget,
            "session started"
        );

        let mut state = self.machine.initial_state();
        loop {
            let mut proposed: Vec<ActionRequest> = Vec::new();
            let event = if cancel.is_cancelled() {
                DialogueEvent::CancelRequested
            } else if history.planner_turns() >= turn_budget as usize {
                DialogueEvent::BudgetExhausted { budget: turn_budget }
            } else {
                let context = PlannerContext {
                    instructions: instructions.clone(),
                    reference_time: reference,
                    history: history.turns().to_vec(),
                    tools: tools.clone(),
                };
                info!(
                    event_name = "session.planner_turn_started",
                    session_id = %session_id,
                    turn = history.planner_turns() + 1,
                    "invoking planner"
                );
                match self.planner.plan(&context).await {
                    Ok(raw) => {
                        let output = PlannerOutput::decode(raw);
                        self.record_planner_turn(&session_id, &output);
                        let (text, requests) = output.into_parts();
                        info!(
                            event_name = "session.planner_turn_finished",
                            session_id = %session_id,
                            requests = requests.len(),
                            "planner replied"
                        );
                        proposed = requests.clone();
                        history.append(Turn::planner(text, requests));
                        DialogueEvent::PlannerReplied { request_count: proposed.len() }
                    }
                    Err(error) => {
                        warn!(
                            event_name = "session.planner_failed",
                            session_id = %session_id,
                            error = %error,
                            "planner oracle failed"
                        );
                        self.audit.emit(
                            AuditEvent::new(
                                Some(session_id.clone()),
                                None,
                                "planner.failed",
                                AuditCategory::Planner,
                                "planner",
                                AuditOutcome::Failed,
                            )
                            .with_metadata("reason", error.to_string()),
                        );
                        DialogueEvent::PlannerFailed { reason: error.to_string() }
                    }
                }
            };

            state = match self.step(&state, event, &session_id) {
                Ok(next) => next,
                Err(fault) => return self.finish(session_id, SessionStatus::Aborted { fault }, history),
            };
            if state.is_terminal() {
                break;
            }

            let batch = self.executor.validate_turn(&session_id, &proposed);
            let validated = self.step(&state, DialogueEvent::RequestsQueued, &session_id).and_then(
                |next| {
                    self.step(
                        &next,
                        DialogueEvent::ValidationFinished {
                            accepted: batch.accepted(),
                            rejected: batch.rejected(),
                        },
                        &session_id,
                    )
                },
            );
            state = match validated {
                Ok(next) => next,
                Err(fault) => return self.finish(session_id, SessionStatus::Aborted { fault }, history),
            };

            let results = self.executor.dispatch(&session_id, batch).await;
            history.append(Turn::executor(results));

            state = match self.step(&state, DialogueEvent::DispatchFinished, &session_id) {
                Ok(next) => next,
                Err(fault) => return self.finish(session_id, SessionStatus::Aborted { fault }, history),
            };
        }

        let status = match state {
            DialogueState::Done => SessionStatus::Done,
            DialogueState::Aborted(fault) => SessionStatus::Aborted { fault },
            other => SessionStatus::Aborted {
                fault: SessionFault::Internal(format!("session stopped in {other:?}")),
            },
        };
        self.finish(session_id, status, history)
    }

    /// Reads the transcript once and runs a session over it. An unreadable file aborts the
    /// session before the planner is ever invoked.
    pub async fn run_from_path(
        &self,
        path: &Path,
        reference: ZonedTimestamp,
        turn_budget: u32,
        cancel: &CancellationToken,
    ) -> SessionOutcome {
        match tokio::fs::read_to_string(path).await {
            Ok(transcript) => {
                self.run_session_with_cancel(&transcript, reference, turn_budget, cancel).await
            }
            Err(error) => {
                let fault =
                    SessionFault::TranscriptUnreadable(format!("{}: {error}", path.display()));
                self.finish(
                    SessionId::generate(),
                    SessionStatus::Aborted { fault },
                    TurnHistory::default(),
                )
            }
        }
    }

    fn record_planner_turn(&self, session_id: &SessionId, output: &PlannerOutput) {
        let (event_type, outcome) = match output {
            PlannerOutput::Proposed { .. } => ("planner.replied", AuditOutcome::Success),
            PlannerOutput::Unparsed { .. } => ("planner.unparsed", AuditOutcome::Rejected),
        };
        self.audit.emit(
            AuditEvent::new(
                Some(session_id.clone()),
                None,
                event_type,
                AuditCategory::Planner,
                "planner",
                outcome,
            )
            .with_metadata("requests", output.requests().len().to_string()),
        );
    }

    fn step(
        &self,
        state: &DialogueState,
        event: DialogueEvent,
        session_id: &SessionId,
    ) -> Result<DialogueState, SessionFault> {
        self.machine
            .apply_with_audit(state, &event, self.audit.as_ref(), session_id)
            .map(|outcome| outcome.to)
            .map_err(|error| SessionFault::Internal(error.to_string()))
    }

    fn finish(
        &self,
        session_id: SessionId,
        status: SessionStatus,
        history: TurnHistory,
    ) -> SessionOutcome {
        let (event_type, outcome, code) = match &status {
            SessionStatus::Done => ("session.done", AuditOutcome::Success, "done"),
            SessionStatus::Aborted { fault } => ("session.aborted", AuditOutcome::Failed, fault.code()),
        };

        match &status {
            SessionStatus::Done => info!(
                event_name = "session.done",
                session_id = %session_id,
                planner_turns = history.planner_turns(),
                "session finished"
            ),
            SessionStatus::Aborted { fault } => warn!(
                event_name = "session.aborted",
                session_id = %session_id,
                planner_turns = history.planner_turns(),
                code = fault.code(),
                fault = %fault,
                "session aborted"
            ),
        }

        self.audit.emit(
            AuditEvent::new(
                Some(session_id.clone()),
                None,
                event_type,
                AuditCategory::Session,
                "session-controller",
                outcome,
            )
            .with_metadata("code", code)
            .with_metadata("planner_turns", history.planner_turns().to_string()),
        );

        SessionOutcome { session_id, status, history }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cadence_calendar::InMemoryCalendar;
    use cadence_core::audit::{AuditCategory, AuditOutcome, InMemoryAuditSink};
    use cadence_core::domain::session::{Role, SessionStatus};
    use cadence_core::domain::timestamp::{SessionOffset, ZonedTimestamp};
    use cadence_core::errors::SessionFault;
    use cadence_core::registry::ActionRegistry;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::SessionController;
    use crate::executor::ActionExecutor;
    use crate::llm::{PlannerError, RawPlannerOutput, ScriptedPlanner};

    fn reference() -> ZonedTimestamp {
        ZonedTimestamp::parse_in("2025-01-22T09:00:00+05:00", SessionOffset::default())
            .expect("reference")
    }

    fn controller(
        planner: ScriptedPlanner,
        audit: Arc<InMemoryAuditSink>,
    ) -> SessionController<ScriptedPlanner, InMemoryCalendar> {
        let executor = ActionExecutor::new(ActionRegistry::default(), InMemoryCalendar::new())
            .with_audit(audit);
        SessionController::new(planner, executor)
    }

    #[tokio::test]
    async fn quiet_planner_finishes_after_one_turn() {
        let audit = Arc::new(InMemoryAuditSink::default());
        let controller = controller(ScriptedPlanner::new(), audit.clone());

        let outcome = controller.run_session("nothing to do", reference(), 4).await;

        assert!(outcome.is_done());
        let roles: Vec<Role> = outcome.history.turns().iter().map(|turn| turn.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Planner]);
        let session_events = audit.events_of(AuditCategory::Session);
        assert_eq!(session_events.last().map(|event| event.event_type.as_str()), Some("session.done"));
    }

    #[tokio::test]
    async fn planner_sees_results_of_previous_turn() {
        let planner = ScriptedPlanner::new().reply(
            RawPlannerOutput::text("cancelling").with_call("cancelMeeting", json!({ "eventReference": "evt-9" })),
        );
        let controller = controller(planner, Arc::new(InMemoryAuditSink::default()));

        let outcome = controller.run_session("cancel it", reference(), 4).await;

        assert!(outcome.is_done());
        let contexts = controller.planner().contexts();
        assert_eq!(contexts.len(), 2);
        let last_seen = contexts[1].history.last().expect("executor turn");
        assert_eq!(last_seen.role, Role::Executor);
        assert!(last_seen.content.contains("failed (not_found)"));
        assert!(contexts[0].instructions.contains("2025-01-22 09:00"));
    }

    #[tokio::test]
    async fn planner_failure_aborts_without_retry() {
        let audit = Arc::new(InMemoryAuditSink::default());
        let planner = ScriptedPlanner::new().fail(PlannerError::Transport("connection refused".into()));
        let controller = controller(planner, audit.clone());

        let outcome = controller.run_session("anything", reference(), 4).await;

        assert!(matches!(
            outcome.status,
            SessionStatus::Aborted { fault: SessionFault::PlannerUnreachable(ref reason) } if reason.contains("connection refused")
        ));
        assert_eq!(controller.planner().calls(), 1);
        let planner_events = audit.events_of(AuditCategory::Planner);
        assert_eq!(planner_events.len(), 1);
        assert_eq!(planner_events[0].event_type, "planner.failed");
        assert_eq!(planner_events[0].outcome, AuditOutcome::Failed);
    }

    #[tokio::test]
    async fn each_planner_turn_is_audited() {
        let audit = Arc::new(InMemoryAuditSink::default());
        let planner = ScriptedPlanner::new()
            .reply(
                RawPlannerOutput::text("cancelling")
                    .with_call("cancelMeeting", json!({ "eventReference": "evt-9" })),
            )
            .reply(RawPlannerOutput::undecodable("not json"));
        let controller = controller(planner, audit.clone());

        let outcome = controller.run_session("cancel it", reference(), 4).await;

        assert!(outcome.is_done());
        let planner_events = audit.events_of(AuditCategory::Planner);
        let kinds: Vec<(&str, &AuditOutcome)> = planner_events
            .iter()
            .map(|event| (event.event_type.as_str(), &event.outcome))
            .collect();
        assert_eq!(
            kinds,
            vec![("planner.replied", &AuditOutcome::Success), ("planner.unparsed", &AuditOutcome::Rejected)]
        );
        assert_eq!(planner_events[0].metadata.get("requests").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_planner_turn() {
        let controller = controller(ScriptedPlanner::new(), Arc::new(InMemoryAuditSink::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = controller.run_session_with_cancel("anything", reference(), 4, &cancel).await;

        assert_eq!(outcome.fault(), Some(&SessionFault::Cancelled));
        assert_eq!(controller.planner().calls(), 0);
        assert_eq!(outcome.history.len(), 1);
    }

    #[tokio::test]
    async fn unreadable_transcript_aborts_before_planning() {
        let controller = controller(ScriptedPlanner::new(), Arc::new(InMemoryAuditSink::default()));
        let dir = tempfile::tempdir().expect("tempdir");

        let outcome = controller
            .run_from_path(&dir.path().join("missing.md"), reference(), 4, &CancellationToken::new())
            .await;

        assert!(matches!(outcome.fault(), Some(SessionFault::TranscriptUnreadable(_))));
        assert!(outcome.history.is_empty());
        assert_eq!(controller.planner().calls(), 0);
    }
}
