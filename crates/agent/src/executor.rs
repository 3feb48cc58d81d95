use std::sync::Arc;
use std::time::Duration;

use cadence_calendar::CalendarGateway;
use cadence_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use cadence_core::domain::action::{
    ActionFailure, ActionOutcome, ActionPayload, ActionRequest, ActionResult, FailureKind,
    ValidatedAction, ValidatedRequest,
};
use cadence_core::domain::session::SessionId;
use cadence_core::errors::GatewayError;
use cadence_core::registry::ActionRegistry;
use futures::future::join_all;
use tracing::{info, warn};

use crate::guardrails::{GuardrailDecision, GuardrailPolicy, TurnEvidence};

pub const DEFAULT_GATEWAY_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Clone, Debug, PartialEq)]
enum Slot {
    Rejected(ActionResult),
    Ready(ValidatedRequest),
}

/// One planner turn after schema validation, still in proposal order.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedBatch {
    slots: Vec<Slot>,
}

impl ValidatedBatch {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn accepted(&self) -> usize {
        self.slots.iter().filter(|slot| matches!(slot, Slot::Ready(_))).count()
    }

    pub fn rejected(&self) -> usize {
        self.len() - self.accepted()
    }
}

/// The executing side of the dialogue: validates proposals, applies the ordering policy and
/// performs what survives against the calendar.
pub struct ActionExecutor<G> {
    registry: ActionRegistry,
    policy: GuardrailPolicy,
    gateway: G,
    deadline: Duration,
    audit: Arc<dyn AuditSink>,
}

impl<G> ActionExecutor<G>
where
    G: CalendarGateway,
{
    pub fn new(registry: ActionRegistry, gateway: G) -> Self {
        Self {
            registry,
            policy: GuardrailPolicy::default(),
            gateway,
            deadline: DEFAULT_GATEWAY_DEADLINE,
            audit: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_policy(mut self, policy: GuardrailPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Per-call deadline. A call that outlives it is reported as `BackendUnavailable`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn validate_turn(&self, session_id: &SessionId, requests: &[ActionRequest]) -> ValidatedBatch {
        let slots = requests
            .iter()
            .map(|request| match self.registry.validate(request) {
                Ok(validated) => Slot::Ready(validated),
                Err(rejection) => {
                    let codes =
                        rejection.reasons.iter().map(|reason| reason.code()).collect::<Vec<_>>();
                    warn!(
                        event_name = "executor.request_rejected",
                        session_id = %session_id,
                        request_id = %request.id,
                        action = %request.action_name,
                        reasons = %codes.join(","),
                        "action request failed validation"
                    );
                    let result = ActionResult::failure(
                        request.id.clone(),
                        request.action_name.clone(),
                        ActionFailure::validation(rejection.reasons),
                    );
                    self.record(session_id, &result);
                    Slot::Rejected(result)
                }
            })
            .collect();

        ValidatedBatch { slots }
    }

    /// Availability checks run first, concurrently. Every other accepted request is then
    /// gated by the policy against the verdicts whose window and attendees cover it, and the
    /// survivors run concurrently. Results come back in proposal order whatever order the
    /// calls finished in.
    pub async fn dispatch(&self, session_id: &SessionId, batch: ValidatedBatch) -> Vec<ActionResult> {
        let mut results: Vec<Option<ActionResult>> = vec![None; batch.slots.len()];
        let mut checks = Vec::new();
        let mut others = Vec::new();

        for (index, slot) in batch.slots.into_iter().enumerate() {
            match slot {
                Slot::Rejected(result) => results[index] = Some(result),
                Slot::Ready(request) => match request.action {
                    ValidatedAction::CheckAvailability { .. } => checks.push((index, request)),
                    _ => others.push((index, request)),
                },
            }
        }

        let check_results =
            join_all(checks.iter().map(|(index, request)| async move {
                (*index, self.perform(session_id, request).await)
            }))
            .await;
        let evidence = TurnEvidence::from_checks(
            checks
                .iter()
                .zip(&check_results)
                .map(|((_, request), (_, result))| (&request.action, result)),
        );
        for (index, result) in check_results {
            results[index] = Some(result);
        }

        let mut allowed = Vec::new();
        for (index, request) in &others {
            match self.policy.evaluate(&request.action, &evidence) {
                GuardrailDecision::Allow => allowed.push((*index, request)),
                GuardrailDecision::Deny { reason_code, violation } => {
                    warn!(
                        event_name = "executor.policy_denied",
                        session_id = %session_id,
                        request_id = %request.id,
                        action = %request.action.name(),
                        reason_code,
                        "request blocked by ordering policy"
                    );
                    let result = ActionResult::failure(
                        request.id.clone(),
                        request.action.name().as_str(),
                        ActionFailure::policy(violation),
                    );
                    self.record(session_id, &result);
                    results[*index] = Some(result);
                }
            }
        }

        let dispatched = join_all(allowed.into_iter().map(|(index, request)| async move {
            (index, self.perform(session_id, request).await)
        }))
        .await;
        for (index, result) in dispatched {
            results[index] = Some(result);
        }

        results.into_iter().flatten().collect()
    }

    pub async fn execute_turn(
        &self,
        session_id: &SessionId,
        requests: &[ActionRequest],
    ) -> Vec<ActionResult> {
        let batch = self.validate_turn(session_id, requests);
        self.dispatch(session_id, batch).await
    }

    async fn perform(&self, session_id: &SessionId, request: &ValidatedRequest) -> ActionResult {
        let name = request.action.name();
        info!(
            event_name = "executor.dispatch_started",
            session_id = %session_id,
            request_id = %request.id,
            action = %name,
            "dispatching to calendar"
        );

        let outcome = match tokio::time::timeout(self.deadline, self.call(&request.action)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::BackendUnavailable(format!(
                "{name} exceeded its {}ms deadline",
                self.deadline.as_millis()
            ))),
        };

        let result = match outcome {
            Ok(payload) => ActionResult::success(request.id.clone(), name.as_str(), payload),
            Err(error) => {
                warn!(
                    event_name = "executor.dispatch_failed",
                    session_id = %session_id,
                    request_id = %request.id,
                    action = %name,
                    code = error.code(),
                    error = %error,
                    "calendar call failed"
                );
                ActionResult::failure(request.id.clone(), name.as_str(), ActionFailure::gateway(error))
            }
        };
        self.record(session_id, &result);
        result
    }

    async fn call(&self, action: &ValidatedAction) -> Result<ActionPayload, GatewayError> {
        match action {
            ValidatedAction::CheckAvailability { window, attendees } => {
                self.gateway.check_availability(window, attendees).await.map(ActionPayload::from)
            }
            ValidatedAction::ScheduleMeeting(draft) => self
                .gateway
                .schedule_meeting(draft)
                .await
                .map(|reference| ActionPayload::Scheduled { reference }),
            ValidatedAction::RescheduleMeeting { reference, window } => self
                .gateway
                .reschedule_meeting(reference, window)
                .await
                .map(|reference| ActionPayload::Rescheduled { reference }),
            ValidatedAction::CancelMeeting { reference } => self
                .gateway
                .cancel_meeting(reference)
                .await
                .map(|()| ActionPayload::Cancelled { reference: reference.clone() }),
        }
    }

    fn record(&self, session_id: &SessionId, result: &ActionResult) {
        let (event_type, category, outcome, code) = match &result.outcome {
            ActionOutcome::Success(_) => {
                ("action.performed", AuditCategory::Gateway, AuditOutcome::Success, "ok")
            }
            ActionOutcome::Failure(failure) => match failure.kind {
                FailureKind::Validation(_) => (
                    "action.rejected",
                    AuditCategory::Validation,
                    AuditOutcome::Rejected,
                    failure.code(),
                ),
                FailureKind::Policy(_) => {
                    ("action.rejected", AuditCategory::Policy, AuditOutcome::Rejected, failure.code())
                }
                FailureKind::Gateway(_) => {
                    ("action.failed", AuditCategory::Gateway, AuditOutcome::Failed, failure.code())
                }
            },
        };

        self.audit.emit(
            AuditEvent::new(
                Some(session_id.clone()),
                Some(result.request_id.clone()),
                event_type,
                category,
                "executor",
                outcome,
            )
            .with_metadata("action", result.action_name.clone())
            .with_metadata("code", code),
        );
    }
}
