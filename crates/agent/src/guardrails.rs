use cadence_core::domain::action::{
    ActionOutcome, ActionPayload, ActionResult, MeetingDraft, ValidatedAction,
};
use cadence_core::domain::timestamp::TimeWindow;
use cadence_core::errors::PolicyViolation;

/// One answered availability check of the current turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckedWindow {
    pub window: TimeWindow,
    pub attendees: Vec<String>,
    pub available: bool,
}

impl CheckedWindow {
    /// The check spans the whole draft window and names every draft attendee.
    pub fn covers(&self, draft: &MeetingDraft) -> bool {
        self.window.start.instant() <= draft.window.start.instant()
            && self.window.end.instant() >= draft.window.end.instant()
            && draft.attendees.iter().all(|attendee| {
                self.attendees
                    .iter()
                    .any(|checked| checked.trim().eq_ignore_ascii_case(attendee.trim()))
            })
    }
}

/// What the current planner turn has already established about availability.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TurnEvidence {
    pub checks: Vec<CheckedWindow>,
}

impl TurnEvidence {
    /// Evidence from the answered availability checks of one planner turn. Failed checks and
    /// non-availability actions contribute nothing.
    pub fn from_checks<'a, I>(checks: I) -> Self
    where
        I: IntoIterator<Item = (&'a ValidatedAction, &'a ActionResult)>,
    {
        let checks = checks
            .into_iter()
            .filter_map(|(action, result)| match (action, &result.outcome) {
                (
                    ValidatedAction::CheckAvailability { window, attendees },
                    ActionOutcome::Success(ActionPayload::Availability { available }),
                ) => Some(CheckedWindow {
                    window: *window,
                    attendees: attendees.clone(),
                    available: *available,
                }),
                _ => None,
            })
            .collect();
        Self { checks }
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// True when some covering check came back available. A covering busy verdict does not
    /// cancel out a covering free one from a wider window.
    pub fn confirms(&self, draft: &MeetingDraft) -> bool {
        self.checks.iter().any(|check| check.available && check.covers(draft))
    }

    fn reports_busy(&self, draft: &MeetingDraft) -> bool {
        self.checks.iter().any(|check| !check.available && check.covers(draft))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, violation: PolicyViolation },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub require_availability_before_schedule: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { require_availability_before_schedule: true }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, action: &ValidatedAction, evidence: &TurnEvidence) -> GuardrailDecision {
        match action {
            ValidatedAction::ScheduleMeeting(draft)
                if self.require_availability_before_schedule && !evidence.confirms(draft) =>
            {
                let reason_code = if evidence.reports_busy(draft) {
                    "attendees_busy"
                } else if evidence.is_empty() {
                    "availability_not_checked"
                } else {
                    "availability_check_mismatch"
                };
                GuardrailDecision::Deny {
                    reason_code,
                    violation: PolicyViolation::AvailabilityNotConfirmed,
                }
            }
            _ => GuardrailDecision::Allow,
        }
    }
}
