use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::domain::action::{AvailabilityVerdict, MeetingDraft, MeetingReference};
use cadence_core::domain::timestamp::TimeWindow;
use cadence_core::errors::GatewayError;

use crate::CalendarGateway;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    pub title: String,
    pub description: Option<String>,
    pub window: TimeWindow,
    pub attendees: Vec<String>,
    pub cancelled: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub check_availability: usize,
    pub schedule_meeting: usize,
    pub reschedule_meeting: usize,
    pub cancel_meeting: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.check_availability + self.schedule_meeting + self.reschedule_meeting + self.cancel_meeting
    }
}

#[derive(Default)]
struct CalendarState {
    events: BTreeMap<String, StoredEvent>,
    busy_blocks: Vec<(String, TimeWindow)>,
    next_id: u64,
    failures: VecDeque<GatewayError>,
    latency: Option<Duration>,
    calls: CallCounts,
}

impl CalendarState {
    fn insert(&mut self, draft: &MeetingDraft) -> MeetingReference {
        self.next_id += 1;
        let id = format!("evt-{:04}", self.next_id);
        self.events.insert(
            id.clone(),
            StoredEvent {
                title: draft.title.clone(),
                description: draft.description.clone(),
                window: draft.window,
                attendees: draft.attendees.clone(),
                cancelled: false,
            },
        );
        MeetingReference(id)
    }

    fn attendee_busy(&self, attendee: &str, window: &TimeWindow) -> bool {
        let blocked = self
            .busy_blocks
            .iter()
            .any(|(owner, block)| owner == attendee && block.overlaps(window));
        let booked = self.events.values().any(|event| {
            !event.cancelled
                && event.attendees.iter().any(|invitee| invitee == attendee)
                && event.window.overlaps(window)
        });
        blocked || booked
    }
}

/// Deterministic in-process calendar with failure injection, for tests and
/// dry runs.
#[derive(Clone, Default)]
pub struct InMemoryCalendar {
    state: Arc<Mutex<CalendarState>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_busy(self, attendee: impl Into<String>, window: TimeWindow) -> Self {
        self.lock().busy_blocks.push((attendee.into(), window));
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = Some(latency);
        self
    }

    pub fn seed_event(&self, draft: &MeetingDraft) -> MeetingReference {
        self.lock().insert(draft)
    }

    /// The next gateway call, whichever it is, fails with `error`.
    pub fn fail_next(&self, error: GatewayError) {
        self.lock().failures.push_back(error);
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn event(&self, reference: &MeetingReference) -> Option<StoredEvent> {
        self.lock().events.get(&reference.0).cloned()
    }

    pub fn live_events(&self) -> Vec<(MeetingReference, StoredEvent)> {
        self.lock()
            .events
            .iter()
            .filter(|(_, event)| !event.cancelled)
            .map(|(id, event)| (MeetingReference(id.clone()), event.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, CalendarState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl CalendarGateway for InMemoryCalendar {
    async fn check_availability(
        &self,
        window: &TimeWindow,
        attendees: &[String],
    ) -> Result<AvailabilityVerdict, GatewayError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.check_availability += 1;
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        Ok(AvailabilityVerdict::conjunctive(
            attendees.iter().map(|attendee| state.attendee_busy(attendee, window)),
        ))
    }

    async fn schedule_meeting(
        &self,
        draft: &MeetingDraft,
    ) -> Result<MeetingReference, GatewayError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.schedule_meeting += 1;
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        Ok(state.insert(draft))
    }

    async fn reschedule_meeting(
        &self,
        reference: &MeetingReference,
        window: &TimeWindow,
    ) -> Result<MeetingReference, GatewayError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.reschedule_meeting += 1;
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        match state.events.get_mut(&reference.0) {
            Some(event) if !event.cancelled => {
                event.window = *window;
                Ok(reference.clone())
            }
            _ => Err(GatewayError::NotFound(format!("event `{reference}` does not exist"))),
        }
    }

    async fn cancel_meeting(&self, reference: &MeetingReference) -> Result<(), GatewayError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.cancel_meeting += 1;
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        match state.events.get_mut(&reference.0) {
            Some(event) => {
                event.cancelled = true;
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("event `{reference}` does not exist"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use cadence_core::domain::action::{MeetingDraft, MeetingReference};
    use cadence_core::domain::timestamp::{SessionOffset, TimeWindow, ZonedTimestamp};
    use cadence_core::errors::GatewayError;

    use crate::memory::InMemoryCalendar;
    use crate::CalendarGateway;

    fn window(start: &str, end: &str) -> TimeWindow {
        let offset = SessionOffset::default();
        TimeWindow::new(
            ZonedTimestamp::parse_in(start, offset).expect("start"),
            ZonedTimestamp::parse_in(end, offset).expect("end"),
        )
    }

    fn sync_at_three() -> MeetingDraft {
        MeetingDraft {
            title: "Sync".to_string(),
            description: None,
            window: window("2025-01-23T15:00:00+05:00", "2025-01-23T16:00:00+05:00"),
            attendees: vec!["alice@x.com".to_string(), "bob@x.com".to_string()],
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let calendar = InMemoryCalendar::new();
        let reference = calendar.seed_event(&sync_at_three());

        calendar.cancel_meeting(&reference).await.expect("first cancel");
        calendar.cancel_meeting(&reference).await.expect("second cancel");

        assert!(calendar.event(&reference).is_some_and(|event| event.cancelled));
        assert_eq!(calendar.calls().cancel_meeting, 2);
    }

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let calendar = InMemoryCalendar::new();
        let missing = MeetingReference("evt-9999".to_string());

        let cancel = calendar.cancel_meeting(&missing).await.expect_err("unknown");
        let reschedule = calendar
            .reschedule_meeting(&missing, &sync_at_three().window)
            .await
            .expect_err("unknown");

        assert!(matches!(cancel, GatewayError::NotFound(_)));
        assert!(matches!(reschedule, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn reschedule_moves_the_busy_window() {
        let calendar = InMemoryCalendar::new();
        let reference = calendar.seed_event(&sync_at_three());
        let attendees = vec!["alice@x.com".to_string()];
        let old = sync_at_three().window;
        let new = window("2025-01-23T16:00:00+05:00", "2025-01-23T17:00:00+05:00");

        assert!(!calendar.check_availability(&old, &attendees).await.expect("old").available);
        calendar.reschedule_meeting(&reference, &new).await.expect("reschedule");

        assert!(calendar.check_availability(&old, &attendees).await.expect("old").available);
        assert!(!calendar.check_availability(&new, &attendees).await.expect("new").available);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let calendar = InMemoryCalendar::new()
            .with_busy("carol@x.com", window("2025-01-23T09:00:00+05:00", "2025-01-23T18:00:00+05:00"));
        calendar.fail_next(GatewayError::AuthExpired("revoked".to_string()));

        let first = calendar
            .check_availability(&sync_at_three().window, &["carol@x.com".to_string()])
            .await;
        let second = calendar
            .check_availability(&sync_at_three().window, &["carol@x.com".to_string()])
            .await
            .expect("failure consumed");

        assert!(matches!(first, Err(GatewayError::AuthExpired(_))));
        assert!(!second.available);
        assert_eq!(calendar.calls().check_availability, 2);
        assert_eq!(calendar.calls().total(), 2);
    }
}
