//! Calendar Gateway: the four calendar operations the executor may call, plus
//! the backends that implement them.

use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::domain::action::{AvailabilityVerdict, MeetingDraft, MeetingReference};
use cadence_core::domain::timestamp::TimeWindow;
use cadence_core::errors::GatewayError;

pub mod auth;
pub mod google;
pub mod memory;

pub use auth::{CredentialStore, IssuedToken, OAuthRefresher, TokenRefresher};
pub use google::GoogleCalendarGateway;
pub use memory::{CallCounts, InMemoryCalendar, StoredEvent};

/// Every operation either succeeds or fails with a [`GatewayError`]; transport
/// faults are classified before they leave the implementation.
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    async fn check_availability(
        &self,
        window: &TimeWindow,
        attendees: &[String],
    ) -> Result<AvailabilityVerdict, GatewayError>;

    async fn schedule_meeting(&self, draft: &MeetingDraft)
        -> Result<MeetingReference, GatewayError>;

    async fn reschedule_meeting(
        &self,
        reference: &MeetingReference,
        window: &TimeWindow,
    ) -> Result<MeetingReference, GatewayError>;

    /// Cancelling an already cancelled meeting succeeds.
    async fn cancel_meeting(&self, reference: &MeetingReference) -> Result<(), GatewayError>;
}

#[async_trait]
impl<T> CalendarGateway for Arc<T>
where
    T: CalendarGateway + ?Sized,
{
    async fn check_availability(
        &self,
        window: &TimeWindow,
        attendees: &[String],
    ) -> Result<AvailabilityVerdict, GatewayError> {
        (**self).check_availability(window, attendees).await
    }

    async fn schedule_meeting(
        &self,
        draft: &MeetingDraft,
    ) -> Result<MeetingReference, GatewayError> {
        (**self).schedule_meeting(draft).await
    }

    async fn reschedule_meeting(
        &self,
        reference: &MeetingReference,
        window: &TimeWindow,
    ) -> Result<MeetingReference, GatewayError> {
        (**self).reschedule_meeting(reference, window).await
    }

    async fn cancel_meeting(&self, reference: &MeetingReference) -> Result<(), GatewayError> {
        (**self).cancel_meeting(reference).await
    }
}
