use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::config::CalendarConfig;
use cadence_core::domain::action::{AvailabilityVerdict, MeetingDraft, MeetingReference};
use cadence_core::domain::timestamp::TimeWindow;
use cadence_core::errors::GatewayError;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auth::CredentialStore;
use crate::CalendarGateway;

const MAX_ERROR_DETAIL: usize = 300;

/// Google Calendar v3 REST adapter.
pub struct GoogleCalendarGateway {
    client: Client,
    base_url: Url,
    calendar_id: String,
    time_zone: String,
    credentials: Arc<CredentialStore>,
}

impl GoogleCalendarGateway {
    pub fn new(
        client: Client,
        base_url: &str,
        calendar_id: impl Into<String>,
        time_zone: impl Into<String>,
        credentials: Arc<CredentialStore>,
    ) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url).map_err(|error| {
            GatewayError::BackendRejected(format!("invalid calendar base url `{base_url}`: {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::BackendRejected(format!(
                "calendar base url `{base_url}` cannot carry path segments"
            )));
        }

        Ok(Self {
            client,
            base_url,
            calendar_id: calendar_id.into(),
            time_zone: time_zone.into(),
            credentials,
        })
    }

    pub fn from_config(
        config: &CalendarConfig,
        credentials: Arc<CredentialStore>,
    ) -> Result<Self, GatewayError> {
        let client = http_client(Duration::from_secs(config.request_timeout_secs))?;
        Self::new(
            client,
            &config.base_url,
            config.calendar_id.clone(),
            config.time_zone.clone(),
            credentials,
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn events_url(&self) -> Url {
        self.endpoint(&["calendars", self.calendar_id.as_str(), "events"])
    }

    fn event_url(&self, reference: &MeetingReference) -> Url {
        self.endpoint(&["calendars", self.calendar_id.as_str(), "events", reference.0.as_str()])
    }

    /// Sends with a bearer token. A 401 invalidates the token and the request is
    /// replayed once with a freshly refreshed one.
    async fn send_authorized<F>(&self, operation: &'static str, build: F) -> Result<Response, GatewayError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let mut replayed = false;
        loop {
            let token = self.credentials.access_token().await?;
            let response = build(&self.client)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|error| transport_error(operation, &error))?;

            if response.status() == StatusCode::UNAUTHORIZED && !replayed {
                warn!(
                    event_name = "calendar.request.unauthorized",
                    operation,
                    "calendar rejected access token, refreshing once"
                );
                self.credentials.invalidate(&token).await;
                replayed = true;
                continue;
            }

            return Ok(response);
        }
    }
}

pub fn http_client(timeout: Duration) -> Result<Client, GatewayError> {
    Client::builder().timeout(timeout).build().map_err(|error| {
        GatewayError::BackendUnavailable(format!("could not build http client: {error}"))
    })
}

#[async_trait]
impl CalendarGateway for GoogleCalendarGateway {
    async fn check_availability(
        &self,
        window: &TimeWindow,
        attendees: &[String],
    ) -> Result<AvailabilityVerdict, GatewayError> {
        let url = self.endpoint(&["freeBusy"]);
        let body = freebusy_body(window, attendees, &self.time_zone);
        let response = self
            .send_authorized("freebusy", |client| client.post(url.clone()).json(&body))
            .await?;
        let payload: Value = ensure_success("freebusy", response).await?.json().await.map_err(
            |error| GatewayError::BackendUnavailable(format!("undecodable freeBusy reply: {error}")),
        )?;

        let verdict = verdict_from_freebusy(&payload, attendees);
        debug!(
            event_name = "calendar.freebusy.answered",
            attendees = attendees.len(),
            available = verdict.available,
            "free/busy query answered"
        );
        Ok(verdict)
    }

    async fn schedule_meeting(
        &self,
        draft: &MeetingDraft,
    ) -> Result<MeetingReference, GatewayError> {
        let url = self.events_url();
        let body = event_body(draft, &self.time_zone);
        let response = self
            .send_authorized("events.insert", |client| client.post(url.clone()).json(&body))
            .await?;
        let created = read_event("events.insert", response).await?;
        let reference = event_reference(&created)?;

        info!(
            event_name = "calendar.event.created",
            reference = %reference,
            "calendar event created"
        );
        Ok(reference)
    }

    async fn reschedule_meeting(
        &self,
        reference: &MeetingReference,
        window: &TimeWindow,
    ) -> Result<MeetingReference, GatewayError> {
        let url = self.event_url(reference);
        let response =
            self.send_authorized("events.get", |client| client.get(url.clone())).await?;
        let mut event = read_event("events.get", response).await?;
        if event.get("status").and_then(Value::as_str) == Some("cancelled") {
            return Err(GatewayError::NotFound(format!("event `{reference}` is cancelled")));
        }

        retime_event(&mut event, window, &self.time_zone);
        let response = self
            .send_authorized("events.update", |client| client.put(url.clone()).json(&event))
            .await?;
        let updated = read_event("events.update", response).await?;
        let updated_reference = event_reference(&updated)?;

        info!(
            event_name = "calendar.event.rescheduled",
            reference = %updated_reference,
            start = %window.start,
            "calendar event rescheduled"
        );
        Ok(updated_reference)
    }

    async fn cancel_meeting(&self, reference: &MeetingReference) -> Result<(), GatewayError> {
        let url = self.event_url(reference);
        let response =
            self.send_authorized("events.delete", |client| client.delete(url.clone())).await?;

        if response.status() == StatusCode::GONE {
            debug!(
                event_name = "calendar.event.already_cancelled",
                reference = %reference,
                "event was already deleted"
            );
            return Ok(());
        }
        ensure_success("events.delete", response).await?;

        info!(event_name = "calendar.event.cancelled", reference = %reference, "calendar event cancelled");
        Ok(())
    }
}

fn transport_error(operation: &str, error: &reqwest::Error) -> GatewayError {
    warn!(
        event_name = "calendar.request.transport_failed",
        operation,
        timeout = error.is_timeout(),
        error = %error,
        "calendar request did not complete"
    );
    GatewayError::BackendUnavailable(format!("{operation}: {error}"))
}

async fn ensure_success(operation: &str, response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let error = classify_status(operation, status, &body);
    warn!(
        event_name = "calendar.request.rejected",
        operation,
        status = status.as_u16(),
        error_code = error.code(),
        "calendar request failed"
    );
    Err(error)
}

async fn read_event(operation: &str, response: Response) -> Result<Value, GatewayError> {
    ensure_success(operation, response).await?.json::<Value>().await.map_err(|error| {
        GatewayError::BackendUnavailable(format!("{operation}: undecodable event body: {error}"))
    })
}

pub(crate) fn classify_status(operation: &str, status: StatusCode, body: &str) -> GatewayError {
    let mut detail: String = body.chars().take(MAX_ERROR_DETAIL).collect();
    if detail.trim().is_empty() {
        detail = status.to_string();
    }
    let detail = format!("{operation}: {detail}");

    match status {
        StatusCode::UNAUTHORIZED => GatewayError::AuthExpired(detail),
        StatusCode::NOT_FOUND | StatusCode::GONE => GatewayError::NotFound(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            GatewayError::BackendUnavailable(detail)
        }
        StatusCode::FORBIDDEN if body.contains("rateLimitExceeded") => {
            GatewayError::BackendUnavailable(detail)
        }
        status if status.is_server_error() => GatewayError::BackendUnavailable(detail),
        _ => GatewayError::BackendRejected(detail),
    }
}

pub(crate) fn freebusy_body(window: &TimeWindow, attendees: &[String], time_zone: &str) -> Value {
    json!({
        "timeMin": window.start.to_rfc3339(),
        "timeMax": window.end.to_rfc3339(),
        "timeZone": time_zone,
        "items": attendees.iter().map(|attendee| json!({ "id": attendee })).collect::<Vec<_>>(),
    })
}

/// An attendee counts as busy when the reply lists busy blocks, reports errors
/// for that calendar, or omits it entirely.
pub(crate) fn verdict_from_freebusy(payload: &Value, attendees: &[String]) -> AvailabilityVerdict {
    let calendars = payload.get("calendars");
    AvailabilityVerdict::conjunctive(attendees.iter().map(|attendee| {
        let Some(calendar) = calendars.and_then(|calendars| calendars.get(attendee)) else {
            return true;
        };
        let has_errors = calendar
            .get("errors")
            .and_then(Value::as_array)
            .is_some_and(|errors| !errors.is_empty());
        let has_busy = calendar
            .get("busy")
            .and_then(Value::as_array)
            .is_some_and(|busy| !busy.is_empty());
        has_errors || has_busy
    }))
}

pub(crate) fn event_body(draft: &MeetingDraft, time_zone: &str) -> Value {
    json!({
        "summary": draft.title,
        "description": draft.description.clone().unwrap_or_default(),
        "start": { "dateTime": draft.window.start.to_rfc3339(), "timeZone": time_zone },
        "end": { "dateTime": draft.window.end.to_rfc3339(), "timeZone": time_zone },
        "attendees": draft
            .attendees
            .iter()
            .map(|email| json!({ "email": email }))
            .collect::<Vec<_>>(),
    })
}

pub(crate) fn retime_event(event: &mut Value, window: &TimeWindow, time_zone: &str) {
    if let Some(fields) = event.as_object_mut() {
        fields.insert(
            "start".to_string(),
            json!({ "dateTime": window.start.to_rfc3339(), "timeZone": time_zone }),
        );
        fields.insert(
            "end".to_string(),
            json!({ "dateTime": window.end.to_rfc3339(), "timeZone": time_zone }),
        );
    }
}

fn event_reference(event: &Value) -> Result<MeetingReference, GatewayError> {
    event
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(|id| MeetingReference(id.to_string()))
        .ok_or_else(|| GatewayError::BackendRejected("event reply carried no id".to_string()))
}

#[cfg(test)]
mod tests {
    use cadence_core::domain::action::{MeetingDraft, MeetingReference};
    use cadence_core::domain::timestamp::{SessionOffset, TimeWindow, ZonedTimestamp};
    use cadence_core::errors::GatewayError;
    use reqwest::StatusCode;
    use serde_json::json;

    use super::{
        classify_status, event_body, event_reference, freebusy_body, retime_event,
        verdict_from_freebusy,
    };

    fn window(start: &str, end: &str) -> TimeWindow {
        let offset = SessionOffset::default();
        TimeWindow::new(
            ZonedTimestamp::parse_in(start, offset).expect("start"),
            ZonedTimestamp::parse_in(end, offset).expect("end"),
        )
    }

    fn attendees() -> Vec<String> {
        vec!["alice@x.com".to_string(), "bob@x.com".to_string()]
    }

    #[test]
    fn freebusy_body_lists_every_attendee() {
        let body = freebusy_body(
            &window("2025-01-23T16:00:00+05:00", "2025-01-23T17:00:00+05:00"),
            &attendees(),
            "Asia/Karachi",
        );

        assert_eq!(body["timeMin"], "2025-01-23T16:00:00+05:00");
        assert_eq!(body["items"], json!([{ "id": "alice@x.com" }, { "id": "bob@x.com" }]));
    }

    #[test]
    fn one_busy_attendee_blocks_the_set() {
        let payload = json!({
            "calendars": {
                "alice@x.com": { "busy": [] },
                "bob@x.com": { "busy": [{ "start": "x", "end": "y" }] },
            }
        });
        assert!(!verdict_from_freebusy(&payload, &attendees()).available);

        let free = json!({
            "calendars": { "alice@x.com": { "busy": [] }, "bob@x.com": { "busy": [] } }
        });
        assert!(verdict_from_freebusy(&free, &attendees()).available);
    }

    #[test]
    fn unknown_or_errored_calendars_count_as_busy() {
        let missing = json!({ "calendars": { "alice@x.com": { "busy": [] } } });
        assert!(!verdict_from_freebusy(&missing, &attendees()).available);

        let errored = json!({
            "calendars": {
                "alice@x.com": { "busy": [] },
                "bob@x.com": { "errors": [{ "domain": "global", "reason": "notFound" }], "busy": [] },
            }
        });
        assert!(!verdict_from_freebusy(&errored, &attendees()).available);
    }

    #[test]
    fn event_body_carries_zone_label_and_attendees() {
        let draft = MeetingDraft {
            title: "Sync".to_string(),
            description: None,
            window: window("2025-01-23T16:00:00+05:00", "2025-01-23T17:00:00+05:00"),
            attendees: attendees(),
        };
        let body = event_body(&draft, "Asia/Karachi");

        assert_eq!(body["summary"], "Sync");
        assert_eq!(body["description"], "");
        assert_eq!(body["start"]["timeZone"], "Asia/Karachi");
        assert_eq!(body["end"]["dateTime"], "2025-01-23T17:00:00+05:00");
        assert_eq!(body["attendees"][1]["email"], "bob@x.com");
    }

    #[test]
    fn retime_replaces_only_the_window() {
        let mut event = json!({
            "id": "evt-1",
            "summary": "Sync",
            "start": { "dateTime": "2025-01-23T15:00:00+05:00" },
            "end": { "dateTime": "2025-01-23T16:00:00+05:00" },
        });
        retime_event(
            &mut event,
            &window("2025-01-23T16:00:00+05:00", "2025-01-23T17:00:00+05:00"),
            "Asia/Karachi",
        );

        assert_eq!(event["summary"], "Sync");
        assert_eq!(event["start"]["dateTime"], "2025-01-23T16:00:00+05:00");
        assert_eq!(event_reference(&event), Ok(MeetingReference("evt-1".to_string())));
    }

    #[test]
    fn statuses_map_onto_gateway_errors() {
        assert!(matches!(
            classify_status("events.get", StatusCode::NOT_FOUND, ""),
            GatewayError::NotFound(_)
        ));
        assert!(matches!(
            classify_status("events.insert", StatusCode::BAD_REQUEST, "{\"error\":{}}"),
            GatewayError::BackendRejected(_)
        ));
        assert!(matches!(
            classify_status("events.insert", StatusCode::FORBIDDEN, "forbidden"),
            GatewayError::BackendRejected(_)
        ));
        assert!(matches!(
            classify_status("freebusy", StatusCode::FORBIDDEN, "rateLimitExceeded"),
            GatewayError::BackendUnavailable(_)
        ));
        assert!(matches!(
            classify_status("freebusy", StatusCode::SERVICE_UNAVAILABLE, ""),
            GatewayError::BackendUnavailable(_)
        ));
        assert!(matches!(
            classify_status("freebusy", StatusCode::UNAUTHORIZED, ""),
            GatewayError::AuthExpired(_)
        ));
    }
}
