use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use cadence_calendar::{
    CalendarGateway, CredentialStore, GoogleCalendarGateway, IssuedToken, OAuthRefresher,
};
use cadence_core::domain::action::{MeetingDraft, MeetingReference};
use cadence_core::domain::timestamp::{SessionOffset, TimeWindow, ZonedTimestamp};
use cadence_core::errors::GatewayError;
use chrono::Utc;
use reqwest::Client;
use secrecy::SecretString;
use serde_json::{json, Value};

#[derive(Default)]
struct FakeGoogle {
    issued: usize,
    next_event: usize,
    events: HashMap<String, Value>,
    deleted: HashSet<String>,
    unauthorized: usize,
}

type Shared = Arc<Mutex<FakeGoogle>>;

fn lock(shared: &Shared) -> std::sync::MutexGuard<'_, FakeGoogle> {
    shared.lock().expect("fake google state")
}

fn authorized(state: &mut FakeGoogle, headers: &HeaderMap) -> bool {
    let expected = format!("Bearer token-{}", state.issued);
    let presented = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    let ok = state.issued > 0 && presented == Some(expected.as_str());
    if !ok {
        state.unauthorized += 1;
    }
    ok
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": { "code": 401 } })))
}

async fn token(
    State(shared): State<Shared>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if form.get("refresh_token").map(String::as_str) == Some("revoked") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant", "error_description": "Token has been expired or revoked." })),
        );
    }
    let mut state = lock(&shared);
    state.issued += 1;
    (
        StatusCode::OK,
        Json(json!({ "access_token": format!("token-{}", state.issued), "expires_in": 3600 })),
    )
}

async fn free_busy(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&mut lock(&shared), &headers) {
        return unauthorized();
    }
    let mut calendars = serde_json::Map::new();
    for item in body["items"].as_array().cloned().unwrap_or_default() {
        let id = item["id"].as_str().unwrap_or_default().to_string();
        let busy = if id == "bob@x.com" {
            json!([{ "start": body["timeMin"], "end": body["timeMax"] }])
        } else {
            json!([])
        };
        calendars.insert(id, json!({ "busy": busy }));
    }
    (StatusCode::OK, Json(json!({ "calendars": calendars })))
}

async fn insert_event(
    State(shared): State<Shared>,
    Path(_calendar): Path<String>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut state = lock(&shared);
    if !authorized(&mut state, &headers) {
        return unauthorized();
    }
    state.next_event += 1;
    let id = format!("g-{}", state.next_event);
    body["id"] = json!(id);
    state.events.insert(id, body.clone());
    (StatusCode::OK, Json(body))
}

async fn get_event(
    State(shared): State<Shared>,
    Path((_calendar, event)): Path<(String, String)>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let mut state = lock(&shared);
    if !authorized(&mut state, &headers) {
        return unauthorized();
    }
    if state.deleted.contains(&event) {
        return (StatusCode::OK, Json(json!({ "id": event, "status": "cancelled" })));
    }
    match state.events.get(&event) {
        Some(stored) => (StatusCode::OK, Json(stored.clone())),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": { "code": 404 } }))),
    }
}

async fn update_event(
    State(shared): State<Shared>,
    Path((_calendar, event)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut state = lock(&shared);
    if !authorized(&mut state, &headers) {
        return unauthorized();
    }
    if !state.events.contains_key(&event) {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": { "code": 404 } })));
    }
    state.events.insert(event, body.clone());
    (StatusCode::OK, Json(body))
}

async fn delete_event(
    State(shared): State<Shared>,
    Path((_calendar, event)): Path<(String, String)>,
    headers: HeaderMap,
) -> StatusCode {
    let mut state = lock(&shared);
    if !authorized(&mut state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if state.deleted.contains(&event) {
        return StatusCode::GONE;
    }
    if state.events.remove(&event).is_some() {
        state.deleted.insert(event);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn spawn_fake(shared: Shared) -> String {
    let app = Router::new()
        .route("/token", post(token))
        .route("/calendar/v3/freeBusy", post(free_busy))
        .route("/calendar/v3/calendars/{calendar}/events", post(insert_event))
        .route(
            "/calendar/v3/calendars/{calendar}/events/{event}",
            get(get_event).put(update_event).delete(delete_event),
        )
        .with_state(shared);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind fake google");
    let address = listener.local_addr().expect("local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake google server");
    });
    format!("http://{address}")
}

fn gateway(base: &str, store: CredentialStore) -> (GoogleCalendarGateway, Arc<CredentialStore>) {
    let store = Arc::new(store);
    let gateway = GoogleCalendarGateway::new(
        Client::new(),
        &format!("{base}/calendar/v3"),
        "primary",
        "Asia/Karachi",
        store.clone(),
    )
    .expect("gateway");
    (gateway, store)
}

fn refresher(base: &str, refresh_token: &str) -> Arc<OAuthRefresher> {
    Arc::new(OAuthRefresher::new(
        Client::new(),
        format!("{base}/token"),
        Some("client-id".to_string()),
        Some(SecretString::from("client-secret".to_string())),
        Some(SecretString::from(refresh_token.to_string())),
    ))
}

fn window(start: &str, end: &str) -> TimeWindow {
    let offset = SessionOffset::default();
    TimeWindow::new(
        ZonedTimestamp::parse_in(start, offset).expect("start"),
        ZonedTimestamp::parse_in(end, offset).expect("end"),
    )
}

fn sync_draft() -> MeetingDraft {
    MeetingDraft {
        title: "Sync".to_string(),
        description: Some("weekly".to_string()),
        window: window("2025-01-23T15:00:00+05:00", "2025-01-23T16:00:00+05:00"),
        attendees: vec!["alice@x.com".to_string(), "bob@x.com".to_string()],
    }
}

#[tokio::test]
async fn lifecycle_against_fake_google() {
    let shared = Shared::default();
    let base = spawn_fake(shared.clone()).await;
    let (gateway, store) = gateway(&base, CredentialStore::new(refresher(&base, "1//good")));

    let reference = gateway.schedule_meeting(&sync_draft()).await.expect("insert");
    assert_eq!(reference, MeetingReference("g-1".to_string()));
    {
        let state = lock(&shared);
        let stored = &state.events["g-1"];
        assert_eq!(stored["summary"], "Sync");
        assert_eq!(stored["start"]["timeZone"], "Asia/Karachi");
        assert_eq!(stored["attendees"][0]["email"], "alice@x.com");
    }

    let four = window("2025-01-23T16:00:00+05:00", "2025-01-23T17:00:00+05:00");
    let both = vec!["alice@x.com".to_string(), "bob@x.com".to_string()];
    let alice = vec!["alice@x.com".to_string()];
    assert!(!gateway.check_availability(&four, &both).await.expect("freebusy").available);
    assert!(gateway.check_availability(&four, &alice).await.expect("freebusy").available);

    let moved = gateway.reschedule_meeting(&reference, &four).await.expect("update");
    assert_eq!(moved, reference);
    assert_eq!(lock(&shared).events["g-1"]["start"]["dateTime"], "2025-01-23T16:00:00+05:00");
    assert_eq!(lock(&shared).events["g-1"]["summary"], "Sync");

    gateway.cancel_meeting(&reference).await.expect("delete");
    gateway.cancel_meeting(&reference).await.expect("410 is success");

    let after_cancel = gateway
        .reschedule_meeting(&reference, &four)
        .await
        .expect_err("cancelled events cannot move");
    assert!(matches!(after_cancel, GatewayError::NotFound(_)));

    let unknown = gateway
        .cancel_meeting(&MeetingReference("g-404".to_string()))
        .await
        .expect_err("unknown event");
    assert!(matches!(unknown, GatewayError::NotFound(_)));

    assert_eq!(store.refresh_count(), 1);
}

#[tokio::test]
async fn rejected_token_is_refreshed_and_replayed_once() {
    let shared = Shared::default();
    let base = spawn_fake(shared.clone()).await;
    let stale = CredentialStore::new(refresher(&base, "1//good")).with_token(IssuedToken {
        access_token: "revoked-upstream".to_string(),
        refresh_token: None,
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
    });
    let (gateway, store) = gateway(&base, stale);

    let verdict = gateway
        .check_availability(
            &window("2025-01-23T16:00:00+05:00", "2025-01-23T17:00:00+05:00"),
            &["alice@x.com".to_string()],
        )
        .await
        .expect("replayed after refresh");

    assert!(verdict.available);
    assert_eq!(store.refresh_count(), 1);
    assert_eq!(lock(&shared).unauthorized, 1);
}

#[tokio::test]
async fn revoked_refresh_token_surfaces_auth_expired() {
    let shared = Shared::default();
    let base = spawn_fake(shared.clone()).await;
    let (gateway, _store) = gateway(&base, CredentialStore::new(refresher(&base, "revoked")));

    let error = gateway.schedule_meeting(&sync_draft()).await.expect_err("no credential");

    assert!(matches!(error, GatewayError::AuthExpired(ref detail) if detail.contains("invalid_grant")));
    assert!(lock(&shared).events.is_empty());
}

#[tokio::test]
async fn unreachable_backend_is_unavailable_not_a_panic() {
    let store = CredentialStore::new(refresher("http://127.0.0.1:9", "1//good"));
    let (gateway, _store) = gateway("http://127.0.0.1:9", store);

    let error = gateway.cancel_meeting(&MeetingReference("g-1".to_string())).await.expect_err("no server");

    assert!(matches!(error, GatewayError::BackendUnavailable(_)));
}
