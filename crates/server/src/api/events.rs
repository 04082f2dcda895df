// Event CRUD HTTP routes
//
// Every route is scoped to the Owner extracted from the request headers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use calendar_core::{Event, EventDraft};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use super::common::{ListResponse, PurgeResponse};
use super::error::ApiError;
use super::extract::{ApiJson, ApiQuery};
use super::owner::Owner;
use crate::services::EventService;

/// Query parameters for listing events
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct ListEventsQuery {
    /// Only events starting at or after this instant (RFC 3339). Defaults to now.
    pub since: Option<DateTime<Utc>>,
}

/// Query parameters for purging events
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct PurgeEventsQuery {
    /// Delete events that ended before this instant (RFC 3339).
    /// Defaults to now minus the retention period.
    pub older_than: Option<DateTime<Utc>>,
}

/// App state for event routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EventService>,
    /// Default age for purges without an explicit cutoff
    pub retention: chrono::Duration,
}

impl AppState {
    pub fn new(service: Arc<EventService>, retention: chrono::Duration) -> Self {
        Self { service, retention }
    }
}

/// Create event routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/events",
            post(create_event).get(list_events).delete(purge_events),
        )
        .route(
            "/v1/events/:event_id",
            get(get_event).put(update_event).delete(delete_event),
        )
        .with_state(state)
}

/// POST /v1/events - Create an event
#[utoipa::path(
    post,
    path = "/v1/events",
    request_body = EventDraft,
    params(("x-owner" = String, Header, description = "Owner of the event")),
    responses(
        (status = 201, description = "Event created", body = Event),
        (status = 400, description = "Invalid input", body = super::ErrorResponse),
        (status = 401, description = "Missing owner", body = super::ErrorResponse),
        (status = 409, description = "Overlaps another event", body = super::ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "events"
)]
pub async fn create_event(
    State(state): State<AppState>,
    owner: Owner,
    ApiJson(draft): ApiJson<EventDraft>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let event = state.service.create(&owner.0, draft).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /v1/events - List events starting at or after `since`
#[utoipa::path(
    get,
    path = "/v1/events",
    params(
        ("x-owner" = String, Header, description = "Owner of the events"),
        ListEventsQuery
    ),
    responses(
        (status = 200, description = "Events ordered by start time", body = ListResponse<Event>),
        (status = 401, description = "Missing owner", body = super::ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "events"
)]
pub async fn list_events(
    State(state): State<AppState>,
    owner: Owner,
    ApiQuery(query): ApiQuery<ListEventsQuery>,
) -> Result<Json<ListResponse<Event>>, ApiError> {
    let since = query.since.unwrap_or_else(Utc::now);
    let events = state.service.list_since(&owner.0, since).await?;
    Ok(Json(events.into()))
}

/// GET /v1/events/{event_id} - Get one event
#[utoipa::path(
    get,
    path = "/v1/events/{event_id}",
    params(
        ("x-owner" = String, Header, description = "Owner of the event"),
        ("event_id" = String, Path, description = "Event ID")
    ),
    responses(
        (status = 200, description = "Event found", body = Event),
        (status = 400, description = "Malformed event ID", body = super::ErrorResponse),
        (status = 404, description = "Event not found", body = super::ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "events"
)]
pub async fn get_event(
    State(state): State<AppState>,
    owner: Owner,
    Path(event_id): Path<String>,
) -> Result<Json<Event>, ApiError> {
    let event = state.service.get(&owner.0, &event_id).await?;
    Ok(Json(event))
}

/// PUT /v1/events/{event_id} - Replace title, text and times
#[utoipa::path(
    put,
    path = "/v1/events/{event_id}",
    request_body = EventDraft,
    params(
        ("x-owner" = String, Header, description = "Owner of the event"),
        ("event_id" = String, Path, description = "Event ID")
    ),
    responses(
        (status = 200, description = "Event updated", body = Event),
        (status = 400, description = "Invalid input", body = super::ErrorResponse),
        (status = 404, description = "Event not found", body = super::ErrorResponse),
        (status = 409, description = "Overlaps another event", body = super::ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "events"
)]
pub async fn update_event(
    State(state): State<AppState>,
    owner: Owner,
    Path(event_id): Path<String>,
    ApiJson(draft): ApiJson<EventDraft>,
) -> Result<Json<Event>, ApiError> {
    let event = state.service.update(&owner.0, &event_id, draft).await?;
    Ok(Json(event))
}

/// DELETE /v1/events/{event_id} - Delete one event
#[utoipa::path(
    delete,
    path = "/v1/events/{event_id}",
    params(
        ("x-owner" = String, Header, description = "Owner of the event"),
        ("event_id" = String, Path, description = "Event ID")
    ),
    responses(
        (status = 204, description = "Event deleted"),
        (status = 400, description = "Malformed event ID", body = super::ErrorResponse),
        (status = 404, description = "Event not found", body = super::ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "events"
)]
pub async fn delete_event(
    State(state): State<AppState>,
    owner: Owner,
    Path(event_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete(&owner.0, &event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/events - Delete the owner's events that ended before a cutoff
#[utoipa::path(
    delete,
    path = "/v1/events",
    params(
        ("x-owner" = String, Header, description = "Owner of the events"),
        PurgeEventsQuery
    ),
    responses(
        (status = 200, description = "Events purged", body = PurgeResponse),
        (status = 401, description = "Missing owner", body = super::ErrorResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "events"
)]
pub async fn purge_events(
    State(state): State<AppState>,
    owner: Owner,
    ApiQuery(query): ApiQuery<PurgeEventsQuery>,
) -> Result<Json<PurgeResponse>, ApiError> {
    let cutoff = match query.older_than {
        Some(cutoff) => cutoff,
        None => match Utc::now().checked_sub_signed(state.retention) {
            Some(cutoff) => cutoff,
            // nothing can have ended that long ago
            None => return Ok(Json(PurgeResponse { deleted: 0 })),
        },
    };
    let deleted = state.service.delete_older_than(&owner.0, cutoff).await?;
    Ok(Json(PurgeResponse { deleted }))
}
