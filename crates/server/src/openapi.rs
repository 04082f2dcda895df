// OpenAPI specification generation
//
// Served by the API server at /api-doc/openapi.json and printed by the
// export-openapi binary.

use crate::api;
use crate::api::common::PurgeResponse;
use crate::api::{ErrorResponse, ListResponse};
use calendar_core::{Event, EventDraft};
use utoipa::OpenApi;

/// OpenAPI documentation for the Calendar API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::events::create_event,
        api::events::list_events,
        api::events::get_event,
        api::events::update_event,
        api::events::delete_event,
        api::events::purge_events,
    ),
    components(
        schemas(
            Event, EventDraft,
            ListResponse<Event>,
            PurgeResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "events", description = "Owner-scoped calendar events")
    ),
    info(
        title = "Calendar API",
        version = "0.2.0",
        description = "API for creating and querying non-overlapping calendar events",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}
