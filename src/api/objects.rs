//! Object endpoints
//!
//! - /notes/:id
//!
//! Note IRIs are published in `Create.object.id`, so peers dereference them.
//! Requests are not authenticated, so only public and unlisted local notes
//! are served; everything else is a 404.

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};

use crate::AppState;
use crate::bridge::accepts_activity_json;
use crate::data::{NoteRepository, Visibility};
use crate::error::AppError;
use crate::federation::objects::ACTIVITY_JSON;
use crate::federation::to_note_document;
use crate::metrics::HTTP_REQUESTS_TOTAL;

/// Create object router
///
/// Routes:
/// - GET /notes/:id
pub fn objects_router() -> Router<AppState> {
    Router::new().route("/notes/:id", get(note))
}

/// GET /notes/:id
async fn note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut response = match note_document(&state, &id, &headers).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };

    response
        .headers_mut()
        .insert(header::VARY, HeaderValue::from_static("Accept"));
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/notes/:id", response.status().as_str()])
        .inc();

    response
}

async fn note_document(
    state: &AppState,
    id: &str,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    if !accepts_activity_json(headers, false) {
        return Err(AppError::NotAcceptable);
    }

    let note = state
        .db
        .find_note(id)
        .await?
        .filter(|note| note.is_local)
        .filter(|note| matches!(note.visibility, Visibility::Public | Visibility::Unlisted))
        .ok_or(AppError::NotFound)?;

    let mut response = Json(to_note_document(&state.uris, &note)).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(ACTIVITY_JSON));
    Ok(response)
}
