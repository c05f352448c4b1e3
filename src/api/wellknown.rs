//! Well-known endpoints
//!
//! - /.well-known/webfinger
//! - /.well-known/nodeinfo
//! - /.well-known/host-meta

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::JRD_JSON;
use crate::federation::objects::NODEINFO_PROFILE;
use crate::metrics::HTTP_REQUESTS_TOTAL;

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
/// - GET /.well-known/nodeinfo
/// - GET /.well-known/host-meta
///
/// The NodeInfo document itself is served by the federation runtime.
pub fn wellknown_router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .route("/.well-known/nodeinfo", get(nodeinfo_links))
        .route("/.well-known/host-meta", get(host_meta))
}

#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: Option<String>,
}

/// GET /.well-known/webfinger
///
/// Query: ?resource=acct:user@domain
///
/// Anything the resolver cannot answer, including a missing or malformed
/// resource, is a plain 404.
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<Response, AppError> {
    let found = match query.resource.as_deref() {
        Some(resource) => state.resolver.resolve(resource).await?,
        None => None,
    };

    let Some(jrd) = found else {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/.well-known/webfinger", "404"])
            .inc();
        return Err(AppError::NotFound);
    };

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/.well-known/webfinger", "200"])
        .inc();

    let mut response = Json(jrd).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(JRD_JSON));
    Ok(response)
}

/// GET /.well-known/nodeinfo
async fn nodeinfo_links(State(state): State<AppState>) -> Json<serde_json::Value> {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/.well-known/nodeinfo", "200"])
        .inc();

    Json(serde_json::json!({
        "links": [
            {
                "rel": NODEINFO_PROFILE,
                "href": state.uris.nodeinfo_uri()
            }
        ]
    }))
}

/// GET /.well-known/host-meta
///
/// XRD document pointing clients at the WebFinger template.
async fn host_meta(State(state): State<AppState>) -> impl IntoResponse {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/.well-known/host-meta", "200"])
        .inc();

    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<XRD xmlns="http://docs.oasis-open.org/ns/xri/xrd-1.0">
  <Link rel="lrdd" template="{}/.well-known/webfinger?resource={{uri}}"/>
</XRD>"#,
        state.uris.origin()
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xrd+xml")],
        xml,
    )
}
