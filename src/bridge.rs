//! Request context bridge
//!
//! Adapts axum requests into the context handed to every dispatcher, and
//! turns dispatcher results back into responses. Dispatchers only ever see
//! [`RequestContext`], never axum types.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header, request::Parts};
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::AppState;
use crate::config::AppConfig;
use crate::data::Store;
use crate::error::AppError;
use crate::federation::objects::{ACTIVITY_JSON, NODEINFO_JSON};
use crate::federation::{
    InboxOutcome, ResolvedRoute, UriBuilder, extract_signature_key_id, id_of,
    key_id_matches_actor,
};
use crate::metrics::{ACTIVITIES_RECEIVED, FEDERATION_REQUESTS_TOTAL};

/// Response status and headers set by a dispatcher
#[derive(Debug, Default)]
pub struct ResponseSink {
    inner: Mutex<SinkState>,
}

#[derive(Debug, Default)]
struct SinkState {
    status: Option<StatusCode>,
    headers: HeaderMap,
}

impl ResponseSink {
    pub fn set_status(&self, status: StatusCode) {
        self.lock().status = Some(status);
    }

    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().headers.insert(name, value);
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    fn apply(&self, response: &mut Response) {
        let state = self.lock();
        if let Some(status) = state.status {
            *response.status_mut() = status;
        }
        for (name, value) in &state.headers {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct ContextInner {
    method: Method,
    headers: HeaderMap,
    url: Url,
    store: Arc<dyn Store>,
    config: Arc<AppConfig>,
    uris: UriBuilder,
    response: ResponseSink,
}

/// Execution context of one federation request
///
/// Cheap to clone; clones share the same response sink.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl RequestContext {
    pub fn new(
        parts: &Parts,
        store: Arc<dyn Store>,
        config: Arc<AppConfig>,
        uris: UriBuilder,
    ) -> Result<Self, AppError> {
        let url = reconstruct_url(parts, &config)?;

        Ok(Self {
            inner: Arc::new(ContextInner {
                method: parts.method.clone(),
                headers: parts.headers.clone(),
                url,
                store,
                config,
                uris,
                response: ResponseSink::default(),
            }),
        })
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Fully qualified request URL
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn uris(&self) -> &UriBuilder {
        &self.inner.uris
    }

    pub fn page_size(&self) -> usize {
        self.inner.config.federation.page_size
    }

    pub fn response(&self) -> &ResponseSink {
        &self.inner.response
    }
}

/// Rebuild `scheme://host/path?query` for a request
///
/// Proxies usually forward only the path, so scheme and host come from
/// `X-Forwarded-*`, then `Host`, then the request URI, then configuration.
pub fn reconstruct_url(parts: &Parts, config: &AppConfig) -> Result<Url, AppError> {
    let scheme = forwarded(&parts.headers, "x-forwarded-proto")
        .filter(|proto| matches!(proto.as_str(), "http" | "https"))
        .or_else(|| parts.uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| config.server.protocol.clone());

    let host = forwarded(&parts.headers, "x-forwarded-host")
        .or_else(|| {
            parts
                .headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .or_else(|| parts.uri.authority().map(|a| a.as_str().to_string()))
        .unwrap_or_else(|| config.server.domain.clone());

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Url::parse(&format!("{}://{}{}", scheme, host, path_and_query))
        .or_else(|_| Url::parse(&format!("{}{}", config.server.base_url(), path_and_query)))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("cannot rebuild request URL: {}", e)))
}

fn forwarded(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

/// Whether the client takes an ActivityStreams representation
///
/// A missing `Accept` header counts as `*/*`.
pub fn accepts_activity_json(headers: &HeaderMap, allow_plain_json: bool) -> bool {
    let values: Vec<&str> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        return true;
    }

    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(|item| item.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .any(|media| {
            matches!(
                media.as_str(),
                "application/activity+json" | "application/ld+json" | "*/*"
            ) || (allow_plain_json && media == "application/json")
        })
}

fn page_param(url: &Url) -> Result<Option<u32>, AppError> {
    match url.query_pairs().find(|(key, _)| key == "page") {
        None => Ok(None),
        Some((_, value)) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|_| AppError::Validation("page must be a positive integer".to_string())),
    }
}

/// axum fallback serving every federation route
pub async fn federation_entry(State(state): State<AppState>, request: Request) -> Response {
    let Some(route) = state.federation.resolve(request.uri().path()) else {
        return AppError::NotFound.into_response();
    };

    let mut response = match handle(&state, &route, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };

    response
        .headers_mut()
        .insert(header::VARY, HeaderValue::from_static("Accept"));
    FEDERATION_REQUESTS_TOTAL
        .with_label_values(&[route.endpoint_name(), response.status().as_str()])
        .inc();

    response
}

async fn handle(
    state: &AppState,
    route: &ResolvedRoute,
    request: Request,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();

    if route.is_inbox() {
        if parts.method != Method::POST {
            return Ok(method_not_allowed("POST"));
        }
        return handle_inbox(state, route, parts, body).await;
    }

    if parts.method != Method::GET && parts.method != Method::HEAD {
        return Ok(method_not_allowed("GET"));
    }
    if !accepts_activity_json(&parts.headers, route.is_nodeinfo()) {
        return Err(AppError::NotAcceptable);
    }

    let ctx = state.request_context(&parts)?;
    let page = page_param(ctx.url())?;
    let document = state
        .federation
        .dispatch_get(route, ctx.clone(), page)
        .await?
        .ok_or(AppError::NotFound)?;

    let content_type = if route.is_nodeinfo() {
        NODEINFO_JSON
    } else {
        ACTIVITY_JSON
    };
    let body = serde_json::to_vec(&document).map_err(|e| AppError::Internal(e.into()))?;

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(content_type))],
        body,
    )
        .into_response();
    ctx.response().apply(&mut response);
    Ok(response)
}

async fn handle_inbox(
    state: &AppState,
    route: &ResolvedRoute,
    parts: Parts,
    body: Body,
) -> Result<Response, AppError> {
    let limit = state.config.federation.max_inbox_body_bytes;
    let Ok(bytes) = axum::body::to_bytes(body, limit).await else {
        return Ok(StatusCode::PAYLOAD_TOO_LARGE.into_response());
    };

    let activity: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(error = %e, "Rejected unparseable inbox payload");
        AppError::Validation("Invalid JSON".to_string())
    })?;
    let actor = id_of(activity.get("actor"), "actor").map_err(|e| {
        tracing::debug!(error = %e, "Rejected inbox payload without actor");
        AppError::from(e)
    })?;

    let key_id = extract_signature_key_id(&parts.headers)?;
    if !key_id_matches_actor(&key_id, &actor) {
        tracing::debug!(key_id = %key_id, actor = %actor, "Signature key does not belong to actor");
        return Err(AppError::Unauthorized);
    }

    let ctx = state.request_context(&parts)?;
    let outcome = state
        .federation
        .dispatch_inbox(route, ctx.clone(), activity)
        .await?;

    let kind = match outcome {
        InboxOutcome::Handled(kind) => kind,
        InboxOutcome::Ignored(kind) => {
            tracing::debug!(activity_type = %kind, actor = %actor, "No listener for activity, ignored");
            kind
        }
    };
    tracing::info!(activity_type = %kind, actor = %actor, "Received activity");
    ACTIVITIES_RECEIVED.with_label_values(&[kind.as_str()]).inc();

    let mut response = StatusCode::ACCEPTED.into_response();
    ctx.response().apply(&mut response);
    Ok(response)
}

fn method_not_allowed(allow: &'static str) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, HeaderValue::from_static(allow))],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_config;

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = axum::http::Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn url_prefers_forwarded_headers() {
        let parts = parts(
            "/actors/alice?page=2",
            &[
                ("x-forwarded-proto", "https"),
                ("x-forwarded-host", "social.example.com, proxy.internal"),
                ("host", "127.0.0.1:8080"),
            ],
        );
        let url = reconstruct_url(&parts, &valid_config()).unwrap();
        assert_eq!(url.as_str(), "https://social.example.com/actors/alice?page=2");
    }

    #[test]
    fn url_uses_host_header_then_config() {
        let with_host = parts("/inbox", &[("host", "127.0.0.1:8080")]);
        assert_eq!(
            reconstruct_url(&with_host, &valid_config()).unwrap().as_str(),
            "http://127.0.0.1:8080/inbox"
        );

        let bare = parts("/inbox", &[]);
        assert_eq!(
            reconstruct_url(&bare, &valid_config()).unwrap().as_str(),
            "http://localhost/inbox"
        );
    }

    #[test]
    fn url_keeps_absolute_request_uri() {
        let absolute = parts("https://other.example/actors/bob", &[]);
        assert_eq!(
            reconstruct_url(&absolute, &valid_config()).unwrap().as_str(),
            "https://other.example/actors/bob"
        );
    }

    #[test]
    fn accept_negotiation() {
        let accept = |value: &str| {
            let mut headers = HeaderMap::new();
            headers.insert(header::ACCEPT, HeaderValue::from_str(value).unwrap());
            headers
        };

        assert!(accepts_activity_json(&HeaderMap::new(), false));
        assert!(accepts_activity_json(&accept("application/activity+json"), false));
        assert!(accepts_activity_json(
            &accept("application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\""),
            false
        ));
        assert!(accepts_activity_json(&accept("text/html, */*;q=0.1"), false));
        assert!(!accepts_activity_json(&accept("text/html"), false));
        assert!(!accepts_activity_json(&accept("application/json"), false));
        assert!(accepts_activity_json(&accept("application/json"), true));
    }

    #[test]
    fn page_param_parsing() {
        let url = Url::parse("https://example.com/x?page=3").unwrap();
        assert_eq!(page_param(&url).unwrap(), Some(3));
        let url = Url::parse("https://example.com/x").unwrap();
        assert_eq!(page_param(&url).unwrap(), None);
        let url = Url::parse("https://example.com/x?page=abc").unwrap();
        assert!(page_param(&url).is_err());
    }

    #[test]
    fn sink_overrides_status_and_headers() {
        let sink = ResponseSink::default();
        sink.set_status(StatusCode::OK);
        sink.insert_header(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));

        let mut response = StatusCode::ACCEPTED.into_response();
        sink.apply(&mut response);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "max-age=60");
        assert_eq!(sink.status(), Some(StatusCode::OK));
    }
}
