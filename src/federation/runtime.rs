//! Federation runtime
//!
//! Owns the route table for the federation paths. Each path template can be
//! bound once; a second bind returns a typed `BindError` instead of
//! shadowing the first. Dispatch resolves a request path against the table
//! and runs the bound dispatcher.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use super::activity::ActivityKind;
use super::objects::{NodeInfo, OrderedCollection, OrderedCollectionPage, Person};
use super::uri::UriBuilder;
use crate::bridge::RequestContext;
use crate::error::AppError;

// =============================================================================
// Dispatcher types
// =============================================================================

pub type DispatchFuture<T> = BoxFuture<'static, Result<T, AppError>>;

/// Answers `GET` on an actor path; `None` means no such actor
pub type ActorDispatcher =
    Arc<dyn Fn(RequestContext, String) -> DispatchFuture<Option<Person>> + Send + Sync>;

/// Returns the raw items of a collection; `None` means no such owner
pub type CollectionDispatcher = Arc<
    dyn Fn(RequestContext, String, Option<CollectionWindow>) -> DispatchFuture<Option<CollectionItems>>
        + Send
        + Sync,
>;

/// Handles one inbound activity type
pub type InboxListener = Arc<dyn Fn(RequestContext, Value) -> DispatchFuture<()> + Send + Sync>;

pub type NodeInfoDispatcher = Arc<dyn Fn(RequestContext) -> DispatchFuture<NodeInfo> + Send + Sync>;

pub fn actor_dispatcher<F, Fut>(f: F) -> ActorDispatcher
where
    F: Fn(RequestContext, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Person>, AppError>> + Send + 'static,
{
    Arc::new(move |ctx, handle| f(ctx, handle).boxed())
}

pub fn collection_dispatcher<F, Fut>(f: F) -> CollectionDispatcher
where
    F: Fn(RequestContext, String, Option<CollectionWindow>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<CollectionItems>, AppError>> + Send + 'static,
{
    Arc::new(move |ctx, handle, window| f(ctx, handle, window).boxed())
}

pub fn inbox_listener<F, Fut>(f: F) -> InboxListener
where
    F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    Arc::new(move |ctx, activity| f(ctx, activity).boxed())
}

pub fn nodeinfo_dispatcher<F, Fut>(f: F) -> NodeInfoDispatcher
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NodeInfo, AppError>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Slice of a collection requested by a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionWindow {
    pub offset: usize,
    pub limit: usize,
}

/// Items returned by a collection dispatcher
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionItems {
    pub items: Vec<Value>,
    pub total_items: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Outbox,
    Followers,
    Following,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbox => "outbox",
            Self::Followers => "followers",
            Self::Following => "following",
        }
    }

    fn collection_id(&self, uris: &UriBuilder, handle: &str) -> String {
        match self {
            Self::Outbox => uris.outbox_uri(handle),
            Self::Followers => uris.followers_uri(handle),
            Self::Following => uris.following_uri(handle),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failure to add a route or listener
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("route {path} is already bound")]
    DuplicateRoute { path: String },

    #[error("inbox listener for {kind} is already attached")]
    DuplicateListener { kind: ActivityKind },

    #[error("invalid path template {template}: {reason}")]
    InvalidTemplate { template: String, reason: String },
}

impl BindError {
    /// Whether this error means the route or listener already exists
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Self::DuplicateRoute { .. } | Self::DuplicateListener { .. }
        )
    }
}

// =============================================================================
// Path templates
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Parsed path template such as `/actors/{handle}/inbox`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self, BindError> {
        let invalid = |reason: &str| BindError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let rest = template
            .strip_prefix('/')
            .ok_or_else(|| invalid("must start with '/'"))?;

        let mut segments = Vec::new();
        let mut names = Vec::new();
        for segment in rest.split('/') {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if let Some(inner) = segment.strip_prefix('{') {
                let name = inner
                    .strip_suffix('}')
                    .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
                    .ok_or_else(|| invalid("malformed parameter"))?;
                if names.contains(&name) {
                    return Err(invalid("repeated parameter"));
                }
                names.push(name);
                segments.push(Segment::Param(name.to_string()));
            } else if segment.contains(['{', '}']) {
                return Err(invalid("braces outside a parameter"));
            } else {
                segments.push(Segment::Literal(segment.to_string()));
            }
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a request path, returning the captured parameters
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let rest = path.strip_prefix('/')?;
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }

    /// Two templates that would match the same paths
    fn overlaps(&self, other: &PathTemplate) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    _ => true,
                })
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// =============================================================================
// Route table
// =============================================================================

#[derive(Clone)]
enum Endpoint {
    Actor(ActorDispatcher),
    Inbox { shared: bool },
    Collection(CollectionKind, CollectionDispatcher),
    NodeInfo(NodeInfoDispatcher),
}

impl Endpoint {
    fn name(&self) -> &'static str {
        match self {
            Self::Actor(_) => "actor",
            Self::Inbox { shared: false } => "inbox",
            Self::Inbox { shared: true } => "shared_inbox",
            Self::Collection(kind, _) => kind.as_str(),
            Self::NodeInfo(_) => "nodeinfo",
        }
    }
}

struct Route {
    template: PathTemplate,
    endpoint: Endpoint,
}

#[derive(Default)]
struct RouteTable {
    routes: Vec<Route>,
    listeners: Vec<(ActivityKind, InboxListener)>,
}

/// A request path matched against the route table
#[derive(Clone)]
pub struct ResolvedRoute {
    endpoint: Endpoint,
    params: HashMap<String, String>,
}

impl ResolvedRoute {
    /// Metric label of the matched endpoint
    pub fn endpoint_name(&self) -> &'static str {
        self.endpoint.name()
    }

    pub fn is_inbox(&self) -> bool {
        matches!(self.endpoint, Endpoint::Inbox { .. })
    }

    pub fn is_nodeinfo(&self) -> bool {
        matches!(self.endpoint, Endpoint::NodeInfo(_))
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// What an inbox did with an activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxOutcome {
    /// A listener handled it
    Handled(ActivityKind),
    /// No listener for this type; accepted and dropped
    Ignored(ActivityKind),
}

/// Federation route runtime
#[derive(Default)]
pub struct Federation {
    table: RwLock<RouteTable>,
}

impl Federation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_actor_dispatcher(
        &self,
        template: &str,
        dispatcher: ActorDispatcher,
    ) -> Result<(), BindError> {
        self.bind(template, Endpoint::Actor(dispatcher))
    }

    /// Bind the personal and shared inbox paths
    ///
    /// Listeners are attached to the returned handle.
    pub fn set_inbox_listeners(
        &self,
        inbox_template: &str,
        shared_template: &str,
    ) -> Result<InboxListeners<'_>, BindError> {
        let inbox = PathTemplate::parse(inbox_template)?;
        let shared = PathTemplate::parse(shared_template)?;

        let mut table = self.write_table();
        Self::ensure_free(&table, &inbox)?;
        Self::ensure_free(&table, &shared)?;
        table.routes.push(Route {
            template: inbox,
            endpoint: Endpoint::Inbox { shared: false },
        });
        table.routes.push(Route {
            template: shared,
            endpoint: Endpoint::Inbox { shared: true },
        });
        drop(table);

        tracing::debug!(inbox_template, shared_template, "Bound inbox routes");
        Ok(InboxListeners { federation: self })
    }

    /// Handle for attaching listeners to the bound inboxes
    pub fn inbox_listeners(&self) -> InboxListeners<'_> {
        InboxListeners { federation: self }
    }

    pub fn set_collection_dispatcher(
        &self,
        kind: CollectionKind,
        template: &str,
        dispatcher: CollectionDispatcher,
    ) -> Result<(), BindError> {
        self.bind(template, Endpoint::Collection(kind, dispatcher))
    }

    pub fn set_nodeinfo_dispatcher(
        &self,
        template: &str,
        dispatcher: NodeInfoDispatcher,
    ) -> Result<(), BindError> {
        self.bind(template, Endpoint::NodeInfo(dispatcher))
    }

    /// Bound path templates, in binding order
    pub fn bound_paths(&self) -> Vec<String> {
        self.read_table()
            .routes
            .iter()
            .map(|route| route.template.as_str().to_string())
            .collect()
    }

    /// Activity types with an attached listener, in attachment order
    pub fn listener_kinds(&self) -> Vec<ActivityKind> {
        self.read_table()
            .listeners
            .iter()
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Find the route for a request path
    pub fn resolve(&self, path: &str) -> Option<ResolvedRoute> {
        let table = self.read_table();
        table.routes.iter().find_map(|route| {
            route.template.matches(path).map(|params| ResolvedRoute {
                endpoint: route.endpoint.clone(),
                params,
            })
        })
    }

    /// Answer a `GET` on a resolved route
    ///
    /// `page` selects an `OrderedCollectionPage` on collection routes; without
    /// it the collection summary is returned.
    ///
    /// # Returns
    /// `None` when the dispatcher found nothing to serve
    pub async fn dispatch_get(
        &self,
        route: &ResolvedRoute,
        ctx: RequestContext,
        page: Option<u32>,
    ) -> Result<Option<Value>, AppError> {
        match &route.endpoint {
            Endpoint::Actor(dispatcher) => {
                let Some(handle) = route.param("handle") else {
                    return Ok(None);
                };
                let person = dispatcher(ctx, handle.to_string()).await?;
                person.map(to_json).transpose()
            }
            Endpoint::Collection(kind, dispatcher) => {
                let Some(handle) = route.param("handle").map(str::to_string) else {
                    return Ok(None);
                };
                self.dispatch_collection(*kind, dispatcher, ctx, handle, page)
                    .await
            }
            Endpoint::NodeInfo(dispatcher) => {
                let info = dispatcher(ctx).await?;
                to_json(info).map(Some)
            }
            Endpoint::Inbox { .. } => Ok(None),
        }
    }

    async fn dispatch_collection(
        &self,
        kind: CollectionKind,
        dispatcher: &CollectionDispatcher,
        ctx: RequestContext,
        handle: String,
        page: Option<u32>,
    ) -> Result<Option<Value>, AppError> {
        let collection_id = kind.collection_id(ctx.uris(), &handle);
        let page_size = ctx.page_size();

        match page {
            None => {
                let Some(items) = dispatcher(ctx, handle, None).await? else {
                    return Ok(None);
                };
                to_json(OrderedCollection::new(collection_id, items.total_items)).map(Some)
            }
            Some(0) => Err(AppError::Validation("page must be at least 1".to_string())),
            Some(page) => {
                let window = CollectionWindow {
                    offset: (page as usize - 1) * page_size,
                    limit: page_size,
                };
                let Some(items) = dispatcher(ctx, handle, Some(window)).await? else {
                    return Ok(None);
                };
                let page = OrderedCollectionPage::new(
                    &collection_id,
                    page,
                    page_size,
                    items.total_items,
                    items.items,
                );
                to_json(page).map(Some)
            }
        }
    }

    /// Deliver an activity posted to a resolved inbox route
    ///
    /// A personal inbox first asks the actor dispatcher whether the owner
    /// exists and answers `NotFound` otherwise.
    pub async fn dispatch_inbox(
        &self,
        route: &ResolvedRoute,
        ctx: RequestContext,
        activity: Value,
    ) -> Result<InboxOutcome, AppError> {
        let Endpoint::Inbox { shared } = route.endpoint else {
            return Err(AppError::NotFound);
        };

        if !shared {
            let handle = route.param("handle").ok_or(AppError::NotFound)?;
            let actor = self.actor_dispatcher().ok_or(AppError::NotFound)?;
            if actor(ctx.clone(), handle.to_string()).await?.is_none() {
                return Err(AppError::NotFound);
            }
        }

        let kind = ActivityKind::of(&activity);
        let listener = self
            .read_table()
            .listeners
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, listener)| listener.clone());

        match listener {
            Some(listener) => {
                listener(ctx, activity).await?;
                Ok(InboxOutcome::Handled(kind))
            }
            None => Ok(InboxOutcome::Ignored(kind)),
        }
    }

    fn actor_dispatcher(&self) -> Option<ActorDispatcher> {
        self.read_table()
            .routes
            .iter()
            .find_map(|route| match &route.endpoint {
                Endpoint::Actor(dispatcher) => Some(dispatcher.clone()),
                _ => None,
            })
    }

    fn bind(&self, template: &str, endpoint: Endpoint) -> Result<(), BindError> {
        let template = PathTemplate::parse(template)?;
        let name = endpoint.name();

        let mut table = self.write_table();
        Self::ensure_free(&table, &template)?;
        tracing::debug!(endpoint = name, path = %template, "Bound federation route");
        table.routes.push(Route { template, endpoint });
        Ok(())
    }

    fn ensure_free(table: &RouteTable, template: &PathTemplate) -> Result<(), BindError> {
        match table
            .routes
            .iter()
            .find(|route| route.template.overlaps(template))
        {
            Some(existing) => Err(BindError::DuplicateRoute {
                path: existing.template.as_str().to_string(),
            }),
            None => Ok(()),
        }
    }

    fn attach_listener(&self, kind: ActivityKind, listener: InboxListener) -> Result<(), BindError> {
        let mut table = self.write_table();
        if table.listeners.iter().any(|(k, _)| *k == kind) {
            return Err(BindError::DuplicateListener { kind });
        }
        table.listeners.push((kind, listener));
        Ok(())
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, RouteTable> {
        self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, RouteTable> {
        self.table.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Attaches per-type listeners to the inbox routes
pub struct InboxListeners<'a> {
    federation: &'a Federation,
}

impl InboxListeners<'_> {
    /// Attach a listener for one activity type
    pub fn on(&self, kind: ActivityKind, listener: InboxListener) -> Result<&Self, BindError> {
        self.federation.attach_listener(kind, listener)?;
        tracing::debug!(activity_type = %kind, "Attached inbox listener");
        Ok(self)
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parsing() {
        let template = PathTemplate::parse("/actors/{handle}/inbox").unwrap();
        assert_eq!(template.as_str(), "/actors/{handle}/inbox");

        for bad in ["actors", "/actors//inbox", "/actors/{}", "/actors/{a/b}", "/a{b}", "/{x}/{x}"] {
            assert!(
                matches!(PathTemplate::parse(bad), Err(BindError::InvalidTemplate { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn template_matching_captures_params() {
        let template = PathTemplate::parse("/actors/{handle}/outbox").unwrap();
        let params = template.matches("/actors/alice/outbox").unwrap();
        assert_eq!(params.get("handle").map(String::as_str), Some("alice"));
        assert!(template.matches("/actors/alice/outbox/").is_some());
        assert!(template.matches("/actors/alice").is_none());
        assert!(template.matches("/actors//outbox").is_none());
        assert!(template.matches("/users/alice/outbox").is_none());
    }

    fn nodeinfo() -> NodeInfoDispatcher {
        nodeinfo_dispatcher(|_ctx| async { Err(AppError::NotFound) })
    }

    #[test]
    fn binding_same_path_twice_is_a_duplicate() {
        let federation = Federation::new();
        federation
            .set_nodeinfo_dispatcher("/nodeinfo/2.1", nodeinfo())
            .unwrap();

        let err = federation
            .set_nodeinfo_dispatcher("/nodeinfo/2.1", nodeinfo())
            .unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(federation.bound_paths(), vec!["/nodeinfo/2.1"]);
    }

    #[test]
    fn overlapping_templates_are_duplicates() {
        let federation = Federation::new();
        let actor = actor_dispatcher(|_ctx, _handle| async { Ok(None) });
        federation
            .set_actor_dispatcher("/actors/{handle}", actor.clone())
            .unwrap();

        let err = federation
            .set_actor_dispatcher("/actors/{name}", actor)
            .unwrap_err();
        assert_eq!(
            err,
            BindError::DuplicateRoute {
                path: "/actors/{handle}".to_string()
            }
        );
    }

    #[test]
    fn listeners_attach_once_per_kind_in_order() {
        let federation = Federation::new();
        let inbox = federation
            .set_inbox_listeners("/actors/{handle}/inbox", "/inbox")
            .unwrap();
        let noop = inbox_listener(|_ctx, _activity| async { Ok(()) });

        inbox
            .on(ActivityKind::Follow, noop.clone())
            .unwrap()
            .on(ActivityKind::Undo, noop.clone())
            .unwrap();
        let err = inbox.on(ActivityKind::Follow, noop).err().unwrap();

        assert!(matches!(err, BindError::DuplicateListener { kind: ActivityKind::Follow }));
        assert_eq!(
            federation.listener_kinds(),
            vec![ActivityKind::Follow, ActivityKind::Undo]
        );
    }

    #[test]
    fn resolve_distinguishes_inboxes() {
        let federation = Federation::new();
        federation
            .set_inbox_listeners("/actors/{handle}/inbox", "/inbox")
            .unwrap();

        let personal = federation.resolve("/actors/alice/inbox").unwrap();
        assert!(personal.is_inbox());
        assert_eq!(personal.endpoint_name(), "inbox");
        assert_eq!(personal.param("handle"), Some("alice"));

        let shared = federation.resolve("/inbox").unwrap();
        assert_eq!(shared.endpoint_name(), "shared_inbox");
        assert!(federation.resolve("/actors/alice").is_none());
    }
}
