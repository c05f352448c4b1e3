//! Handler registry
//!
//! Accumulates dispatcher handlers across any number of `register_handlers`
//! calls and binds each category to the runtime at most once. Bound routes
//! call through to whatever handler is current at dispatch time, so a later
//! registration can add or replace handlers without touching the routes.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;

use super::activity::ActivityKind;
use super::objects::{NodeInfo, Person};
use super::runtime::{
    self, ActorDispatcher, BindError, CollectionDispatcher, CollectionItems, CollectionKind,
    CollectionWindow, Federation, InboxListener, NodeInfoDispatcher,
};
use super::uri::paths;
use crate::bridge::RequestContext;
use crate::error::AppError;
use crate::metrics::ROUTE_BINDINGS_TOTAL;

/// Dispatcher categories, in the order they are bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerCategory {
    Actor,
    Inbox,
    Outbox,
    Followers,
    Following,
    NodeInfo,
}

impl HandlerCategory {
    pub const BIND_ORDER: [HandlerCategory; 6] = [
        Self::Actor,
        Self::Inbox,
        Self::Outbox,
        Self::Followers,
        Self::Following,
        Self::NodeInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Actor => "actor",
            Self::Inbox => "inbox",
            Self::Outbox => "outbox",
            Self::Followers => "followers",
            Self::Following => "following",
            Self::NodeInfo => "nodeinfo",
        }
    }
}

impl fmt::Display for HandlerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binding of one category failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to bind {category} dispatcher: {source}")]
pub struct RegistryError {
    pub category: HandlerCategory,
    #[source]
    pub source: BindError,
}

/// Registration progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryPhase {
    /// Nothing registered yet
    Uninitialized,
    /// Some categories are bound, others still wait for a handler
    HandlersAccumulating,
    /// Every category is bound
    Bound,
}

/// A partial set of handlers
///
/// Entries merge by key: a later set replaces a category's handler, and
/// inbox listeners replace or append by activity type.
#[derive(Clone, Default)]
pub struct HandlerSet {
    actor: Option<ActorDispatcher>,
    inbox: Vec<(ActivityKind, InboxListener)>,
    outbox: Option<CollectionDispatcher>,
    followers: Option<CollectionDispatcher>,
    following: Option<CollectionDispatcher>,
    nodeinfo: Option<NodeInfoDispatcher>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actor<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RequestContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Person>, AppError>> + Send + 'static,
    {
        self.actor = Some(runtime::actor_dispatcher(f));
        self
    }

    pub fn on_inbox<F, Fut>(mut self, kind: ActivityKind, f: F) -> Self
    where
        F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        upsert_listener(&mut self.inbox, kind, runtime::inbox_listener(f));
        self
    }

    pub fn outbox<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RequestContext, String, Option<CollectionWindow>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<CollectionItems>, AppError>> + Send + 'static,
    {
        self.collection(CollectionKind::Outbox, runtime::collection_dispatcher(f))
    }

    pub fn followers<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RequestContext, String, Option<CollectionWindow>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<CollectionItems>, AppError>> + Send + 'static,
    {
        self.collection(CollectionKind::Followers, runtime::collection_dispatcher(f))
    }

    pub fn following<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RequestContext, String, Option<CollectionWindow>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<CollectionItems>, AppError>> + Send + 'static,
    {
        self.collection(CollectionKind::Following, runtime::collection_dispatcher(f))
    }

    pub fn nodeinfo<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NodeInfo, AppError>> + Send + 'static,
    {
        self.nodeinfo = Some(runtime::nodeinfo_dispatcher(f));
        self
    }

    fn collection(mut self, kind: CollectionKind, dispatcher: CollectionDispatcher) -> Self {
        *self.collection_slot(kind) = Some(dispatcher);
        self
    }

    fn collection_slot(&mut self, kind: CollectionKind) -> &mut Option<CollectionDispatcher> {
        match kind {
            CollectionKind::Outbox => &mut self.outbox,
            CollectionKind::Followers => &mut self.followers,
            CollectionKind::Following => &mut self.following,
        }
    }

    fn collection_handler(&self, kind: CollectionKind) -> Option<CollectionDispatcher> {
        match kind {
            CollectionKind::Outbox => self.outbox.clone(),
            CollectionKind::Followers => self.followers.clone(),
            CollectionKind::Following => self.following.clone(),
        }
    }

    fn has(&self, category: HandlerCategory) -> bool {
        match category {
            HandlerCategory::Actor => self.actor.is_some(),
            HandlerCategory::Inbox => !self.inbox.is_empty(),
            HandlerCategory::Outbox => self.outbox.is_some(),
            HandlerCategory::Followers => self.followers.is_some(),
            HandlerCategory::Following => self.following.is_some(),
            HandlerCategory::NodeInfo => self.nodeinfo.is_some(),
        }
    }

    fn merge(&mut self, other: HandlerSet) {
        if other.actor.is_some() {
            self.actor = other.actor;
        }
        for (kind, listener) in other.inbox {
            upsert_listener(&mut self.inbox, kind, listener);
        }
        if other.outbox.is_some() {
            self.outbox = other.outbox;
        }
        if other.followers.is_some() {
            self.followers = other.followers;
        }
        if other.following.is_some() {
            self.following = other.following;
        }
        if other.nodeinfo.is_some() {
            self.nodeinfo = other.nodeinfo;
        }
    }
}

fn upsert_listener(
    listeners: &mut Vec<(ActivityKind, InboxListener)>,
    kind: ActivityKind,
    listener: InboxListener,
) {
    match listeners.iter_mut().find(|(k, _)| *k == kind) {
        Some(entry) => entry.1 = listener,
        None => listeners.push((kind, listener)),
    }
}

#[derive(Default)]
struct BindState {
    touched: bool,
    bound: HashSet<HandlerCategory>,
    attached: HashSet<ActivityKind>,
}

/// Owns the accumulated handlers and the one-time bindings
pub struct HandlerRegistry {
    federation: Arc<Federation>,
    handlers: Arc<RwLock<HandlerSet>>,
    state: Mutex<BindState>,
}

impl HandlerRegistry {
    pub fn new(federation: Arc<Federation>) -> Self {
        Self {
            federation,
            handlers: Arc::new(RwLock::new(HandlerSet::default())),
            state: Mutex::new(BindState::default()),
        }
    }

    pub fn federation(&self) -> &Arc<Federation> {
        &self.federation
    }

    pub fn phase(&self) -> RegistryPhase {
        let state = self.lock_state();
        if !state.touched {
            RegistryPhase::Uninitialized
        } else if state.bound.len() == HandlerCategory::BIND_ORDER.len() {
            RegistryPhase::Bound
        } else {
            RegistryPhase::HandlersAccumulating
        }
    }

    pub fn is_bound(&self, category: HandlerCategory) -> bool {
        self.lock_state().bound.contains(&category)
    }

    /// Merge `partial` into the accumulated handlers and bind what is new
    ///
    /// Categories are bound in [`HandlerCategory::BIND_ORDER`], each at most
    /// once. A duplicate route on nodeinfo counts as already bound; any other
    /// binding failure is returned.
    pub fn register_handlers(&self, partial: HandlerSet) -> Result<(), RegistryError> {
        let mut state = self.lock_state();
        state.touched = true;

        {
            let mut handlers = self
                .handlers
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            handlers.merge(partial);
        }

        for category in HandlerCategory::BIND_ORDER {
            if !state.bound.contains(&category) && self.current().has(category) {
                match self.bind(category) {
                    Ok(()) => {
                        tracing::info!(category = %category, "Bound federation dispatcher");
                        ROUTE_BINDINGS_TOTAL
                            .with_label_values(&[category.as_str(), "bound"])
                            .inc();
                    }
                    Err(err) if category == HandlerCategory::NodeInfo && err.is_duplicate() => {
                        tracing::warn!(
                            category = %category,
                            error = %err,
                            "Dispatcher already bound elsewhere, keeping existing route"
                        );
                        ROUTE_BINDINGS_TOTAL
                            .with_label_values(&[category.as_str(), "duplicate"])
                            .inc();
                    }
                    Err(source) => {
                        ROUTE_BINDINGS_TOTAL
                            .with_label_values(&[category.as_str(), "failed"])
                            .inc();
                        return Err(RegistryError { category, source });
                    }
                }
                state.bound.insert(category);
            }

            if category == HandlerCategory::Inbox && state.bound.contains(&category) {
                self.attach_listeners(&mut state)
                    .map_err(|source| RegistryError { category, source })?;
            }
        }

        Ok(())
    }

    fn attach_listeners(&self, state: &mut BindState) -> Result<(), BindError> {
        let kinds: Vec<ActivityKind> = self.current().inbox.iter().map(|(k, _)| *k).collect();
        let listeners = self.federation.inbox_listeners();

        for kind in kinds {
            if state.attached.contains(&kind) {
                continue;
            }
            listeners.on(kind, self.listener_trampoline(kind))?;
            state.attached.insert(kind);
        }
        Ok(())
    }

    fn bind(&self, category: HandlerCategory) -> Result<(), BindError> {
        match category {
            HandlerCategory::Actor => self
                .federation
                .set_actor_dispatcher(paths::ACTOR, self.actor_trampoline()),
            HandlerCategory::Inbox => self
                .federation
                .set_inbox_listeners(paths::INBOX, paths::SHARED_INBOX)
                .map(|_| ()),
            HandlerCategory::Outbox => self.bind_collection(CollectionKind::Outbox, paths::OUTBOX),
            HandlerCategory::Followers => {
                self.bind_collection(CollectionKind::Followers, paths::FOLLOWERS)
            }
            HandlerCategory::Following => {
                self.bind_collection(CollectionKind::Following, paths::FOLLOWING)
            }
            HandlerCategory::NodeInfo => self
                .federation
                .set_nodeinfo_dispatcher(paths::NODEINFO, self.nodeinfo_trampoline()),
        }
    }

    fn bind_collection(&self, kind: CollectionKind, path: &str) -> Result<(), BindError> {
        self.federation
            .set_collection_dispatcher(kind, path, self.collection_trampoline(kind))
    }

    fn current(&self) -> HandlerSet {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BindState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn actor_trampoline(&self) -> ActorDispatcher {
        let handlers = self.handlers.clone();
        Arc::new(move |ctx, handle| {
            let current = read(&handlers).actor.clone();
            async move {
                match current {
                    Some(dispatch) => dispatch(ctx, handle).await,
                    None => Ok(None),
                }
            }
            .boxed()
        })
    }

    fn collection_trampoline(&self, kind: CollectionKind) -> CollectionDispatcher {
        let handlers = self.handlers.clone();
        Arc::new(move |ctx, handle, window| {
            let current = read(&handlers).collection_handler(kind);
            async move {
                match current {
                    Some(dispatch) => dispatch(ctx, handle, window).await,
                    None => Ok(None),
                }
            }
            .boxed()
        })
    }

    fn listener_trampoline(&self, kind: ActivityKind) -> InboxListener {
        let handlers = self.handlers.clone();
        Arc::new(move |ctx, activity| {
            let current = read(&handlers)
                .inbox
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, listener)| listener.clone());
            async move {
                match current {
                    Some(listener) => listener(ctx, activity).await,
                    None => Ok(()),
                }
            }
            .boxed()
        })
    }

    fn nodeinfo_trampoline(&self) -> NodeInfoDispatcher {
        let handlers = self.handlers.clone();
        Arc::new(move |ctx| {
            let current = read(&handlers).nodeinfo.clone();
            async move {
                match current {
                    Some(dispatch) => dispatch(ctx).await,
                    None => Err(AppError::NotFound),
                }
            }
            .boxed()
        })
    }
}

fn read(handlers: &RwLock<HandlerSet>) -> std::sync::RwLockReadGuard<'_, HandlerSet> {
    handlers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor_only() -> HandlerSet {
        HandlerSet::new().actor(|_ctx, _handle| async { Ok(None) })
    }

    fn collections_and_inbox() -> HandlerSet {
        HandlerSet::new()
            .on_inbox(ActivityKind::Follow, |_ctx, _activity| async { Ok(()) })
            .outbox(|_ctx, _handle, _window| async { Ok(None) })
            .followers(|_ctx, _handle, _window| async { Ok(None) })
            .following(|_ctx, _handle, _window| async { Ok(None) })
    }

    fn nodeinfo_only() -> HandlerSet {
        HandlerSet::new().nodeinfo(|_ctx| async { Err::<NodeInfo, _>(AppError::NotFound) })
    }

    #[test]
    fn phases_progress_as_categories_bind() {
        let registry = HandlerRegistry::new(Arc::new(Federation::new()));
        assert_eq!(registry.phase(), RegistryPhase::Uninitialized);

        registry.register_handlers(actor_only()).unwrap();
        assert_eq!(registry.phase(), RegistryPhase::HandlersAccumulating);
        assert!(registry.is_bound(HandlerCategory::Actor));
        assert!(!registry.is_bound(HandlerCategory::Outbox));

        registry.register_handlers(collections_and_inbox()).unwrap();
        registry.register_handlers(nodeinfo_only()).unwrap();
        assert_eq!(registry.phase(), RegistryPhase::Bound);
    }

    #[test]
    fn disjoint_registrations_bind_each_route_once() {
        let federation = Arc::new(Federation::new());
        let registry = HandlerRegistry::new(federation.clone());

        registry
            .register_handlers(actor_only().nodeinfo(|_ctx| async {
                Err::<NodeInfo, _>(AppError::NotFound)
            }))
            .unwrap();
        registry.register_handlers(collections_and_inbox()).unwrap();
        registry.register_handlers(actor_only()).unwrap();

        assert_eq!(
            federation.bound_paths(),
            vec![
                paths::ACTOR,
                paths::NODEINFO,
                paths::INBOX,
                paths::SHARED_INBOX,
                paths::OUTBOX,
                paths::FOLLOWERS,
                paths::FOLLOWING,
            ]
        );
    }

    #[test]
    fn bind_order_is_fixed_within_one_registration() {
        let federation = Arc::new(Federation::new());
        let registry = HandlerRegistry::new(federation.clone());

        registry.register_handlers(nodeinfo_only()).unwrap();
        let everything = HandlerSet::new()
            .following(|_ctx, _handle, _window| async { Ok(None) })
            .actor(|_ctx, _handle| async { Ok(None) })
            .on_inbox(ActivityKind::Create, |_ctx, _activity| async { Ok(()) });
        registry.register_handlers(everything).unwrap();

        assert_eq!(
            federation.bound_paths(),
            vec![
                paths::NODEINFO,
                paths::ACTOR,
                paths::INBOX,
                paths::SHARED_INBOX,
                paths::FOLLOWING,
            ]
        );
    }

    #[test]
    fn inbox_kinds_are_attached_as_they_arrive() {
        let federation = Arc::new(Federation::new());
        let registry = HandlerRegistry::new(federation.clone());

        registry.register_handlers(collections_and_inbox()).unwrap();
        registry
            .register_handlers(
                HandlerSet::new()
                    .on_inbox(ActivityKind::Undo, |_ctx, _activity| async { Ok(()) })
                    .on_inbox(ActivityKind::Follow, |_ctx, _activity| async { Ok(()) }),
            )
            .unwrap();

        assert_eq!(
            federation.listener_kinds(),
            vec![ActivityKind::Follow, ActivityKind::Undo]
        );
    }

    #[test]
    fn nodeinfo_bound_elsewhere_is_suppressed() {
        let federation = Arc::new(Federation::new());
        federation
            .set_nodeinfo_dispatcher(
                paths::NODEINFO,
                runtime::nodeinfo_dispatcher(|_ctx| async { Err(AppError::NotFound) }),
            )
            .unwrap();
        let registry = HandlerRegistry::new(federation.clone());

        registry.register_handlers(nodeinfo_only()).unwrap();
        assert!(registry.is_bound(HandlerCategory::NodeInfo));
        assert_eq!(federation.bound_paths(), vec![paths::NODEINFO]);
    }

    #[test]
    fn actor_bound_elsewhere_propagates() {
        let federation = Arc::new(Federation::new());
        federation
            .set_actor_dispatcher(
                paths::ACTOR,
                runtime::actor_dispatcher(|_ctx, _handle| async { Ok(None) }),
            )
            .unwrap();
        let registry = HandlerRegistry::new(federation);

        let err = registry.register_handlers(actor_only()).unwrap_err();
        assert_eq!(err.category, HandlerCategory::Actor);
        assert!(err.source.is_duplicate());
        assert!(!registry.is_bound(HandlerCategory::Actor));
    }
}
