//! ActivityPub federation module
//!
//! Handles:
//! - URI construction for actors, collections and objects
//! - Mapping between stored records and ActivityStreams objects
//! - The route runtime and the handler registry that binds to it
//! - Dispatchers and inbox listeners
//! - HTTP Signature header checks
//! - WebFinger

pub mod activity;
pub mod dispatchers;
pub mod mapper;
pub mod objects;
mod registry;
mod runtime;
mod signature;
pub mod uri;
mod webfinger;

pub use activity::ActivityKind;
pub use mapper::{
    MappingError, NoteDraft, RemoteActor, addressing, id_of, note_draft_from_create,
    remote_actor_from_person, to_create_activity, to_note_document,
    to_person_object,
};
pub use registry::{HandlerCategory, HandlerRegistry, HandlerSet, RegistryError, RegistryPhase};
pub use runtime::{
    ActorDispatcher, BindError, CollectionDispatcher, CollectionItems, CollectionKind,
    CollectionWindow, DispatchFuture, Federation, InboxListener, InboxListeners, InboxOutcome,
    NodeInfoDispatcher, PathTemplate, ResolvedRoute, actor_dispatcher, collection_dispatcher,
    inbox_listener, nodeinfo_dispatcher,
};
pub use signature::{
    ParsedSignature, extract_signature_key_id, key_id_matches_actor, parse_signature_header,
};
pub use uri::{ObjectKind, PUBLIC_COLLECTION, UriBuilder};
pub use webfinger::{JRD_JSON, WebFingerLink, WebFingerResolver, WebFingerResponse};
