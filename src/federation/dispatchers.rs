//! Dispatcher business logic
//!
//! The functions bound behind each federation route. They read and write
//! through the store carried by the request context and map records with
//! the object mapper.

use axum::http::{HeaderValue, Method, header};
use chrono::Utc;
use serde_json::{Value, json};

use super::activity::ActivityKind;
use super::mapper::{
    id_of, note_draft_from_create, remote_actor_from_person, to_create_activity, to_person_object,
};
use super::objects::{
    NodeInfo, NodeInfoServices, NodeInfoSoftware, NodeInfoUsage, NodeInfoUsers, Person,
};
use super::registry::HandlerSet;
use super::runtime::{CollectionItems, CollectionWindow};
use crate::bridge::RequestContext;
use crate::data::{ActorRepository, EntityId, FollowRepository, Follower, NoteRepository};
use crate::error::AppError;

/// Handlers answering reads: actor, collections and nodeinfo
pub fn read_handlers() -> HandlerSet {
    HandlerSet::new()
        .actor(dispatch_actor)
        .outbox(dispatch_outbox)
        .followers(dispatch_followers)
        .following(dispatch_following)
        .nodeinfo(dispatch_nodeinfo)
}

/// Inbox listeners, attached in this order
pub fn inbox_handlers() -> HandlerSet {
    HandlerSet::new()
        .on_inbox(ActivityKind::Follow, on_follow)
        .on_inbox(ActivityKind::Undo, on_undo)
        .on_inbox(ActivityKind::Create, on_create)
        .on_inbox(ActivityKind::Delete, on_delete)
}

pub async fn dispatch_actor(ctx: RequestContext, handle: String) -> Result<Option<Person>, AppError> {
    let Some(actor) = ctx.store().find_actor_by_handle(&handle).await? else {
        return Ok(None);
    };

    // Also called to vet personal inbox posts, which must not be cacheable
    if ctx.method() == Method::GET || ctx.method() == Method::HEAD {
        ctx.response().insert_header(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=180"),
        );
    }
    Ok(Some(to_person_object(ctx.uris(), &actor)))
}

pub async fn dispatch_outbox(
    ctx: RequestContext,
    handle: String,
    window: Option<CollectionWindow>,
) -> Result<Option<CollectionItems>, AppError> {
    let store = ctx.store();
    if store.find_actor_by_handle(&handle).await?.is_none() {
        return Ok(None);
    }

    let total_items = store.count_outbox_notes(&handle).await?;
    let items = match window {
        Some(window) => store
            .list_outbox_notes(&handle, window.limit, window.offset)
            .await?
            .iter()
            .map(|note| {
                serde_json::to_value(to_create_activity(ctx.uris(), note))
                    .map_err(|e| AppError::Internal(e.into()))
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    Ok(Some(CollectionItems { items, total_items }))
}

pub async fn dispatch_followers(
    ctx: RequestContext,
    handle: String,
    window: Option<CollectionWindow>,
) -> Result<Option<CollectionItems>, AppError> {
    let store = ctx.store();
    if store.find_actor_by_handle(&handle).await?.is_none() {
        return Ok(None);
    }

    let total_items = store.count_followers(&handle).await?;
    let items = match window {
        Some(window) => store
            .list_followers(&handle, window.limit, window.offset)
            .await?
            .into_iter()
            .map(Value::String)
            .collect(),
        None => Vec::new(),
    };

    Ok(Some(CollectionItems { items, total_items }))
}

pub async fn dispatch_following(
    ctx: RequestContext,
    handle: String,
    window: Option<CollectionWindow>,
) -> Result<Option<CollectionItems>, AppError> {
    let store = ctx.store();
    if store.find_actor_by_handle(&handle).await?.is_none() {
        return Ok(None);
    }

    let total_items = store.count_following(&handle).await?;
    let items = match window {
        Some(window) => store
            .list_following(&handle, window.limit, window.offset)
            .await?
            .into_iter()
            .map(Value::String)
            .collect(),
        None => Vec::new(),
    };

    Ok(Some(CollectionItems { items, total_items }))
}

pub async fn dispatch_nodeinfo(ctx: RequestContext) -> Result<NodeInfo, AppError> {
    let users = ctx.store().count_local_actors().await?;
    let local_posts = ctx.store().count_local_notes().await?;
    let instance = &ctx.config().instance;

    Ok(NodeInfo {
        version: "2.1".to_string(),
        software: NodeInfoSoftware {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        protocols: vec!["activitypub".to_string()],
        services: NodeInfoServices::default(),
        open_registrations: instance.open_registrations,
        usage: NodeInfoUsage {
            users: NodeInfoUsers { total: users },
            local_posts,
        },
        metadata: json!({
            "nodeName": instance.title,
            "nodeDescription": instance.description,
        }),
    })
}

// =============================================================================
// Inbox listeners
// =============================================================================

/// Record a follower of a local actor
///
/// Followers of actors that approve manually are stored as pending.
pub async fn on_follow(ctx: RequestContext, activity: Value) -> Result<(), AppError> {
    let follower_iri = id_of(activity.get("actor"), "actor")?;
    let target = id_of(activity.get("object"), "object")?;
    let handle = ctx
        .uris()
        .handle_from_actor_uri(&target)
        .ok_or_else(|| AppError::Validation("Follow target is not a local actor".to_string()))?;

    let actor = ctx
        .store()
        .find_actor_by_handle(&handle)
        .await?
        .ok_or(AppError::NotFound)?;

    let inbox_uri = match activity.get("actor") {
        Some(embedded @ Value::Object(_)) => Some(remote_actor_from_person(embedded)?.inbox),
        _ => None,
    };
    let approved = !actor.manually_approves_followers;

    ctx.store()
        .add_follower(&Follower {
            id: EntityId::new().0,
            actor_handle: actor.handle.clone(),
            follower_iri: follower_iri.clone(),
            inbox_uri,
            follow_uri: activity.get("id").and_then(Value::as_str).map(str::to_string),
            approved,
            created_at: Utc::now(),
        })
        .await?;

    tracing::info!(
        actor = %actor.handle,
        follower = %follower_iri,
        approved,
        "Recorded follower"
    );
    Ok(())
}

/// Undo a previous Follow by the same actor
pub async fn on_undo(ctx: RequestContext, activity: Value) -> Result<(), AppError> {
    let actor = id_of(activity.get("actor"), "actor")?;

    let Some(object) = activity.get("object").filter(|o| o.is_object()) else {
        tracing::debug!(actor = %actor, "Undo without embedded object ignored");
        return Ok(());
    };
    if ActivityKind::of(object) != ActivityKind::Follow {
        tracing::debug!(
            actor = %actor,
            undone = %ActivityKind::of(object),
            "Undo of unsupported activity ignored"
        );
        return Ok(());
    }

    let follower = id_of(object.get("actor"), "actor")?;
    if follower != actor {
        return Err(AppError::Forbidden);
    }

    let target = id_of(object.get("object"), "object")?;
    let Some(handle) = ctx.uris().handle_from_actor_uri(&target) else {
        return Ok(());
    };

    let removed = ctx.store().remove_follower(&handle, &actor).await?;
    tracing::info!(actor = %handle, follower = %actor, removed, "Removed follower");
    Ok(())
}

/// Store a remote note; a note already known by URI is left untouched
pub async fn on_create(ctx: RequestContext, activity: Value) -> Result<(), AppError> {
    let draft = note_draft_from_create(&activity)?;

    if ctx.store().find_note_by_uri(&draft.uri).await?.is_some() {
        tracing::debug!(uri = %draft.uri, "Note already stored");
        return Ok(());
    }

    let uri = draft.uri.clone();
    match ctx.store().insert_note(&draft.into_note()).await {
        Ok(()) => {
            tracing::info!(uri = %uri, "Stored remote note");
            Ok(())
        }
        Err(AppError::Database(sqlx::Error::Database(db))) if db.is_unique_violation() => {
            tracing::debug!(uri = %uri, "Note stored concurrently");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Delete a remote note written by the sending actor
pub async fn on_delete(ctx: RequestContext, activity: Value) -> Result<(), AppError> {
    let actor = id_of(activity.get("actor"), "actor")?;
    let object = id_of(activity.get("object"), "object")?;

    let deleted = ctx.store().delete_note_by_uri(&object, &actor).await?;
    if deleted {
        tracing::info!(uri = %object, actor = %actor, "Deleted remote note");
    } else {
        tracing::debug!(uri = %object, actor = %actor, "Nothing to delete");
    }
    Ok(())
}
