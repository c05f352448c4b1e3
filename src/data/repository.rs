//! Persistence collaborators
//!
//! The federation core only talks to storage through these traits. Any
//! backend works as long as it is safe to call concurrently.

use async_trait::async_trait;

use super::models::{Actor, Follower, Note};
use crate::error::AppError;

/// Lookup of local actors
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActorRepository: Send + Sync {
    /// Find a local actor by its unique handle
    async fn find_actor_by_handle(&self, handle: &str) -> Result<Option<Actor>, AppError>;

    /// Create or update a local actor, keyed by handle
    async fn upsert_actor(&self, actor: &Actor) -> Result<(), AppError>;

    async fn count_local_actors(&self) -> Result<u64, AppError>;
}

/// Storage of local and remote notes
#[async_trait]
pub trait NoteRepository: Send + Sync {
    async fn find_note(&self, id: &str) -> Result<Option<Note>, AppError>;

    async fn find_note_by_uri(&self, uri: &str) -> Result<Option<Note>, AppError>;

    async fn insert_note(&self, note: &Note) -> Result<(), AppError>;

    /// Delete a remote note by URI if `author` wrote it
    ///
    /// # Returns
    /// `true` when a note was removed
    async fn delete_note_by_uri(&self, uri: &str, author: &str) -> Result<bool, AppError>;

    /// Public and unlisted local notes of `author`, newest first
    async fn list_outbox_notes(
        &self,
        author: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Note>, AppError>;

    async fn count_outbox_notes(&self, author: &str) -> Result<u64, AppError>;

    async fn count_local_notes(&self) -> Result<u64, AppError>;
}

/// Follow relationships of local actors
#[async_trait]
pub trait FollowRepository: Send + Sync {
    /// Record a follower; re-following updates the existing record
    async fn add_follower(&self, follower: &Follower) -> Result<(), AppError>;

    /// # Returns
    /// `true` when a record was removed
    async fn remove_follower(&self, actor_handle: &str, follower_iri: &str)
    -> Result<bool, AppError>;

    /// Approved follower IRIs, oldest first
    async fn list_followers(
        &self,
        actor_handle: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, AppError>;

    async fn count_followers(&self, actor_handle: &str) -> Result<u64, AppError>;

    /// Followed actor IRIs, oldest first
    async fn list_following(
        &self,
        actor_handle: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, AppError>;

    async fn count_following(&self, actor_handle: &str) -> Result<u64, AppError>;
}

/// Everything a dispatcher may need from storage
pub trait Store: ActorRepository + NoteRepository + FollowRepository {}

impl<T> Store for T where T: ActorRepository + NoteRepository + FollowRepository {}
