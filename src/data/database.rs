//! SQLite database operations
//!
//! The bundled persistence collaborator. Implements the repository traits
//! on top of a SQLx connection pool.

use async_trait::async_trait;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use super::repository::{ActorRepository, FollowRepository, NoteRepository};
use crate::error::AppError;

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to the SQLite file and run migrations
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    /// Record that a local actor follows a remote actor
    ///
    /// Outbound follows are created by the host application; this is the
    /// write side of the following collection.
    pub async fn insert_following(&self, following: &Following) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO following (id, actor_handle, target_iri, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&following.id)
        .bind(&following.actor_handle)
        .bind(&following.target_iri)
        .bind(following.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ActorRepository for Database {
    async fn find_actor_by_handle(&self, handle: &str) -> Result<Option<Actor>, AppError> {
        let actor = sqlx::query_as::<_, Actor>("SELECT * FROM actors WHERE handle = ?")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await?;

        Ok(actor)
    }

    async fn upsert_actor(&self, actor: &Actor) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO actors (
                id, handle, display_name, summary, manually_approves_followers,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(handle) DO UPDATE SET
                display_name = excluded.display_name,
                summary = excluded.summary,
                manually_approves_followers = excluded.manually_approves_followers,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&actor.id)
        .bind(&actor.handle)
        .bind(&actor.display_name)
        .bind(&actor.summary)
        .bind(actor.manually_approves_followers)
        .bind(actor.created_at)
        .bind(actor.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_local_actors(&self) -> Result<u64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM actors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl NoteRepository for Database {
    async fn find_note(&self, id: &str) -> Result<Option<Note>, AppError> {
        let row = sqlx::query_as::<_, NoteRow>("SELECT * FROM notes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Note::try_from).transpose()
    }

    async fn find_note_by_uri(&self, uri: &str) -> Result<Option<Note>, AppError> {
        let row = sqlx::query_as::<_, NoteRow>("SELECT * FROM notes WHERE uri = ?")
            .bind(uri)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Note::try_from).transpose()
    }

    async fn insert_note(&self, note: &Note) -> Result<(), AppError> {
        let mentions = serde_json::to_string(&note.mentions)
            .map_err(|e| AppError::Internal(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO notes (
                id, author, uri, source, content, media_type, visibility,
                mentions, share_of, published, is_local
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&note.id)
        .bind(&note.author)
        .bind(&note.uri)
        .bind(&note.source)
        .bind(&note.content)
        .bind(note.media_type.as_mime())
        .bind(note.visibility.as_str())
        .bind(mentions)
        .bind(&note.share_of)
        .bind(note.published)
        .bind(note.is_local)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_note_by_uri(&self, uri: &str, author: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM notes WHERE uri = ? AND author = ? AND is_local = 0")
            .bind(uri)
            .bind(author)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_outbox_notes(
        &self,
        author: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Note>, AppError> {
        let rows = sqlx::query_as::<_, NoteRow>(
            r#"
            SELECT * FROM notes
            WHERE author = ? AND is_local = 1 AND visibility IN ('public', 'unlisted')
            ORDER BY published DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(author)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Note::try_from).collect()
    }

    async fn count_outbox_notes(&self, author: &str) -> Result<u64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM notes
            WHERE author = ? AND is_local = 1 AND visibility IN ('public', 'unlisted')
            "#,
        )
        .bind(author)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn count_local_notes(&self) -> Result<u64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notes WHERE is_local = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl FollowRepository for Database {
    async fn add_follower(&self, follower: &Follower) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO followers (
                id, actor_handle, follower_iri, inbox_uri, follow_uri, approved, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(actor_handle, follower_iri) DO UPDATE SET
                inbox_uri = COALESCE(excluded.inbox_uri, followers.inbox_uri),
                follow_uri = excluded.follow_uri,
                approved = MAX(followers.approved, excluded.approved)
            "#,
        )
        .bind(&follower.id)
        .bind(&follower.actor_handle)
        .bind(&follower.follower_iri)
        .bind(&follower.inbox_uri)
        .bind(&follower.follow_uri)
        .bind(follower.approved)
        .bind(follower.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_follower(
        &self,
        actor_handle: &str,
        follower_iri: &str,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM followers WHERE actor_handle = ? AND follower_iri = ?")
                .bind(actor_handle)
                .bind(follower_iri)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_followers(
        &self,
        actor_handle: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, AppError> {
        let iris = sqlx::query_scalar::<_, String>(
            r#"
            SELECT follower_iri FROM followers
            WHERE actor_handle = ? AND approved = 1
            ORDER BY created_at ASC, id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(actor_handle)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(iris)
    }

    async fn count_followers(&self, actor_handle: &str) -> Result<u64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM followers WHERE actor_handle = ? AND approved = 1",
        )
        .bind(actor_handle)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn list_following(
        &self,
        actor_handle: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, AppError> {
        let iris = sqlx::query_scalar::<_, String>(
            r#"
            SELECT target_iri FROM following
            WHERE actor_handle = ?
            ORDER BY created_at ASC, id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(actor_handle)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(iris)
    }

    async fn count_following(&self, actor_handle: &str) -> Result<u64, AppError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM following WHERE actor_handle = ?")
                .bind(actor_handle)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }
}
