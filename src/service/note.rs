//! Note service
//!
//! Local publish path: renders the source, assigns the note's id and object
//! URI once, and stores it. Notes are never edited afterwards.

use std::sync::Arc;

use chrono::Utc;

use crate::content;
use crate::data::{ActorRepository, EntityId, MediaType, Note, NoteRepository, Store, Visibility};
use crate::error::AppError;
use crate::federation::objects::CreateActivity;
use crate::federation::{ObjectKind, UriBuilder, to_create_activity};

/// Input of [`NoteService::publish`]
#[derive(Debug, Clone)]
pub struct NewNote {
    pub source: String,
    pub media_type: MediaType,
    pub visibility: Visibility,
    /// Actor IRIs addressed explicitly
    pub mentions: Vec<String>,
    /// Id of a shared note
    pub share_of: Option<String>,
}

impl NewNote {
    pub fn plain(source: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            source: source.into(),
            media_type: MediaType::PlainText,
            visibility,
            mentions: Vec::new(),
            share_of: None,
        }
    }
}

/// Note service
pub struct NoteService {
    store: Arc<dyn Store>,
    uris: UriBuilder,
}

impl NoteService {
    pub fn new(store: Arc<dyn Store>, uris: UriBuilder) -> Self {
        Self { store, uris }
    }

    /// Publish a note as a local actor
    ///
    /// # Errors
    /// - `NotFound` if the author or the shared note does not exist
    /// - `Validation` for empty content, remote-only media types or
    ///   malformed mention IRIs
    pub async fn publish(&self, author: &str, new: NewNote) -> Result<Note, AppError> {
        let actor = self
            .store
            .find_actor_by_handle(author)
            .await?
            .ok_or(AppError::NotFound)?;

        if new.media_type == MediaType::Html {
            return Err(AppError::Validation(
                "local notes are written as plain text or markdown".to_string(),
            ));
        }
        if new.source.trim().is_empty() && new.share_of.is_none() {
            return Err(AppError::Validation("note content is required".to_string()));
        }
        for mention in &new.mentions {
            match url::Url::parse(mention) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                _ => {
                    return Err(AppError::Validation(format!(
                        "mention is not an actor IRI: {}",
                        mention
                    )));
                }
            }
        }
        if let Some(shared) = &new.share_of {
            self.store
                .find_note(shared)
                .await?
                .ok_or(AppError::NotFound)?;
        }

        let id = EntityId::new().0;
        let note = Note {
            uri: Some(self.uris.object_uri(ObjectKind::Note, &id)),
            id,
            author: actor.handle,
            content: content::render_source(&new.source, new.media_type),
            source: new.source,
            media_type: new.media_type,
            visibility: new.visibility,
            mentions: new.mentions,
            share_of: new.share_of,
            published: Utc::now().naive_utc(),
            is_local: true,
        };

        self.store.insert_note(&note).await?;
        tracing::info!(
            note_id = %note.id,
            author = %note.author,
            visibility = note.visibility.as_str(),
            "Published note"
        );

        Ok(note)
    }

    /// Create activity announcing a stored note
    pub fn create_activity(&self, note: &Note) -> CreateActivity {
        to_create_activity(&self.uris, note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Actor, Database};
    use tempfile::TempDir;

    async fn setup() -> (NoteService, Arc<Database>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(Database::connect(&temp_dir.path().join("test.db")).await.unwrap());
        db.upsert_actor(&Actor {
            id: EntityId::new().0,
            handle: "alice".to_string(),
            display_name: None,
            summary: None,
            manually_approves_followers: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

        let uris = UriBuilder::new("example.com", "https://example.com", "https://example.com");
        (NoteService::new(db.clone(), uris), db, temp_dir)
    }

    #[tokio::test]
    async fn publish_renders_and_assigns_uri() {
        let (service, db, _temp_dir) = setup().await;

        let note = service
            .publish(
                "alice",
                NewNote {
                    media_type: MediaType::Markdown,
                    ..NewNote::plain("hello *there*", Visibility::Public)
                },
            )
            .await
            .unwrap();

        assert_eq!(note.content, "<p>hello <em>there</em></p>");
        assert_eq!(
            note.uri.as_deref(),
            Some(format!("https://example.com/notes/{}", note.id).as_str())
        );
        assert_eq!(db.find_note(&note.id).await.unwrap().unwrap(), note);

        let create = service.create_activity(&note);
        assert_eq!(create.id, format!("https://example.com/notes/{}#create", note.id));
    }

    #[tokio::test]
    async fn plain_text_is_escaped() {
        let (service, _db, _temp_dir) = setup().await;
        let note = service
            .publish("alice", NewNote::plain("<b>hi</b>\nthere", Visibility::Unlisted))
            .await
            .unwrap();
        assert_eq!(note.content, "<p>&lt;b&gt;hi&lt;/b&gt;<br>there</p>");
    }

    #[tokio::test]
    async fn shares_may_point_at_the_same_note() {
        let (service, db, _temp_dir) = setup().await;
        let origin = service
            .publish("alice", NewNote::plain("origin", Visibility::Public))
            .await
            .unwrap();

        for _ in 0..2 {
            service
                .publish(
                    "alice",
                    NewNote {
                        share_of: Some(origin.id.clone()),
                        ..NewNote::plain("", Visibility::Public)
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(db.count_local_notes().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn publish_rejects_bad_input() {
        let (service, _db, _temp_dir) = setup().await;

        assert!(matches!(
            service
                .publish("bob", NewNote::plain("hi", Visibility::Public))
                .await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            service
                .publish("alice", NewNote::plain("  ", Visibility::Public))
                .await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service
                .publish(
                    "alice",
                    NewNote {
                        mentions: vec!["bob@remote.example".to_string()],
                        ..NewNote::plain("hi", Visibility::Direct)
                    }
                )
                .await,
            Err(AppError::Validation(_))
        ));
    }
}
