//! Data models
//!
//! Rust structs representing persisted actors, notes and relationships.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Actor
// =============================================================================

/// A local identity hosted by this instance
///
/// Protocol URIs (actor IRI, inbox, outbox, ...) are never stored; they are
/// derived from `handle` and the configured origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Actor {
    pub id: String,
    /// Unique local handle (preferred username)
    pub handle: String,
    pub display_name: Option<String>,
    /// Bio source in lightweight markup
    pub summary: Option<String>,
    pub manually_approves_followers: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Note
// =============================================================================

/// Audience of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Unlisted,
    Followers,
    Direct,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Followers => "followers",
            Self::Direct => "direct",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "unlisted" => Some(Self::Unlisted),
            "followers" | "private" => Some(Self::Followers),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

/// Format of a note's source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    PlainText,
    Markdown,
    /// Already-HTML content received from a remote peer
    Html,
}

impl MediaType {
    pub fn as_mime(&self) -> &'static str {
        match self {
            Self::PlainText => "text/plain",
            Self::Markdown => "text/markdown",
            Self::Html => "text/html",
        }
    }

    pub fn from_mime(value: &str) -> Option<Self> {
        match value {
            "text/plain" => Some(Self::PlainText),
            "text/markdown" => Some(Self::Markdown),
            "text/html" => Some(Self::Html),
            _ => None,
        }
    }
}

/// A post owned by exactly one actor
///
/// Local notes get their object URI at creation and never change afterwards.
/// Remote notes keep the URI and author IRI they arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    /// Local actor handle, or the author IRI for remote notes
    pub author: String,
    pub uri: Option<String>,
    pub source: String,
    /// Rendered and sanitized HTML
    pub content: String,
    pub media_type: MediaType,
    pub visibility: Visibility,
    /// Actor IRIs addressed explicitly
    pub mentions: Vec<String>,
    /// Note this one shares; several notes may share the same origin
    pub share_of: Option<String>,
    /// Wall-clock publish time, UTC
    pub published: NaiveDateTime,
    pub is_local: bool,
}

/// Storage shape of a note
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct NoteRow {
    pub id: String,
    pub author: String,
    pub uri: Option<String>,
    pub source: String,
    pub content: String,
    pub media_type: String,
    pub visibility: String,
    pub mentions: String,
    pub share_of: Option<String>,
    pub published: NaiveDateTime,
    pub is_local: bool,
}

impl TryFrom<NoteRow> for Note {
    type Error = AppError;

    fn try_from(row: NoteRow) -> Result<Self, Self::Error> {
        let media_type = MediaType::from_mime(&row.media_type).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "note {} has unknown media type {}",
                row.id,
                row.media_type
            ))
        })?;
        let visibility = Visibility::parse(&row.visibility).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "note {} has unknown visibility {}",
                row.id,
                row.visibility
            ))
        })?;
        let mentions: Vec<String> = serde_json::from_str(&row.mentions)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("note {} mentions: {}", row.id, e)))?;

        Ok(Self {
            id: row.id,
            author: row.author,
            uri: row.uri,
            source: row.source,
            content: row.content,
            media_type,
            visibility,
            mentions,
            share_of: row.share_of,
            published: row.published,
            is_local: row.is_local,
        })
    }
}

// =============================================================================
// Relationships
// =============================================================================

/// A remote actor following a local actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Follower {
    pub id: String,
    /// Followed local actor
    pub actor_handle: String,
    /// Follower actor IRI
    pub follower_iri: String,
    /// Follower inbox, when the Follow embedded the actor document
    pub inbox_uri: Option<String>,
    /// Follow activity IRI
    pub follow_uri: Option<String>,
    /// false while waiting for manual approval
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

/// A remote actor followed by a local actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Following {
    pub id: String,
    pub actor_handle: String,
    pub target_iri: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_round_trips_through_storage_names() {
        for visibility in [
            Visibility::Public,
            Visibility::Unlisted,
            Visibility::Followers,
            Visibility::Direct,
        ] {
            assert_eq!(Visibility::parse(visibility.as_str()), Some(visibility));
        }
        assert_eq!(Visibility::parse("private"), Some(Visibility::Followers));
        assert_eq!(Visibility::parse("limited"), None);
    }

    #[test]
    fn note_row_rejects_unknown_visibility() {
        let row = NoteRow {
            id: "n1".to_string(),
            author: "alice".to_string(),
            uri: None,
            source: "hi".to_string(),
            content: "<p>hi</p>".to_string(),
            media_type: "text/plain".to_string(),
            visibility: "secret".to_string(),
            mentions: "[]".to_string(),
            share_of: None,
            published: Utc::now().naive_utc(),
            is_local: true,
        };

        assert!(Note::try_from(row).is_err());
    }
}
