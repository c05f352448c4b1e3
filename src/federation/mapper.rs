//! Object mapper
//!
//! Converts between stored actors/notes and ActivityStreams objects.
//! Outbound mapping is pure: the same input always yields the same object.
//! Inbound parsing is strict because remote payloads are untrusted.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use super::objects::{
    ACTIVITY_STREAMS_CONTEXT, CreateActivity, Endpoints, NoteDocument, NoteObject, Person,
};
use super::uri::{ObjectKind, PUBLIC_COLLECTION, UriBuilder};
use crate::content;
use crate::data::{Actor, EntityId, MediaType, Note, Visibility};
use crate::error::AppError;

/// Rejection of an inbound object
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("object attributed to {attributed_to} but sent by {actor}")]
    AttributionMismatch { actor: String, attributed_to: String },

    #[error("unsupported object: {0}")]
    UnsupportedObject(String),
}

impl From<MappingError> for AppError {
    fn from(err: MappingError) -> Self {
        AppError::Validation(err.to_string())
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Person document for a local actor
pub fn to_person_object(uris: &UriBuilder, actor: &Actor) -> Person {
    let summary = actor
        .summary
        .as_deref()
        .map(content::render)
        .filter(|html| !html.is_empty());

    Person {
        context: Value::String(ACTIVITY_STREAMS_CONTEXT.to_string()),
        kind: "Person".to_string(),
        id: uris.actor_uri(&actor.handle),
        name: actor.display_name.clone(),
        preferred_username: actor.handle.clone(),
        url: uris.profile_url(&actor.handle),
        summary,
        inbox: uris.inbox_uri(&actor.handle),
        outbox: uris.outbox_uri(&actor.handle),
        followers: uris.followers_uri(&actor.handle),
        following: uris.following_uri(&actor.handle),
        endpoints: Endpoints {
            shared_inbox: uris.shared_inbox_uri(),
        },
        manually_approves_followers: actor.manually_approves_followers,
    }
}

/// Create activity wrapping a note
///
/// The activity id is the note URI with a `#create` fragment; a note that
/// has no URI yet falls back to the instance origin.
pub fn to_create_activity(uris: &UriBuilder, note: &Note) -> CreateActivity {
    let (attributed_to, url, followers) = if note.is_local {
        (
            uris.actor_uri(&note.author),
            uris.note_url(&note.author, &note.id),
            Some(uris.followers_uri(&note.author)),
        )
    } else {
        let url = note
            .uri
            .clone()
            .unwrap_or_else(|| uris.object_uri(ObjectKind::Note, &note.id));
        (note.author.clone(), url, None)
    };

    let object_id = match (&note.uri, note.is_local) {
        (Some(uri), false) => uri.clone(),
        _ => uris.object_uri(ObjectKind::Note, &note.id),
    };

    let (to, cc) = addressing(note.visibility, followers.as_deref(), &note.mentions);
    let published = note.published.and_utc();

    CreateActivity {
        context: Value::String(ACTIVITY_STREAMS_CONTEXT.to_string()),
        kind: "Create".to_string(),
        id: uris.create_activity_id(note.uri.as_deref()),
        actor: attributed_to.clone(),
        published,
        to: to.clone(),
        cc: cc.clone(),
        object: NoteObject {
            kind: "Note".to_string(),
            id: object_id,
            attributed_to,
            url,
            published,
            to,
            cc,
            content: note.content.clone(),
            media_type: "text/html".to_string(),
        },
    }
}

/// Standalone document for a note, the object of its Create activity
pub fn to_note_document(uris: &UriBuilder, note: &Note) -> NoteDocument {
    NoteDocument {
        context: Value::String(ACTIVITY_STREAMS_CONTEXT.to_string()),
        object: to_create_activity(uris, note).object,
    }
}

/// Recipient lists for a visibility level
///
/// - public: public collection in `to`, followers and mentions in `cc`
/// - unlisted: followers in `to`, public collection and mentions in `cc`
/// - followers: followers in `to`, mentions in `cc`
/// - direct: mentions in `to` only
pub fn addressing(
    visibility: Visibility,
    followers: Option<&str>,
    mentions: &[String],
) -> (Vec<String>, Vec<String>) {
    let followers: Vec<String> = followers.map(str::to_string).into_iter().collect();
    let public = vec![PUBLIC_COLLECTION.to_string()];

    match visibility {
        Visibility::Public => (public, concat(followers, mentions)),
        Visibility::Unlisted => (followers, concat(public, mentions)),
        Visibility::Followers => (followers, mentions.to_vec()),
        Visibility::Direct => (mentions.to_vec(), Vec::new()),
    }
}

fn concat(mut head: Vec<String>, tail: &[String]) -> Vec<String> {
    for item in tail {
        if !head.contains(item) {
            head.push(item.clone());
        }
    }
    head
}

// =============================================================================
// Inbound
// =============================================================================

/// Remote note accepted from a Create activity, not yet stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteDraft {
    pub uri: String,
    /// Author actor IRI
    pub author: String,
    /// Sanitized HTML
    pub content: String,
    pub published: NaiveDateTime,
    pub visibility: Visibility,
    pub mentions: Vec<String>,
}

impl NoteDraft {
    pub fn into_note(self) -> Note {
        Note {
            id: EntityId::new().0,
            author: self.author,
            uri: Some(self.uri),
            source: self.content.clone(),
            content: self.content,
            media_type: MediaType::Html,
            visibility: self.visibility,
            mentions: self.mentions,
            share_of: None,
            published: self.published,
            is_local: false,
        }
    }
}

/// Remote actor reference taken from an embedded actor document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteActor {
    pub id: String,
    pub inbox: String,
    pub shared_inbox: Option<String>,
    pub preferred_username: Option<String>,
}

/// Strictly parse a `Create` activity carrying an embedded `Note`
///
/// # Errors
/// Missing `id`, `attributedTo` or `content`, non-http ids, and notes
/// attributed to someone other than the sending actor are all rejected.
pub fn note_draft_from_create(activity: &Value) -> Result<NoteDraft, MappingError> {
    let actor = id_of(activity.get("actor"), "actor")?;

    let object = match activity.get("object") {
        None | Some(Value::Null) => return Err(MappingError::MissingField("object")),
        Some(Value::Object(_)) => &activity["object"],
        Some(_) => {
            return Err(MappingError::UnsupportedObject(
                "object must be embedded".to_string(),
            ));
        }
    };

    match object.get("type").and_then(Value::as_str) {
        Some("Note") => {}
        Some(other) => return Err(MappingError::UnsupportedObject(other.to_string())),
        None => return Err(MappingError::MissingField("type")),
    }

    let uri = id_of(object.get("id"), "id")?;
    let attributed_to = id_of(object.get("attributedTo"), "attributedTo")?;
    if attributed_to != actor {
        return Err(MappingError::AttributionMismatch {
            actor,
            attributed_to,
        });
    }
    if !same_host(&uri, &actor) {
        return Err(MappingError::InvalidField {
            field: "id",
            reason: format!("{} is not on the origin of {}", uri, actor),
        });
    }

    let raw_content = match object.get("content") {
        Some(Value::String(content)) => content,
        Some(Value::Null) | None => return Err(MappingError::MissingField("content")),
        Some(_) => {
            return Err(MappingError::InvalidField {
                field: "content",
                reason: "expected a string".to_string(),
            });
        }
    };

    let published = match object.get("published").and_then(Value::as_str) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|e| MappingError::InvalidField {
                field: "published",
                reason: e.to_string(),
            })?
            .naive_utc(),
        None => Utc::now().naive_utc(),
    };

    let to = string_list(object.get("to"));
    let cc = string_list(object.get("cc"));
    let visibility = visibility_of(&to, &cc);
    let mentions = to
        .iter()
        .chain(cc.iter())
        .filter(|iri| !is_collection(iri))
        .fold(Vec::new(), |mut acc, iri| {
            if !acc.contains(iri) {
                acc.push(iri.clone());
            }
            acc
        });

    Ok(NoteDraft {
        uri,
        author: actor,
        content: content::sanitize(raw_content),
        published,
        visibility,
        mentions,
    })
}

/// Parse an embedded actor document
pub fn remote_actor_from_person(value: &Value) -> Result<RemoteActor, MappingError> {
    if !value.is_object() {
        return Err(MappingError::UnsupportedObject(
            "actor must be embedded".to_string(),
        ));
    }

    let id = id_of(value.get("id"), "id")?;
    let inbox = id_of(value.get("inbox"), "inbox")?;
    let shared_inbox = value
        .get("endpoints")
        .and_then(|e| e.get("sharedInbox"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let preferred_username = value
        .get("preferredUsername")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(RemoteActor {
        id,
        inbox,
        shared_inbox,
        preferred_username,
    })
}

/// IRI of a field that may be a bare string or an object with `id`
pub fn id_of(value: Option<&Value>, field: &'static str) -> Result<String, MappingError> {
    let raw = match value {
        None | Some(Value::Null) => return Err(MappingError::MissingField(field)),
        Some(Value::String(s)) => s.as_str(),
        Some(Value::Object(map)) => match map.get("id") {
            Some(Value::String(s)) => s.as_str(),
            _ => return Err(MappingError::MissingField(field)),
        },
        Some(_) => {
            return Err(MappingError::InvalidField {
                field,
                reason: "expected an IRI".to_string(),
            });
        }
    };

    match url::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(raw.to_string()),
        _ => Err(MappingError::InvalidField {
            field,
            reason: format!("not an http(s) IRI: {}", raw),
        }),
    }
}

/// Both IRIs name the same host and port
fn same_host(a: &str, b: &str) -> bool {
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => false,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn is_public(iri: &str) -> bool {
    iri == PUBLIC_COLLECTION || iri == "as:Public" || iri == "Public"
}

fn is_collection(iri: &str) -> bool {
    is_public(iri) || iri.ends_with("/followers")
}

fn visibility_of(to: &[String], cc: &[String]) -> Visibility {
    if to.iter().any(|iri| is_public(iri)) {
        Visibility::Public
    } else if cc.iter().any(|iri| is_public(iri)) {
        Visibility::Unlisted
    } else if to.iter().chain(cc.iter()).any(|iri| iri.ends_with("/followers")) {
        Visibility::Followers
    } else {
        Visibility::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn uris() -> UriBuilder {
        UriBuilder::new(
            "social.example.com",
            "https://social.example.com",
            "https://www.example.com",
        )
    }

    fn actor() -> Actor {
        Actor {
            id: "01ACTOR".to_string(),
            handle: "alice".to_string(),
            display_name: Some("Alice".to_string()),
            summary: Some("Hello *world*".to_string()),
            manually_approves_followers: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn note(visibility: Visibility) -> Note {
        Note {
            id: "01NOTE".to_string(),
            author: "alice".to_string(),
            uri: Some("https://social.example.com/notes/01NOTE".to_string()),
            source: "hi".to_string(),
            content: "<p>hi</p>".to_string(),
            media_type: MediaType::PlainText,
            visibility,
            mentions: vec!["https://remote.example/users/bob".to_string()],
            share_of: None,
            published: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap(),
            is_local: true,
        }
    }

    #[test]
    fn person_uris_are_derived() {
        let person = to_person_object(&uris(), &actor());
        assert_eq!(person.id, "https://social.example.com/actors/alice");
        assert_eq!(person.url, "https://www.example.com/@alice");
        assert_eq!(person.followers, "https://social.example.com/actors/alice/followers");
        assert_eq!(person.endpoints.shared_inbox, "https://social.example.com/inbox");
        assert_eq!(person.summary.as_deref(), Some("<p>Hello <em>world</em></p>"));
        assert!(person.manually_approves_followers);
    }

    #[test]
    fn mapping_is_byte_identical_across_calls() {
        let uris = uris();
        let actor = actor();
        let note = note(Visibility::Public);

        assert_eq!(
            serde_json::to_string(&to_person_object(&uris, &actor)).unwrap(),
            serde_json::to_string(&to_person_object(&uris, &actor)).unwrap()
        );
        assert_eq!(
            serde_json::to_string(&to_create_activity(&uris, &note)).unwrap(),
            serde_json::to_string(&to_create_activity(&uris, &note)).unwrap()
        );
    }

    #[test]
    fn create_activity_ids() {
        let create = to_create_activity(&uris(), &note(Visibility::Public));
        assert!(create.id.ends_with("#create"));
        assert_ne!(create.id, create.object.id);
        assert_eq!(create.object.id, "https://social.example.com/notes/01NOTE");
        assert_eq!(create.object.url, "https://www.example.com/@alice/01NOTE");
        assert_eq!(create.object.attributed_to, "https://social.example.com/actors/alice");
        assert_eq!(create.published.to_rfc3339(), "2024-05-01T12:30:00+00:00");
    }

    #[test]
    fn create_activity_without_uri_falls_back_to_origin() {
        let mut note = note(Visibility::Public);
        note.uri = None;
        let create = to_create_activity(&uris(), &note);
        assert_eq!(create.id, "https://social.example.com/#create");
        assert_eq!(create.object.id, "https://social.example.com/notes/01NOTE");
    }

    #[test]
    fn note_document_matches_create_object() {
        let uris = uris();
        let note = note(Visibility::Unlisted);
        let document = serde_json::to_value(to_note_document(&uris, &note)).unwrap();

        assert_eq!(document["@context"], ACTIVITY_STREAMS_CONTEXT);
        assert_eq!(document["type"], "Note");
        assert_eq!(document["id"], "https://social.example.com/notes/01NOTE");
        assert_eq!(document["cc"][0], PUBLIC_COLLECTION);
        assert_eq!(
            document["attributedTo"],
            "https://social.example.com/actors/alice"
        );
    }

    #[test]
    fn addressing_follows_visibility() {
        let followers = "https://social.example.com/actors/alice/followers";
        let bob = "https://remote.example/users/bob".to_string();
        let mentions = vec![bob.clone()];

        let (to, cc) = addressing(Visibility::Public, Some(followers), &mentions);
        assert_eq!(to, vec![PUBLIC_COLLECTION.to_string()]);
        assert_eq!(cc, vec![followers.to_string(), bob.clone()]);

        let (to, cc) = addressing(Visibility::Unlisted, Some(followers), &mentions);
        assert_eq!(to, vec![followers.to_string()]);
        assert_eq!(cc, vec![PUBLIC_COLLECTION.to_string(), bob.clone()]);

        let (to, cc) = addressing(Visibility::Followers, Some(followers), &mentions);
        assert_eq!(to, vec![followers.to_string()]);
        assert!(!cc.contains(&PUBLIC_COLLECTION.to_string()));

        let (to, cc) = addressing(Visibility::Direct, Some(followers), &mentions);
        assert_eq!(to, vec![bob]);
        assert!(cc.is_empty());
    }

    fn inbound_create() -> Value {
        json!({
            "type": "Create",
            "actor": "https://remote.example/users/bob",
            "object": {
                "type": "Note",
                "id": "https://remote.example/notes/1",
                "attributedTo": "https://remote.example/users/bob",
                "content": "<p>hi</p><script>x()</script>",
                "published": "2024-05-01T10:00:00Z",
                "to": ["https://www.w3.org/ns/activitystreams#Public"],
                "cc": ["https://remote.example/users/bob/followers"]
            }
        })
    }

    #[test]
    fn inbound_note_is_parsed_and_sanitized() {
        let draft = note_draft_from_create(&inbound_create()).unwrap();
        assert_eq!(draft.uri, "https://remote.example/notes/1");
        assert_eq!(draft.author, "https://remote.example/users/bob");
        assert_eq!(draft.content, "<p>hi</p>");
        assert_eq!(draft.visibility, Visibility::Public);
        assert!(draft.mentions.is_empty());

        let note = draft.into_note();
        assert!(!note.is_local);
        assert_eq!(note.media_type, MediaType::Html);
    }

    #[test]
    fn inbound_note_missing_fields_is_rejected() {
        for field in ["id", "attributedTo", "content"] {
            let mut activity = inbound_create();
            activity["object"].as_object_mut().unwrap().remove(field);
            assert_eq!(
                note_draft_from_create(&activity),
                Err(MappingError::MissingField(match field {
                    "id" => "id",
                    "attributedTo" => "attributedTo",
                    _ => "content",
                }))
            );
        }
    }

    #[test]
    fn inbound_note_from_other_author_is_rejected() {
        let mut activity = inbound_create();
        activity["object"]["attributedTo"] = json!("https://remote.example/users/eve");
        assert!(matches!(
            note_draft_from_create(&activity),
            Err(MappingError::AttributionMismatch { .. })
        ));
    }

    #[test]
    fn inbound_note_on_foreign_origin_is_rejected() {
        let mut activity = inbound_create();
        activity["actor"] = json!("https://evil.example/users/mallory");
        activity["object"]["attributedTo"] = json!("https://evil.example/users/mallory");
        activity["object"]["id"] = json!("https://victim.example/notes/42");
        assert!(matches!(
            note_draft_from_create(&activity),
            Err(MappingError::InvalidField { field: "id", .. })
        ));

        activity["object"]["id"] = json!("http://localhost/notes/01HZX");
        assert!(matches!(
            note_draft_from_create(&activity),
            Err(MappingError::InvalidField { field: "id", .. })
        ));

        activity["object"]["id"] = json!("https://evil.example:8443/notes/42");
        assert!(matches!(
            note_draft_from_create(&activity),
            Err(MappingError::InvalidField { field: "id", .. })
        ));
    }

    #[test]
    fn inbound_unsupported_object_is_rejected() {
        let mut activity = inbound_create();
        activity["object"]["type"] = json!("Question");
        assert_eq!(
            note_draft_from_create(&activity),
            Err(MappingError::UnsupportedObject("Question".to_string()))
        );

        activity["object"] = json!("https://remote.example/notes/1");
        assert!(matches!(
            note_draft_from_create(&activity),
            Err(MappingError::UnsupportedObject(_))
        ));
    }

    #[test]
    fn inbound_visibility_is_derived_from_addressing() {
        let mut activity = inbound_create();
        activity["object"]["to"] = json!(["https://social.example.com/actors/alice"]);
        activity["object"]["cc"] = json!([]);
        let draft = note_draft_from_create(&activity).unwrap();
        assert_eq!(draft.visibility, Visibility::Direct);
        assert_eq!(draft.mentions, vec!["https://social.example.com/actors/alice"]);
    }

    #[test]
    fn remote_actor_requires_inbox() {
        let actor = json!({
            "id": "https://remote.example/users/bob",
            "inbox": "https://remote.example/users/bob/inbox",
            "endpoints": { "sharedInbox": "https://remote.example/inbox" }
        });
        let parsed = remote_actor_from_person(&actor).unwrap();
        assert_eq!(parsed.shared_inbox.as_deref(), Some("https://remote.example/inbox"));

        let missing = json!({ "id": "https://remote.example/users/bob" });
        assert_eq!(
            remote_actor_from_person(&missing),
            Err(MappingError::MissingField("inbox"))
        );
    }
}
