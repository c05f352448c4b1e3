//! ActivityStreams wire objects
//!
//! Typed structs so that serialization order is fixed and two mappings of
//! the same input produce byte-identical JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ACTIVITY_STREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Media type of ActivityStreams documents
pub const ACTIVITY_JSON: &str = "application/activity+json";

pub const NODEINFO_PROFILE: &str = "http://nodeinfo.diaspora.software/ns/schema/2.1";

/// Media type of NodeInfo 2.1 documents
pub const NODEINFO_JSON: &str =
    "application/json; profile=\"http://nodeinfo.diaspora.software/ns/schema/2.1#\"";

fn default_context() -> Value {
    Value::String(ACTIVITY_STREAMS_CONTEXT.to_string())
}

/// Actor document for a local identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(rename = "@context", default = "default_context")]
    pub context: Value,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub preferred_username: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub inbox: String,
    pub outbox: String,
    pub followers: String,
    pub following: String,
    pub endpoints: Endpoints,
    pub manually_approves_followers: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    pub shared_inbox: String,
}

/// Note as embedded in activities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributed_to: String,
    pub url: String,
    pub published: DateTime<Utc>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub content: String,
    pub media_type: String,
}

/// Note served on its own at the note IRI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteDocument {
    #[serde(rename = "@context")]
    pub context: Value,
    #[serde(flatten)]
    pub object: NoteObject,
}

/// Create activity wrapping a note; derived on demand, never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActivity {
    #[serde(rename = "@context", default = "default_context")]
    pub context: Value,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub actor: String,
    pub published: DateTime<Utc>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub object: NoteObject,
}

/// Collection root: item count plus a link to the first page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollection {
    #[serde(rename = "@context", default = "default_context")]
    pub context: Value,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub total_items: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
}

impl OrderedCollection {
    pub fn new(id: impl Into<String>, total_items: u64) -> Self {
        let id = id.into();
        Self {
            context: default_context(),
            kind: "OrderedCollection".to_string(),
            first: Some(page_uri(&id, 1)),
            id,
            total_items,
        }
    }
}

/// One page of an ordered collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollectionPage {
    #[serde(rename = "@context", default = "default_context")]
    pub context: Value,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub part_of: String,
    pub total_items: u64,
    pub ordered_items: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl OrderedCollectionPage {
    /// Build page `page` (1-based) of the collection at `collection_id`
    pub fn new(
        collection_id: &str,
        page: u32,
        page_size: usize,
        total_items: u64,
        ordered_items: Vec<Value>,
    ) -> Self {
        let shown = u64::from(page.saturating_sub(1)) * page_size as u64
            + ordered_items.len() as u64;
        Self {
            context: default_context(),
            kind: "OrderedCollectionPage".to_string(),
            id: page_uri(collection_id, page),
            part_of: collection_id.to_string(),
            total_items,
            ordered_items,
            prev: (page > 1).then(|| page_uri(collection_id, page - 1)),
            next: (shown < total_items).then(|| page_uri(collection_id, page + 1)),
        }
    }
}

fn page_uri(collection_id: &str, page: u32) -> String {
    format!("{}?page={}", collection_id, page)
}

/// NodeInfo 2.1 document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub version: String,
    pub software: NodeInfoSoftware,
    pub protocols: Vec<String>,
    pub services: NodeInfoServices,
    pub open_registrations: bool,
    pub usage: NodeInfoUsage,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfoSoftware {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfoServices {
    pub inbound: Vec<String>,
    pub outbound: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoUsage {
    pub users: NodeInfoUsers,
    pub local_posts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfoUsers {
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_links_first_page() {
        let collection = OrderedCollection::new("https://example.com/actors/a/outbox", 3);
        let value = serde_json::to_value(&collection).unwrap();
        assert_eq!(value["type"], "OrderedCollection");
        assert_eq!(value["totalItems"], 3);
        assert_eq!(value["first"], "https://example.com/actors/a/outbox?page=1");
        assert!(value.get("orderedItems").is_none());
    }

    #[test]
    fn page_links_neighbours() {
        let id = "https://example.com/actors/a/followers";
        let items = vec![json!("https://x.example/u/1"), json!("https://x.example/u/2")];

        let first = OrderedCollectionPage::new(id, 1, 2, 5, items.clone());
        assert_eq!(first.prev, None);
        assert_eq!(first.next.as_deref(), Some("https://example.com/actors/a/followers?page=2"));

        let last = OrderedCollectionPage::new(id, 3, 2, 5, vec![json!("https://x.example/u/5")]);
        assert_eq!(last.prev.as_deref(), Some("https://example.com/actors/a/followers?page=2"));
        assert_eq!(last.next, None);
        assert_eq!(last.part_of, id);
    }

    #[test]
    fn nodeinfo_uses_camel_case() {
        let info = NodeInfo {
            version: "2.1".to_string(),
            software: NodeInfoSoftware {
                name: "fedigate".to_string(),
                version: "0.1.0".to_string(),
            },
            protocols: vec!["activitypub".to_string()],
            services: NodeInfoServices::default(),
            open_registrations: false,
            usage: NodeInfoUsage {
                users: NodeInfoUsers { total: 1 },
                local_posts: 4,
            },
            metadata: json!({}),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["openRegistrations"], false);
        assert_eq!(value["usage"]["localPosts"], 4);
    }
}
