//! URI construction
//!
//! Every protocol URI is a pure function of an actor handle or object id
//! plus the configured origins, so nothing URI-shaped is ever stored for
//! local data.

use url::Url;

/// Path templates shared by the route bindings and the URI builder
pub mod paths {
    pub const ACTOR: &str = "/actors/{handle}";
    pub const INBOX: &str = "/actors/{handle}/inbox";
    pub const SHARED_INBOX: &str = "/inbox";
    pub const OUTBOX: &str = "/actors/{handle}/outbox";
    pub const FOLLOWERS: &str = "/actors/{handle}/followers";
    pub const FOLLOWING: &str = "/actors/{handle}/following";
    pub const NODEINFO: &str = "/nodeinfo/2.1";
    pub const NOTE: &str = "/notes/{id}";
}

/// ActivityStreams public collection
pub const PUBLIC_COLLECTION: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Object types with their own URI space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Note,
}

impl ObjectKind {
    fn template(&self) -> &'static str {
        match self {
            Self::Note => paths::NOTE,
        }
    }
}

/// Builds actor, collection and object URIs for this instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriBuilder {
    federation_domain: String,
    /// Origin of protocol IRIs, e.g. `https://social.example.com`
    base_url: String,
    /// Origin of human-facing pages
    web_origin: String,
}

impl UriBuilder {
    pub fn new(
        federation_domain: impl Into<String>,
        base_url: impl Into<String>,
        web_origin: impl Into<String>,
    ) -> Self {
        Self {
            federation_domain: federation_domain.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            web_origin: web_origin.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self::new(
            config.server.domain.clone(),
            config.server.base_url(),
            config.web_origin(),
        )
    }

    pub fn federation_domain(&self) -> &str {
        &self.federation_domain
    }

    /// Origin of protocol IRIs, without trailing slash
    pub fn origin(&self) -> &str {
        &self.base_url
    }

    pub fn actor_uri(&self, handle: &str) -> String {
        self.expand(paths::ACTOR, handle)
    }

    pub fn inbox_uri(&self, handle: &str) -> String {
        self.expand(paths::INBOX, handle)
    }

    pub fn shared_inbox_uri(&self) -> String {
        format!("{}{}", self.base_url, paths::SHARED_INBOX)
    }

    pub fn outbox_uri(&self, handle: &str) -> String {
        self.expand(paths::OUTBOX, handle)
    }

    pub fn followers_uri(&self, handle: &str) -> String {
        self.expand(paths::FOLLOWERS, handle)
    }

    pub fn following_uri(&self, handle: &str) -> String {
        self.expand(paths::FOLLOWING, handle)
    }

    pub fn nodeinfo_uri(&self) -> String {
        format!("{}{}", self.base_url, paths::NODEINFO)
    }

    /// URI of an object, keyed by its internal id
    pub fn object_uri(&self, kind: ObjectKind, id: &str) -> String {
        format!("{}{}", self.base_url, kind.template().replace("{id}", id))
    }

    /// Profile page: `<web origin>/@<handle>`
    pub fn profile_url(&self, handle: &str) -> String {
        format!("{}/@{}", self.web_origin, handle)
    }

    /// Note page: `<web origin>/@<handle>/<note id>`
    pub fn note_url(&self, handle: &str, note_id: &str) -> String {
        format!("{}/@{}/{}", self.web_origin, handle, note_id)
    }

    /// `<base>#create`, resolved the way a browser resolves a fragment link
    pub fn create_activity_id(&self, note_uri: Option<&str>) -> String {
        let base = note_uri.unwrap_or(&self.base_url);
        Url::parse(base)
            .and_then(|url| url.join("#create"))
            .map(String::from)
            .unwrap_or_else(|_| format!("{}#create", base.split('#').next().unwrap_or(base)))
    }

    /// Extract the handle from one of this instance's actor IRIs
    pub fn handle_from_actor_uri(&self, uri: &str) -> Option<String> {
        let prefix = format!("{}/actors/", self.base_url);
        let handle = uri.strip_prefix(&prefix)?.trim_end_matches('/');
        (!handle.is_empty() && !handle.contains('/')).then(|| handle.to_string())
    }

    fn expand(&self, template: &str, handle: &str) -> String {
        format!("{}{}", self.base_url, template.replace("{handle}", handle))
    }
}
