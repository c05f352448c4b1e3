//! WebFinger protocol implementation
//!
//! Maps `acct:user@domain` resources to local actor IRIs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::objects::ACTIVITY_JSON;
use super::uri::UriBuilder;
use crate::data::ActorRepository;
use crate::error::AppError;
use crate::metrics::WEBFINGER_LOOKUPS_TOTAL;

pub const PROFILE_PAGE_REL: &str = "http://webfinger.net/rel/profile-page";

/// Media type of WebFinger responses
pub const JRD_JSON: &str = "application/jrd+json";

/// WebFinger JRD response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub links: Vec<WebFingerLink>,
}

impl WebFingerResponse {
    /// The `rel=self` link target
    pub fn self_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == "self")
            .and_then(|link| link.href.as_deref())
    }
}

/// WebFinger link
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Split `acct:<local>@<domain>` into its parts
fn parse_acct(resource: &str) -> Option<(&str, &str)> {
    let (local, domain) = resource.strip_prefix("acct:")?.split_once('@')?;
    (!local.is_empty() && !domain.is_empty()).then_some((local, domain))
}

/// Resolves WebFinger resources against local actors
#[derive(Clone)]
pub struct WebFingerResolver {
    actors: Arc<dyn ActorRepository>,
    uris: UriBuilder,
}

impl WebFingerResolver {
    pub fn new(actors: Arc<dyn ActorRepository>, uris: UriBuilder) -> Self {
        Self { actors, uris }
    }

    /// Resolve a resource to a discovery document
    ///
    /// Malformed resources, foreign domains and unknown actors all yield
    /// `Ok(None)`. Only a failing actor lookup is an error.
    pub async fn resolve(&self, resource: &str) -> Result<Option<WebFingerResponse>, AppError> {
        let Some((local, domain)) = parse_acct(resource) else {
            tracing::debug!(resource, "Malformed WebFinger resource");
            WEBFINGER_LOOKUPS_TOTAL.with_label_values(&["malformed"]).inc();
            return Ok(None);
        };

        if domain != self.uris.federation_domain() {
            tracing::debug!(resource, "WebFinger lookup for foreign domain");
            WEBFINGER_LOOKUPS_TOTAL
                .with_label_values(&["foreign_domain"])
                .inc();
            return Ok(None);
        }

        let Some(actor) = self.actors.find_actor_by_handle(local).await? else {
            WEBFINGER_LOOKUPS_TOTAL.with_label_values(&["not_found"]).inc();
            return Ok(None);
        };

        WEBFINGER_LOOKUPS_TOTAL.with_label_values(&["found"]).inc();
        Ok(Some(self.response_for(resource, &actor.handle)))
    }

    fn response_for(&self, resource: &str, handle: &str) -> WebFingerResponse {
        let actor_uri = self.uris.actor_uri(handle);

        WebFingerResponse {
            subject: resource.to_string(),
            aliases: vec![actor_uri.clone()],
            links: vec![
                WebFingerLink {
                    rel: "self".to_string(),
                    link_type: Some(ACTIVITY_JSON.to_string()),
                    href: Some(actor_uri.clone()),
                    template: None,
                },
                WebFingerLink {
                    rel: PROFILE_PAGE_REL.to_string(),
                    link_type: Some("text/html".to_string()),
                    href: Some(actor_uri),
                    template: None,
                },
            ],
        }
    }
}
