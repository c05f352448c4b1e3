//! Common test utilities for E2E tests

#![allow(dead_code)]

use fedigate::{AppState, config};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Handle of the seed actor
pub const ADMIN: &str = "testuser";

/// A remote actor used as the sender of inbound activities
pub const REMOTE_ACTOR: &str = "https://remote.example.com/users/alice";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the default test configuration
    pub async fn with_config(adjust: impl FnOnce(&mut config::AppConfig)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let mut config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                domain: "test.example.com".to_string(),
                protocol: "https".to_string(),
            },
            federation: config::FederationConfig {
                page_size: 2,
                ..Default::default()
            },
            database: config::DatabaseConfig { path: db_path },
            instance: config::InstanceConfig {
                title: "Test Instance".to_string(),
                description: "Test Fedigate Instance".to_string(),
                contact_email: "test@example.com".to_string(),
                open_registrations: false,
            },
            admin: config::AdminConfig {
                username: ADMIN.to_string(),
                display_name: "Test User".to_string(),
                note: Some("Test *account*".to_string()),
                manually_approves_followers: false,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };
        adjust(&mut config);

        let state = AppState::new(config).await.unwrap();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = fedigate::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Actor IRI of a local handle, as published in documents
    pub fn actor_iri(&self, handle: &str) -> String {
        self.state.uris.actor_uri(handle)
    }

    /// GET an ActivityStreams document
    pub async fn get_activity_json(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("Accept", "application/activity+json")
            .send()
            .await
            .unwrap()
    }

    /// POST an activity with a Signature header whose key belongs to `actor`
    pub async fn post_signed(&self, path: &str, actor: &str, activity: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("Content-Type", "application/activity+json")
            .header("Signature", signature_header(&format!("{}#main-key", actor)))
            .json(activity)
            .send()
            .await
            .unwrap()
    }
}

/// Signature header with the given key id and a dummy signature value
pub fn signature_header(key_id: &str) -> String {
    format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"(request-target) host date\",signature=\"Zm9v\"",
        key_id
    )
}
