//! Fedigate - ActivityPub federation adapter
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Well-known discovery, note objects, /metrics             │
//! │  - Fallback into the federation runtime (bridge)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - Route runtime + handler registry                         │
//! │  - Dispatchers, inbox listeners, object mapper              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - Repository traits                                        │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: well-known, note object and metrics routers
//! - `bridge`: request context and the axum entry point of the runtime
//! - `content`: HTML sanitization and markup rendering
//! - `federation`: ActivityPub protocol handling
//! - `service`: local publishing
//! - `data`: repository traits and the SQLite store
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod bridge;
pub mod config;
pub mod content;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

use std::sync::Arc;

use axum::http::request::Parts;

use data::ActorRepository;
use federation::dispatchers::{inbox_handlers, read_handlers};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// URI scheme of this instance
    pub uris: federation::UriBuilder,

    /// Route runtime serving the federation paths
    pub federation: Arc<federation::Federation>,

    /// Registry that binds dispatchers into `federation`
    pub registry: Arc<federation::HandlerRegistry>,

    /// WebFinger resolver
    pub resolver: federation::WebFingerResolver,

    /// Local publish path
    pub notes: Arc<service::NoteService>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Create or update the seed actor
    /// 3. Register the federation handlers
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = Arc::new(data::Database::connect(&config.database.path).await?);

        Self::ensure_admin_actor(db.as_ref(), &config).await?;

        let uris = federation::UriBuilder::from_config(&config);
        let federation = Arc::new(federation::Federation::new());
        let registry = Arc::new(federation::HandlerRegistry::new(federation.clone()));

        registry.register_handlers(read_handlers())?;
        registry.register_handlers(inbox_handlers())?;
        tracing::info!(phase = ?registry.phase(), "Federation handlers registered");

        let resolver = federation::WebFingerResolver::new(db.clone(), uris.clone());
        let notes = Arc::new(service::NoteService::new(db.clone(), uris.clone()));

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            uris,
            federation,
            registry,
            resolver,
            notes,
        })
    }

    /// Request context for one federation request
    pub fn request_context(&self, parts: &Parts) -> Result<bridge::RequestContext, error::AppError> {
        bridge::RequestContext::new(
            parts,
            self.db.clone(),
            self.config.clone(),
            self.uris.clone(),
        )
    }

    /// Ensure the seed actor exists with the current configuration
    async fn ensure_admin_actor(
        db: &data::Database,
        config: &config::AppConfig,
    ) -> Result<(), error::AppError> {
        let admin = &config.admin;
        let now = chrono::Utc::now();

        let actor = match db.find_actor_by_handle(&admin.username).await? {
            Some(existing) => data::Actor {
                display_name: Some(admin.display_name.clone()),
                summary: admin.note.clone(),
                manually_approves_followers: admin.manually_approves_followers,
                updated_at: now,
                ..existing
            },
            None => data::Actor {
                id: data::EntityId::new().0,
                handle: admin.username.clone(),
                display_name: Some(admin.display_name.clone()),
                summary: admin.note.clone(),
                manually_approves_followers: admin.manually_approves_followers,
                created_at: now,
                updated_at: now,
            },
        };

        db.upsert_actor(&actor).await?;
        tracing::info!(handle = %actor.handle, "Seed actor ready");

        Ok(())
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::objects_router())
        .fallback(bridge::federation_entry)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
