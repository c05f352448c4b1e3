//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub federation: FederationConfig,
    pub database: DatabaseConfig,
    pub instance: InstanceConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Federation domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Federation settings
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Canonical web origin for profile and note pages.
    ///
    /// Falls back to `server.base_url()` when unset.
    pub web_origin: Option<String>,
    /// Items per ordered-collection page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Maximum accepted inbox payload size
    #[serde(default = "default_max_inbox_body_bytes")]
    pub max_inbox_body_bytes: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            web_origin: None,
            page_size: default_page_size(),
            max_inbox_body_bytes: default_max_inbox_body_bytes(),
        }
    }
}

fn default_page_size() -> usize {
    20
}

fn default_max_inbox_body_bytes() -> usize {
    1024 * 1024
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Instance metadata published through NodeInfo
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    pub title: String,
    pub description: String,
    pub contact_email: String,
    #[serde(default)]
    pub open_registrations: bool,
}

/// Seed actor created on startup
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Actor handle (default: "admin")
    #[serde(default = "default_admin_username")]
    pub username: String,
    /// Display name (default: "Admin")
    #[serde(default = "default_admin_display_name")]
    pub display_name: String,
    /// Bio, written in lightweight markup
    pub note: Option<String>,
    #[serde(default)]
    pub manually_approves_followers: bool,
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_display_name() -> String {
    "Admin".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDIGATE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/fedigate.db")?
            .set_default("federation.page_size", 20)?
            .set_default("federation.max_inbox_body_bytes", 1024 * 1024)?
            .set_default("instance.open_registrations", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FEDIGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Canonical web origin for human-facing URLs, without a trailing slash
    pub fn web_origin(&self) -> String {
        self.federation
            .web_origin
            .as_deref()
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(|origin| origin.trim_end_matches('/').to_string())
            .unwrap_or_else(|| self.server.base_url())
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        if self.server.domain.trim().is_empty() {
            return Err(AppError::Config("server.domain must not be empty".to_string()));
        }

        let protocol = self.server.protocol.to_ascii_lowercase();
        if protocol != "http" && protocol != "https" {
            return Err(AppError::Config(format!(
                "server.protocol must be http or https, got {}",
                self.server.protocol
            )));
        }

        if protocol != "https" {
            if is_local_server_domain(&self.server.domain) {
                tracing::warn!(
                    host = %normalized_server_host(&self.server.domain),
                    "Serving federation over plain http for local development"
                );
            } else {
                return Err(AppError::Config(
                    "server.protocol must be https for non-local server domains".to_string(),
                ));
            }
        }

        let web_origin = self.web_origin();
        match url::Url::parse(&web_origin) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
            _ => {
                return Err(AppError::Config(format!(
                    "federation.web_origin must be an absolute http(s) URL, got {}",
                    web_origin
                )));
            }
        }

        if self.federation.page_size == 0 {
            return Err(AppError::Config(
                "federation.page_size must be greater than 0".to_string(),
            ));
        }

        if self.admin.username.trim().is_empty() {
            return Err(AppError::Config("admin.username must not be empty".to_string()));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
