//! Configuration module for the CRM Bridge Service
//!
//! Values come from built-in defaults, an optional config file and
//! `BRIDGE__`-prefixed environment variables, in that order of precedence.

use serde::{Deserialize, Serialize};
use url::Url;

/// Main configuration structure for the bridge service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Bitrix24 client configuration
    pub bitrix: BitrixConfig,
    /// Observability configuration
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 8010)
    pub port: u16,
    /// Maximum request body size in bytes (default: 1MB)
    pub max_body_size: usize,
    /// Enable CORS (default: true)
    pub cors_enabled: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; empty selects the in-memory store
    pub postgres_url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
    /// Run embedded migrations on startup
    pub run_migrations: bool,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for signing session tokens
    pub jwt_secret: String,
    /// Session token lifetime in seconds (default: 7 days)
    pub token_ttl: u64,
    /// Name of the session cookie
    pub cookie_name: String,
    /// Mark the session cookie `Secure`
    pub secure_cookies: bool,
    /// Admin account created at startup when no admin exists
    pub bootstrap_admin_email: Option<String>,
    pub bootstrap_admin_password: Option<String>,
}

/// Bitrix24 client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitrixConfig {
    /// Outbound request timeout in seconds
    pub request_timeout: u64,
    /// Projects whose CRM URL equals this value never reach the network
    pub sentinel_url: Option<String>,
    /// How long cached CRM field lists stay valid, in seconds
    pub fields_cache_ttl: u64,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus endpoint
    pub metrics_enabled: bool,
    /// Metric name namespace
    pub metrics_namespace: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log format (json, pretty, compact)
    pub log_format: String,
}

/// CRM URL that marks a project as a demo configuration.
pub const DEFAULT_SENTINEL_URL: &str = "https://your-bitrix-domain.bitrix24.ru";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8010,
            max_body_size: 1024 * 1024, // 1MB
            cors_enabled: true,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: String::new(),
            max_connections: 10,
            connection_timeout: 30,
            run_migrations: true,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4()),
            token_ttl: 60 * 60 * 24 * 7,
            cookie_name: "auth-token".to_string(),
            secure_cookies: false,
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
        }
    }
}

impl Default for BitrixConfig {
    fn default() -> Self {
        Self {
            request_timeout: 30,
            sentinel_url: Some(DEFAULT_SENTINEL_URL.to_string()),
            fields_cache_ttl: 300,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_namespace: "crm_bridge".to_string(),
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the environment, optionally layered over a file
    pub fn load(config_file: Option<&str>) -> Result<Self, config::ConfigError> {
        let defaults = config::Config::try_from(&BridgeConfig::default())?;

        let mut cfg = config::Config::builder().add_source(defaults);

        let file = config_file
            .map(str::to_string)
            .or_else(|| std::env::var("BRIDGE_CONFIG_FILE").ok());
        if let Some(path) = file {
            cfg = cfg.add_source(config::File::with_name(&path).required(false));
        }

        cfg.add_source(
            config::Environment::with_prefix("BRIDGE")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?
        .try_deserialize()
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(None)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.auth.jwt_secret.len() < 32 {
            return Err("JWT secret must be at least 32 characters".to_string());
        }

        if self.auth.token_ttl == 0 {
            return Err("Token TTL must be positive".to_string());
        }

        if self.auth.bootstrap_admin_email.is_some() {
            match self.auth.bootstrap_admin_password.as_deref() {
                Some(password) if password.len() >= 6 => {}
                _ => {
                    return Err(
                        "Bootstrap admin password must be at least 6 characters".to_string()
                    )
                }
            }
        }

        if !self.database.postgres_url.is_empty() {
            Url::parse(&self.database.postgres_url)
                .map_err(|e| format!("Invalid PostgreSQL URL: {}", e))?;
        }

        if let Some(ref sentinel) = self.bitrix.sentinel_url {
            Url::parse(sentinel).map_err(|e| format!("Invalid sentinel URL: {}", e))?;
        }

        Ok(())
    }

    /// Whether `url` is the configured demo CRM URL
    pub fn is_sentinel_url(&self, url: &str) -> bool {
        self.bitrix
            .sentinel_url
            .as_deref()
            .map(|sentinel| sentinel.trim_end_matches('/') == url.trim_end_matches('/'))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.server.port, 8010);
        assert_eq!(config.auth.cookie_name, "auth-token");
        assert_eq!(config.auth.token_ttl, 604_800);
        assert!(config.database.postgres_url.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BridgeConfig::default();
        assert!(config.validate().is_ok());

        config.server.port = 0;
        assert!(config.validate().is_err());
        config.server.port = 8010;

        config.auth.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());
        config.auth.jwt_secret = "a".repeat(32);

        config.database.postgres_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.database.postgres_url = "postgresql://localhost:5432/bridge".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sentinel_matching() {
        let mut config = BridgeConfig::default();
        assert!(config.is_sentinel_url("https://your-bitrix-domain.bitrix24.ru"));
        assert!(config.is_sentinel_url("https://your-bitrix-domain.bitrix24.ru/"));
        assert!(!config.is_sentinel_url("https://acme.bitrix24.ru/rest/1/abc/"));

        config.bitrix.sentinel_url = None;
        assert!(!config.is_sentinel_url("https://your-bitrix-domain.bitrix24.ru"));
    }
}
