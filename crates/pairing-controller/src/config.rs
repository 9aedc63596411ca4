//! Pairing Controller configuration.
//!
//! Configuration is loaded from environment variables. Sensitive fields are
//! held as `SecretString` and redacted in Debug output.

use crate::protocol::IceServer;
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default listen port for the WebSocket/HTTP server.
pub const DEFAULT_PORT: u16 = 3000;

/// Default CORS origin (allow any).
pub const DEFAULT_CORS_ORIGIN: &str = "*";

/// Default shared-store host.
pub const DEFAULT_REDIS_HOST: &str = "127.0.0.1";

/// Default shared-store port.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Default shutdown drain period in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 10;

/// Default STUN servers handed to clients when none are configured.
pub const DEFAULT_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Pairing Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    /// HTTP/WebSocket listen port.
    pub port: u16,

    /// Allowed CORS origin for browser clients ("*" allows any).
    pub cors_origin: String,

    /// Shared-store host.
    pub redis_host: String,

    /// Shared-store port.
    pub redis_port: u16,

    /// Shared-store password, if the store requires AUTH.
    pub redis_password: Option<SecretString>,

    /// Shared-store logical database index.
    pub redis_db: u32,

    /// Whether the analytics store is enabled at all.
    pub analytics_enabled: bool,

    /// Analytics store connection URL. Required when analytics is enabled.
    pub database_url: Option<SecretString>,

    /// STUN server URLs handed to clients.
    pub stun_urls: Vec<String>,

    /// Optional TURN relay URL.
    pub turn_url: Option<String>,

    /// TURN username, paired with `turn_credential`.
    pub turn_username: Option<String>,

    /// TURN credential.
    pub turn_credential: Option<SecretString>,

    /// Shutdown drain period in seconds.
    pub drain_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("cors_origin", &self.cors_origin)
            .field("redis_host", &self.redis_host)
            .field("redis_port", &self.redis_port)
            .field("redis_password", &self.redis_password.as_ref().map(|_| "[REDACTED]"))
            .field("redis_db", &self.redis_db)
            .field("analytics_enabled", &self.analytics_enabled)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("stun_urls", &self.stun_urls)
            .field("turn_url", &self.turn_url)
            .field("turn_username", &self.turn_username)
            .field("turn_credential", &self.turn_credential.as_ref().map(|_| "[REDACTED]"))
            .field("drain_seconds", &self.drain_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = vars
            .get("PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let cors_origin = vars
            .get("CORS_ORIGIN")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string());

        let redis_host = vars
            .get("REDIS_HOST")
            .cloned()
            .unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string());

        let redis_port = vars
            .get("REDIS_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REDIS_PORT);

        let redis_password = vars
            .get("REDIS_PASSWORD")
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::from(s.clone()));

        let redis_db = vars
            .get("REDIS_DB")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let analytics_enabled = vars
            .get("ANALYTICS_ENABLED")
            .map(|s| matches!(s.as_str(), "1" | "true" | "TRUE" | "yes"))
            .unwrap_or(false);

        let database_url = vars
            .get("DATABASE_URL")
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::from(s.clone()));

        if analytics_enabled && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }

        let stun_urls = vars
            .get("STUN_URLS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .filter(|urls| !urls.is_empty())
            .unwrap_or_else(|| DEFAULT_STUN_URLS.iter().map(|s| (*s).to_string()).collect());

        let turn_url = vars.get("TURN_URL").filter(|s| !s.is_empty()).cloned();
        let turn_username = vars.get("TURN_USERNAME").filter(|s| !s.is_empty()).cloned();
        let turn_credential = vars
            .get("TURN_CREDENTIAL")
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::from(s.clone()));

        if turn_url.is_some() && (turn_username.is_none() || turn_credential.is_none()) {
            return Err(ConfigError::InvalidValue(
                "TURN_URL requires TURN_USERNAME and TURN_CREDENTIAL".to_string(),
            ));
        }

        let drain_seconds = vars
            .get("PC_DRAIN_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DRAIN_SECONDS);

        Ok(Config {
            port,
            cors_origin,
            redis_host,
            redis_port,
            redis_password,
            redis_db,
            analytics_enabled,
            database_url,
            stun_urls,
            turn_url,
            turn_username,
            turn_credential,
            drain_seconds,
        })
    }

    /// Build the store connection URL.
    ///
    /// The result may embed the password, so it is returned as a
    /// `SecretString` and must never be logged.
    #[must_use]
    pub fn redis_url(&self) -> SecretString {
        let auth = match &self.redis_password {
            Some(password) => format!(":{}@", password.expose_secret()),
            None => String::new(),
        };
        SecretString::from(format!(
            "redis://{}{}:{}/{}",
            auth, self.redis_host, self.redis_port, self.redis_db
        ))
    }

    /// ICE-server descriptors handed to every client on connect.
    #[must_use]
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut servers = vec![IceServer {
            urls: self.stun_urls.clone(),
            username: None,
            credential: None,
        }];

        if let (Some(url), Some(username), Some(credential)) =
            (&self.turn_url, &self.turn_username, &self.turn_credential)
        {
            servers.push(IceServer {
                urls: vec![url.clone()],
                username: Some(username.clone()),
                credential: Some(credential.expose_secret().to_string()),
            });
        }

        servers
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_all_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load");

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.cors_origin, "*");
        assert_eq!(config.redis_host, DEFAULT_REDIS_HOST);
        assert_eq!(config.redis_port, DEFAULT_REDIS_PORT);
        assert!(config.redis_password.is_none());
        assert_eq!(config.redis_db, 0);
        assert!(!config.analytics_enabled);
        assert_eq!(config.stun_urls.len(), DEFAULT_STUN_URLS.len());
        assert_eq!(config.drain_seconds, DEFAULT_DRAIN_SECONDS);
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            ("PORT".to_string(), "8080".to_string()),
            ("CORS_ORIGIN".to_string(), "https://chat.example.com".to_string()),
            ("REDIS_HOST".to_string(), "redis.internal".to_string()),
            ("REDIS_PORT".to_string(), "6380".to_string()),
            ("REDIS_PASSWORD".to_string(), "s3cret".to_string()),
            ("REDIS_DB".to_string(), "2".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load");

        assert_eq!(config.port, 8080);
        assert_eq!(config.cors_origin, "https://chat.example.com");
        assert_eq!(config.redis_host, "redis.internal");
        assert_eq!(config.redis_port, 6380);
        assert_eq!(config.redis_db, 2);
        assert_eq!(
            config.redis_url().expose_secret(),
            "redis://:s3cret@redis.internal:6380/2"
        );
    }

    #[test]
    fn test_redis_url_without_password() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        assert_eq!(
            config.redis_url().expose_secret(),
            "redis://127.0.0.1:6379/0"
        );
    }

    #[test]
    fn test_analytics_requires_database_url() {
        let vars = HashMap::from([("ANALYTICS_ENABLED".to_string(), "true".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "DATABASE_URL"));

        let vars = HashMap::from([
            ("ANALYTICS_ENABLED".to_string(), "true".to_string()),
            (
                "DATABASE_URL".to_string(),
                "postgres://sb:pw@localhost/switchboard".to_string(),
            ),
        ]);
        let config = Config::from_vars(&vars).expect("Config should load");
        assert!(config.analytics_enabled);
        assert!(config.database_url.is_some());
    }

    #[test]
    fn test_turn_requires_credentials() {
        let vars = HashMap::from([("TURN_URL".to_string(), "turn:turn.example.com".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_ice_servers_with_turn() {
        let vars = HashMap::from([
            ("TURN_URL".to_string(), "turn:turn.example.com:3478".to_string()),
            ("TURN_USERNAME".to_string(), "sb".to_string()),
            ("TURN_CREDENTIAL".to_string(), "turnpw".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();

        let servers = config.ice_servers();
        assert_eq!(servers.len(), 2);
        assert!(servers[0].urls[0].starts_with("stun:"));
        assert_eq!(servers[1].urls, vec!["turn:turn.example.com:3478"]);
        assert_eq!(servers[1].username.as_deref(), Some("sb"));
        assert_eq!(servers[1].credential.as_deref(), Some("turnpw"));
    }

    #[test]
    fn test_stun_urls_parsing() {
        let vars = HashMap::from([(
            "STUN_URLS".to_string(),
            "stun:a.example.com:3478, stun:b.example.com:3478".to_string(),
        )]);
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.stun_urls,
            vec!["stun:a.example.com:3478", "stun:b.example.com:3478"]
        );
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let vars = HashMap::from([
            ("REDIS_PASSWORD".to_string(), "hunter2".to_string()),
            ("TURN_URL".to_string(), "turn:t.example.com".to_string()),
            ("TURN_USERNAME".to_string(), "sb".to_string()),
            ("TURN_CREDENTIAL".to_string(), "turnpw".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("hunter2"));
        assert!(!debug_output.contains("turnpw"));
    }

    #[test]
    fn test_invalid_numerics_fall_back_to_defaults() {
        let vars = HashMap::from([
            ("PORT".to_string(), "not-a-port".to_string()),
            ("REDIS_PORT".to_string(), "-1".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.redis_port, DEFAULT_REDIS_PORT);
    }
}
