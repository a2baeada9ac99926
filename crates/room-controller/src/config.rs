//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP bind address (WebSocket, health, status, metrics).
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default host reconnection grace period in seconds.
///
/// Long enough to tolerate a blocking OS file picker or a tab-visibility
/// change on the host side.
pub const DEFAULT_HOST_GRACE_SECONDS: u64 = 50;

/// Default delay before a completed relay session is purged, in seconds.
/// Absorbs trailing acks and retry requests.
pub const DEFAULT_RELAY_PURGE_SECONDS: u64 = 300;

/// Default maximum number of guests per room.
pub const DEFAULT_MAX_GUESTS: usize = 10;

/// Default upper bound on `total_chunks` for a relay session.
pub const DEFAULT_RELAY_MAX_CHUNKS: u32 = 16_384;

/// Default STUN server list handed to clients via `/ice-config`.
pub const DEFAULT_STUN_URLS: &str = "stun:stun.l.google.com:19302";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rc";

/// Room Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:8080"). A bare `PORT` variable
    /// overrides the port part (container platform convention).
    pub bind_address: String,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// Host reconnection grace period in seconds (default: 50).
    pub host_grace_seconds: u64,

    /// Delay before purging a completed relay session in seconds (default: 300).
    pub relay_purge_seconds: u64,

    /// Maximum guests per room (default: 10).
    pub max_guests: usize,

    /// Maximum `total_chunks` accepted for a relay session (default: 16384).
    pub relay_max_chunks: u32,

    /// STUN server URLs handed to clients (comma-separated).
    pub stun_urls: Vec<String>,

    /// Optional TURN server URL.
    pub turn_url: Option<String>,

    /// Optional TURN username.
    pub turn_username: Option<String>,

    /// Optional TURN credential.
    /// Protected by `SecretString` to prevent accidental logging.
    pub turn_credential: Option<SecretString>,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("instance_id", &self.instance_id)
            .field("host_grace_seconds", &self.host_grace_seconds)
            .field("relay_purge_seconds", &self.relay_purge_seconds)
            .field("max_guests", &self.max_guests)
            .field("relay_max_chunks", &self.relay_max_chunks)
            .field("stun_urls", &self.stun_urls)
            .field("turn_url", &self.turn_url)
            .field("turn_username", &self.turn_username)
            .field(
                "turn_credential",
                &self.turn_credential.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
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
        let mut bind_address = vars
            .get("RC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        // Container platforms assign PORT; it wins over the default port.
        if let Some(port) = vars.get("PORT") {
            let port: u16 = port.parse().map_err(|_| {
                ConfigError::InvalidValue("PORT must be a port number".to_string())
            })?;
            let host = bind_address
                .rsplit_once(':')
                .map_or("0.0.0.0", |(host, _)| host);
            bind_address = format!("{host}:{port}");
        }

        let host_grace_seconds = vars
            .get("RC_HOST_GRACE_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST_GRACE_SECONDS);

        let relay_purge_seconds = vars
            .get("RC_RELAY_PURGE_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RELAY_PURGE_SECONDS);

        let max_guests = vars
            .get("RC_MAX_GUESTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_GUESTS);

        let relay_max_chunks = vars
            .get("RC_RELAY_MAX_CHUNKS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RELAY_MAX_CHUNKS);

        let stun_urls = vars
            .get("RC_STUN_URLS")
            .map_or(DEFAULT_STUN_URLS, String::as_str)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let turn_url = vars.get("RC_TURN_URL").cloned();
        let turn_username = vars.get("RC_TURN_USERNAME").cloned();
        let turn_credential = vars
            .get("RC_TURN_CREDENTIAL")
            .map(|s| SecretString::from(s.clone()));

        // Generate instance ID
        let instance_id = vars.get("RC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = vars
                .get("HOSTNAME")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            instance_id,
            host_grace_seconds,
            relay_purge_seconds,
            max_guests,
            relay_max_chunks,
            stun_urls,
            turn_url,
            turn_username,
            turn_credential,
        })
    }

    /// TURN credential, exposed for the `/ice-config` response.
    #[must_use]
    pub fn turn_credential_value(&self) -> Option<&str> {
        self.turn_credential.as_ref().map(ExposeSecret::expose_secret)
    }
}
