//! Server configuration from the environment.

use std::net::{AddrParseError, SocketAddr};

use thiserror::Error;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid KARMA_ADDR {value:?}: {source}")]
    InvalidAddr {
        value: String,
        #[source]
        source: AddrParseError,
    },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub addr: SocketAddr,
    /// Token clients must present in `auth`. `None` accepts any token.
    pub auth_token: Option<String>,
    /// Base URL of the OpenAI-compatible chat API.
    pub upstream_url: String,
    /// Bearer key for the chat API. The relay answers 503 without it.
    pub upstream_api_key: Option<String>,
    /// Model used when a relay request names none.
    pub default_model: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            auth_token: None,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            upstream_api_key: None,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl ServerConfig {
    /// Read `KARMA_*` variables from the process environment.
    ///
    /// # Errors
    /// Returns error if `KARMA_ADDR` is not a socket address.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Empty values count as unset.
    ///
    /// # Errors
    /// Returns error if `KARMA_ADDR` is not a socket address.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let addr = match get("KARMA_ADDR") {
            Some(value) => value
                .parse()
                .map_err(|source| ConfigError::InvalidAddr { value, source })?,
            None => defaults.addr,
        };

        Ok(Self {
            addr,
            auth_token: get("KARMA_AUTH_TOKEN"),
            upstream_url: get("KARMA_UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            upstream_api_key: get("KARMA_UPSTREAM_API_KEY"),
            default_model: get("KARMA_DEFAULT_MODEL").unwrap_or(defaults.default_model),
        })
    }
}
