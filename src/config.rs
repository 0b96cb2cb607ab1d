//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};

/// Index name used when `ES_INDEX` is not set.
pub const DEFAULT_INDEX: &str = "instructions-demo";

#[derive(Debug)]
pub struct Config {
    /// Document store endpoint.
    pub store_url: String,
    /// API key a networked store backend authenticates with.
    pub api_key: SecretString,
    /// Index holding the instruction pool.
    pub index: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Reads `ES_URL` and `ES_API_KEY` (required), `ES_INDEX` (defaulting to
    /// [`DEFAULT_INDEX`]), `OTEL_ENDPOINT`, and `LOG_LEVEL`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            store_url: required_var("ES_URL")?,
            api_key: SecretString::from(required_var("ES_API_KEY")?),
            index: std::env::var("ES_INDEX").unwrap_or_else(|_| DEFAULT_INDEX.to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// `.env`-aware variant of [`Config::from_env`] for local development.
    /// Production environments provide the vars directly.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
