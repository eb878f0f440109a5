//! Configuration for the Linkmark client.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default Supabase URL (can be overridden at compile time via the
/// SUPABASE_URL env var).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "https://project.supabase.co",
};

/// Default Supabase publishable key (can be overridden at compile time
/// via the SUPABASE_PUBLISHABLE_KEY env var).
pub const DEFAULT_SUPABASE_PUBLISHABLE_KEY: &str = match option_env!("SUPABASE_PUBLISHABLE_KEY") {
    Some(key) => key,
    None => "publishable-key",
};

/// Table holding the link collection.
pub const DEFAULT_LINKS_TABLE: &str = "bookmarks";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Client configuration.
///
/// The Supabase URL and publishable key are compile-time values; only
/// the log level can be overridden at runtime. Nothing is persisted on
/// the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Supabase project URL.
    pub supabase_url: String,
    /// Supabase publishable API key (public, safe to expose).
    pub supabase_publishable_key: String,
    /// Table holding the link collection.
    pub links_table: String,
}

/// Configuration failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configured Supabase URL does not parse.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            supabase_url: DEFAULT_SUPABASE_URL.to_string(),
            supabase_publishable_key: DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string(),
            links_table: DEFAULT_LINKS_TABLE.to_string(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from
    /// environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Environment variables can only override log_level; the Supabase
    /// URL and key are compile-time values.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("LINKMARK_LOG_LEVEL") {
            self.log_level = log_level;
        }
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.supabase_url).map_err(ConfigError::from)
    }
}
