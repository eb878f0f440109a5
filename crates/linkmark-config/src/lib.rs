//! Configuration and logging setup for the Linkmark client.

mod config;
mod logging;

pub use config::{
    Config, ConfigError, DEFAULT_LINKS_TABLE, DEFAULT_LOG_LEVEL, DEFAULT_SUPABASE_PUBLISHABLE_KEY,
    DEFAULT_SUPABASE_URL,
};
pub use logging::{init_logging, parse_level};
