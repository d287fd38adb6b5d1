//! Configuration Module
//!
//! Environment-driven configuration for the stream client.

mod settings;

pub use settings::{
    CatalogSettings, ClientConfig, ConfigError, DEFAULT_STREAM_URL, StreamSettings,
};
