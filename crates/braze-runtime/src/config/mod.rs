//! Configuration schema and loading.

mod loader;
mod schema;

pub use loader::{ConfigError, ConfigLoader, ConfigResult};
pub use schema::{
    BrazeConfig, GatewayConfig, IdentityConfig, LogFormat, LoggingConfig, PluginsConfig,
    ReclaimerConfig, ReconnectionConfig,
};
