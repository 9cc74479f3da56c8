//! Configuration schema definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrazeConfig {
    /// Connection settings for the chat-protocol gateway.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Bot identity and privileged accounts.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Plugin root and the persisted plugin set.
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Resource reclaimer settings.
    #[serde(default)]
    pub reclaimer: ReclaimerConfig,
}

/// Gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Access token presented to the gateway, empty for none.
    #[serde(default)]
    pub access_token: String,

    /// Reconnection behaviour after a dropped connection.
    #[serde(default)]
    pub reconnection: ReconnectionConfig,

    /// Enable protocol-level debug output.
    #[serde(default)]
    pub debug: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_token: String::new(),
            reconnection: ReconnectionConfig::default(),
            debug: false,
        }
    }
}

fn default_base_url() -> String {
    "ws://127.0.0.1:3001".to_string()
}

/// Reconnection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Maximum reconnection attempts before giving up.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay between attempts in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enable: true,
            attempts: default_attempts(),
            delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_attempts() -> u32 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

/// Bot identity and privileged accounts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    /// The bot's own account id.
    #[serde(default)]
    pub bot_uin: i64,

    /// Accounts with master rights.
    #[serde(default)]
    pub master: Vec<i64>,

    /// Accounts with admin rights.
    #[serde(default)]
    pub admins: Vec<i64>,
}

/// Plugin root and the persisted plugin set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directory scanned for plugin units.
    #[serde(default = "default_plugin_root")]
    pub root: PathBuf,

    /// System plugins to auto-load and enable at startup.
    #[serde(default)]
    pub system: Vec<String>,

    /// User plugins to auto-load and enable at startup.
    #[serde(default)]
    pub user: Vec<String>,

    /// Delay between disable and re-load during a reload, letting in-flight
    /// handler continuations drain. Only non-negativity matters.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            root: default_plugin_root(),
            system: Vec::new(),
            user: Vec::new(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

fn default_plugin_root() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_settle_delay_ms() -> u64 {
    50
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive string.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Optional log file; daily-rotated. Stdout when absent.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resource reclaimer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimerConfig {
    /// Seconds between housekeeping passes.
    #[serde(default = "default_reclaim_interval_secs")]
    pub interval_secs: u64,

    /// How long a disabled plugin may stay idle before its cached state is
    /// evicted.
    #[serde(default = "default_idle_retention_secs")]
    pub idle_retention_secs: u64,

    /// Maximum age of journal records.
    #[serde(default = "default_journal_retention_secs")]
    pub journal_retention_secs: u64,

    /// Process RSS high-water mark (MiB) above which the critical pass runs.
    #[serde(default = "default_high_water_mb")]
    pub high_water_mb: u64,
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reclaim_interval_secs(),
            idle_retention_secs: default_idle_retention_secs(),
            journal_retention_secs: default_journal_retention_secs(),
            high_water_mb: default_high_water_mb(),
        }
    }
}

fn default_reclaim_interval_secs() -> u64 {
    300
}

fn default_idle_retention_secs() -> u64 {
    600
}

fn default_journal_retention_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_high_water_mb() -> u64 {
    512
}
