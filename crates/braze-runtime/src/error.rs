//! Plugin runtime error types.

use thiserror::Error;

/// Errors surfaced by plugin lifecycle and dispatch operations.
///
/// All variants are non-fatal to the host: the runtime logs, reports to the
/// caller, and keeps serving the remaining plugins.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// No unit with this name exists on storage (or in the registry, for
    /// operations that require a loaded plugin).
    #[error("plugin '{0}' not found")]
    NotFound(String),

    /// The unit exists but does not satisfy the plugin contract.
    #[error("plugin '{name}' violates the unit contract: {reason}")]
    InvalidContract {
        /// The offending unit.
        name: String,
        /// What was missing or mismatched.
        reason: String,
    },

    /// The plugin's initialization routine failed, or its runtime state
    /// could not be brought up.
    #[error("plugin '{name}' failed to initialize: {reason}")]
    Initialization {
        /// The failing plugin.
        name: String,
        /// Description of the original cause.
        reason: String,
    },

    /// A recurring-schedule expression did not parse.
    #[error("invalid schedule expression '{expr}': {reason}")]
    ScheduleInvalid {
        /// The rejected expression.
        expr: String,
        /// Parser diagnostics.
        reason: String,
    },

    /// A handler failed during live event dispatch.
    #[error("handler fault in plugin '{plugin}' for '{category}': {reason}")]
    HandlerFault {
        /// The owning plugin.
        plugin: String,
        /// The event category being dispatched.
        category: String,
        /// Description of the failure.
        reason: String,
    },

    /// The on-disk plugin set could not be read or written.
    #[error("failed to persist plugin state: {0}")]
    Persistence(String),

    /// The operation is disallowed on a protected plugin.
    #[error("plugin '{0}' is protected")]
    Protected(String),
}

/// Result type for plugin runtime operations.
pub type PluginResult<T> = Result<T, PluginError>;
