//! # Braze
//!
//! A chat-bot host built around a hot-manageable plugin runtime: plugins
//! are discovered on disk, loaded/enabled/disabled/reloaded at run time
//! without restarting the host, share one gateway event stream through an
//! isolating dispatcher, and may contribute cron tasks that start and stop
//! with the plugin.
//!
//! ## Architecture
//!
//! - **braze-core**: the event model and the gateway boundary. Any adapter
//!   that emits these event shapes and answers these actions plugs in.
//! - **braze-runtime**: the plugin runtime — registry, loader, dispatcher,
//!   scheduler bridge, capability façade, persistence, reclaimer — plus the
//!   host orchestration and the bundled `cmds`/`demo` plugins.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use braze::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway: Arc<dyn Gateway> = my_gateway().await?;
//!     let host = Host::from_file("braze.toml", gateway)?;
//!     host.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Writing a plugin
//!
//! ```rust,ignore
//! use braze::prelude::*;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl BotPlugin for Greeter {
//!     fn name(&self) -> &str {
//!         "greeter"
//!     }
//!
//!     async fn init(&self, ctx: &PluginContext) -> Result<(), BoxError> {
//!         ctx.on(EventKind::Message, |e| async move {
//!             if e.raw_message() == "hello" {
//!                 e.reply("world", true).await?;
//!             }
//!             Ok(())
//!         });
//!         ctx.cron("0 9 * * *", |task| async move {
//!             task.send_private_msg(10000, "good morning").await?;
//!             Ok(())
//!         });
//!         Ok(())
//!     }
//! }
//! ```

pub use braze_core as core;
pub use braze_runtime as runtime;

/// Commonly used items, re-exported for plugin and host authors.
pub mod prelude {
    pub use std::sync::Arc;

    pub use async_trait::async_trait;

    pub use braze_core::{
        ApiError, ApiResult, EventCtx, EventKind, Gateway, GatewayEvent, MessageEvent,
        MessageReceipt, MessageScope, NoticeEvent, RequestEvent,
    };
    pub use braze_runtime::{
        BotPlugin, BoxError, BrazeConfig, ConfigLoader, ErrorJournal, FactoryRegistry, Host,
        PluginContext, PluginError, PluginFactory, PluginKind, PluginManager, TaskContext,
    };
}
