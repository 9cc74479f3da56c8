//! Bundled plugins.

mod cmds;
mod demo;

pub use cmds::CmdsPlugin;
pub use demo::DemoPlugin;

use std::sync::Arc;

use crate::plugin::{BotPlugin, FactoryRegistry};

/// A factory registry preloaded with the bundled plugins.
pub fn default_factories() -> FactoryRegistry {
    let factories = FactoryRegistry::new();
    factories.register(Arc::new(|| -> Box<dyn BotPlugin> { Box::new(CmdsPlugin) }));
    factories.register(Arc::new(|| -> Box<dyn BotPlugin> { Box::new(DemoPlugin) }));
    factories
}
