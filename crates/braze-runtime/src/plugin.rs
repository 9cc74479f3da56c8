//! The plugin contract and init-time registration context.
//!
//! A plugin's compiled half implements [`BotPlugin`] and is constructed
//! through a [`FactoryRegistry`] entry; its discoverable half is the on-disk
//! unit (see [`unit`](crate::unit)). During [`BotPlugin::init`] the plugin
//! registers event handlers and scheduled tasks through the
//! [`PluginContext`] it is handed; the loader captures those registrations
//! and commits them to the registry only when `init` returns successfully.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tracing::error;

use braze_core::{EventCtx, EventKind, Gateway, GatewayEvent};

use crate::facade::PluginHandle;
use crate::journal::{ErrorJournal, FaultKind};
use crate::scheduler::{TaskContext, TaskHandle, parse_schedule};

/// Boxed error type carried by handler and task results.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A fully wrapped per-plugin event handler.
///
/// The wrapper is the unit of isolation: it checks the owning plugin's
/// enabled gate, builds the augmented [`EventCtx`], and contains every
/// failure — `Err` results and panics alike — by journalling with
/// attribution and yielding no result.
pub type WrappedHandler = Arc<dyn Fn(Arc<GatewayEvent>) -> BoxFuture<'static, ()> + Send + Sync>;

/// One captured event subscription.
#[derive(Clone)]
pub struct Listener {
    pub kind: EventKind,
    pub handler: WrappedHandler,
}

/// Renders a panic payload for logs.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// Contract
// ============================================================================

/// The contract every plugin implements.
///
/// `name` must equal the on-disk unit's declared name; the loader rejects
/// mismatches as contract violations. `init` is called once per load with a
/// fresh context and may register any number of handlers and schedules.
#[async_trait]
pub trait BotPlugin: Send + Sync {
    /// The plugin's identity.
    fn name(&self) -> &str;

    /// Free-form version string.
    fn version(&self) -> &str {
        "0.1.0"
    }

    /// One-line description shown in listings.
    fn description(&self) -> &str {
        ""
    }

    /// Initialization routine. Runs inside the loader's fault boundary; a
    /// returned error (or panic) aborts the load of this plugin only.
    async fn init(&self, ctx: &PluginContext) -> Result<(), BoxError>;
}

/// Constructor for a plugin instance.
///
/// Called once per load, so every load observes a fresh value — reload swaps
/// the registry entry instead of mutating code in place.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn BotPlugin> + Send + Sync>;

/// Registry of compiled-in plugin constructors, keyed by plugin name.
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: Arc<RwLock<HashMap<String, PluginFactory>>>,
}

impl FactoryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under the name of the plugin it constructs.
    /// Re-registering a name replaces the previous factory.
    pub fn register(&self, factory: PluginFactory) {
        let name = (*factory)().name().to_string();
        self.factories.write().insert(name, factory);
    }

    /// Looks up the factory for `name`.
    pub fn get(&self, name: &str) -> Option<PluginFactory> {
        self.factories.read().get(name).cloned()
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("names", &self.names())
            .finish()
    }
}

// ============================================================================
// PluginContext
// ============================================================================

/// Context handed to [`BotPlugin::init`].
///
/// Collects the plugin's handler and schedule registrations, and dereferences
/// to the plugin's [`PluginHandle`] so façade capabilities are available
/// directly (`ctx.send_group_msg(...)`, `ctx.is_master(...)`, ...).
pub struct PluginContext {
    plugin: String,
    handle: Arc<PluginHandle>,
    gate: Arc<AtomicBool>,
    gateway: Arc<dyn Gateway>,
    journal: Arc<ErrorJournal>,
    listeners: Mutex<Vec<Listener>>,
    tasks: Mutex<Vec<Option<Arc<TaskHandle>>>>,
}

impl PluginContext {
    pub(crate) fn new(
        plugin: &str,
        handle: Arc<PluginHandle>,
        gate: Arc<AtomicBool>,
        gateway: Arc<dyn Gateway>,
        journal: Arc<ErrorJournal>,
    ) -> Self {
        Self {
            plugin: plugin.to_string(),
            handle,
            gate,
            gateway,
            journal,
            listeners: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The owning plugin's name.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// The plugin's façade handle, for moving into handler closures.
    pub fn handle(&self) -> Arc<PluginHandle> {
        Arc::clone(&self.handle)
    }

    /// Registers a handler for one event category.
    ///
    /// The handler is wrapped immediately: at delivery time the wrapper
    /// checks the plugin's enabled gate, invokes the handler with the
    /// augmented [`EventCtx`], and swallows failures after journalling them
    /// with `(plugin, category)` attribution — a fault here is invisible to
    /// sibling plugins and to the gateway.
    pub fn on<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(EventCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let plugin = self.plugin.clone();
        let gate = Arc::clone(&self.gate);
        let gateway = Arc::clone(&self.gateway);
        let journal = Arc::clone(&self.journal);
        let handler = Arc::new(handler);

        let wrapped: WrappedHandler = Arc::new(move |event: Arc<GatewayEvent>| {
            let plugin = plugin.clone();
            let gate = Arc::clone(&gate);
            let gateway = Arc::clone(&gateway);
            let journal = Arc::clone(&journal);
            let handler = Arc::clone(&handler);
            async move {
                if !gate.load(Ordering::Acquire) {
                    return;
                }
                let ctx = EventCtx::new(event, gateway);
                match std::panic::AssertUnwindSafe((*handler)(ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(
                            plugin = %plugin,
                            category = %kind,
                            error = %e,
                            "Handler returned an error"
                        );
                        journal.record(&plugin, FaultKind::HandlerFault, e.to_string());
                    }
                    Err(payload) => {
                        let msg = panic_message(payload);
                        error!(
                            plugin = %plugin,
                            category = %kind,
                            error = %msg,
                            "Handler panicked"
                        );
                        journal.record(&plugin, FaultKind::HandlerFault, msg);
                    }
                }
            }
            .boxed()
        });

        self.listeners.lock().push(Listener {
            kind,
            handler: wrapped,
        });
    }

    /// Registers one recurring task.
    ///
    /// An invalid expression is journalled as `schedule-invalid` and leaves a
    /// `None` placeholder in the task list, preserving index alignment;
    /// registration of the remaining tasks continues. Tasks are constructed
    /// stopped — only `enable` starts them.
    pub fn cron<F, Fut>(&self, expr: &str, task: F)
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let slot = match parse_schedule(expr) {
            Ok(schedule) => {
                let task = Arc::new(task);
                Some(Arc::new(TaskHandle::new(
                    &self.plugin,
                    expr,
                    schedule,
                    Arc::new(move |ctx| (*task)(ctx).boxed()),
                    Arc::clone(&self.gateway),
                    Arc::clone(&self.journal),
                )))
            }
            Err(e) => {
                error!(plugin = %self.plugin, expr, error = %e, "Invalid schedule expression");
                self.journal
                    .record(&self.plugin, FaultKind::ScheduleInvalid, e.to_string());
                None
            }
        };
        self.tasks.lock().push(slot);
    }

    /// Registers several recurring tasks at once.
    pub fn cron_many<F, Fut>(&self, tasks: Vec<(&str, F)>)
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        for (expr, task) in tasks {
            self.cron(expr, task);
        }
    }

    /// Drains the captured registrations. Called by the loader after a
    /// successful `init`.
    pub(crate) fn take_captures(&self) -> (Vec<Listener>, Vec<Option<Arc<TaskHandle>>>) {
        (
            std::mem::take(&mut *self.listeners.lock()),
            std::mem::take(&mut *self.tasks.lock()),
        )
    }
}

impl Deref for PluginContext {
    type Target = PluginHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}
