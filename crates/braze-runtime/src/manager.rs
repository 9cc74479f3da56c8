//! Plugin lifecycle management.
//!
//! [`PluginManager`] is the exclusive owner of the plugin registry. It:
//!
//! - Resolves units on disk, instantiates their compiled factories, and
//!   drives the initialization routine inside a fault boundary
//!   ([`load`](PluginManager::load)).
//! - Sequences enable/disable/reload so that, for any one plugin name, no
//!   interleaving of suspended operations can leave two live registry
//!   entries or double-subscribed listeners: the whole mutation runs under
//!   one operations lock, the enabled flag flips *before* subscription
//!   state changes in either direction, and the dispatcher/task layers
//!   reject duplicates as a backstop.
//! - Mirrors enable/disable outcomes into the persisted plugin set; a
//!   persistence failure is reported but never reverts in-memory state.
//! - Exposes the administrative surface as classified status strings
//!   (`[+]` success, `[*]` information, `[-]` failure).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::{debug, error, info, warn};

use braze_core::Gateway;

use crate::config::BrazeConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::{PluginError, PluginResult};
use crate::facade::{HandleCache, HostCapabilities};
use crate::journal::{ErrorJournal, FaultKind};
use crate::persist::{PersistedPluginSet, PluginSetStore};
use crate::plugin::{FactoryRegistry, Listener, PluginContext, panic_message};
use crate::scheduler::{TaskHandle, TaskPool};
use crate::unit::{PluginKind, PluginUnit, UnitStore};

/// The distinguished command plugin; disabling it is rejected.
pub const PROTECTED_PLUGIN: &str = "cmds";

/// One registry record.
struct LoadedPlugin {
    unit: PluginUnit,
    kind: PluginKind,
    enabled: bool,
    /// Shared with every wrapped handler; cleared before unsubscription so
    /// a handler cannot fire after logical disable.
    gate: Arc<AtomicBool>,
    listeners: Vec<Listener>,
    /// `None` marks a slot whose schedule expression was rejected.
    tasks: Vec<Option<Arc<TaskHandle>>>,
    /// Set while disabled; drives reclaimer eviction.
    idle_since: Option<Instant>,
}

/// Listing entry for the administrative surface.
#[derive(Debug, Clone)]
pub struct PluginStatus {
    pub name: String,
    pub version: String,
    pub description: String,
    pub kind: PluginKind,
    pub enabled: bool,
    pub listeners: usize,
    pub tasks: usize,
}

/// Central owner of plugin lifecycle and registry state.
pub struct PluginManager {
    config: Arc<BrazeConfig>,
    gateway: Arc<dyn Gateway>,
    plugins: AsyncRwLock<HashMap<String, LoadedPlugin>>,
    /// Serializes load/enable/disable/reload mutations.
    ops: AsyncMutex<()>,
    factories: FactoryRegistry,
    units: UnitStore,
    dispatcher: Arc<EventDispatcher>,
    pool: Arc<TaskPool>,
    store: PluginSetStore,
    journal: Arc<ErrorJournal>,
    handles: HandleCache,
    caps: Arc<HostCapabilities>,
}

impl PluginManager {
    /// Creates a manager wired to `gateway`, with the capability façade
    /// built once and pointed back at this manager.
    pub fn new(
        config: Arc<BrazeConfig>,
        store: PluginSetStore,
        gateway: Arc<dyn Gateway>,
        factories: FactoryRegistry,
        journal: Arc<ErrorJournal>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let caps = Arc::new(HostCapabilities::new(
                Arc::clone(&gateway),
                config.identity.clone(),
                weak.clone(),
            ));
            Self {
                units: UnitStore::new(&config.plugins.root),
                config,
                gateway,
                plugins: AsyncRwLock::new(HashMap::new()),
                ops: AsyncMutex::new(()),
                factories,
                dispatcher: Arc::new(EventDispatcher::new()),
                pool: Arc::new(TaskPool::new()),
                store,
                journal,
                handles: HandleCache::new(),
                caps,
            }
        })
    }

    /// The event dispatcher to bind against the gateway.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// The fault journal.
    pub fn journal(&self) -> &Arc<ErrorJournal> {
        &self.journal
    }

    /// Unit names currently discoverable on disk.
    pub fn discover(&self) -> Vec<String> {
        self.units.discover()
    }

    /// Whether `name` is loaded, and if so whether it is enabled.
    pub async fn is_enabled(&self, name: &str) -> Option<bool> {
        self.plugins.read().await.get(name).map(|p| p.enabled)
    }

    /// `(enabled, available)` plugin counts.
    pub async fn counts(&self) -> (usize, usize) {
        let enabled = self
            .plugins
            .read()
            .await
            .values()
            .filter(|p| p.enabled)
            .count();
        (enabled, self.discover().len())
    }

    /// Listing of every loaded plugin, sorted by name.
    pub async fn snapshot(&self) -> Vec<PluginStatus> {
        let plugins = self.plugins.read().await;
        let mut statuses: Vec<PluginStatus> = plugins
            .values()
            .map(|p| PluginStatus {
                name: p.unit.name.clone(),
                version: p.unit.version.clone(),
                description: p.unit.description.clone(),
                kind: p.kind,
                enabled: p.enabled,
                listeners: p.listeners.len(),
                tasks: p.tasks.len(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    // ─── Load ────────────────────────────────────────────────────────────

    /// Loads (or replaces) the named plugin.
    ///
    /// On success the plugin is committed disabled, then enabled immediately
    /// when the persisted set lists it — an always-on plugin never observably
    /// sits disabled between load and enable.
    pub async fn load(&self, name: &str) -> PluginResult<()> {
        let _ops = self.ops.lock().await;
        self.load_locked(name).await
    }

    async fn load_locked(&self, name: &str) -> PluginResult<()> {
        // Snapshot the persisted set before any teardown: classification and
        // auto-enable must reflect the state the caller saw, not the
        // intermediate state a replace writes.
        let persisted = self.persisted_set();

        // Invalidate before resolving so a reload observes the latest
        // on-disk content, never a stale cached manifest.
        self.units.invalidate(name);
        let unit = self.units.resolve(name)?;

        // At most one active registry entry per name.
        let existing = self.plugins.read().await.get(name).map(|p| p.enabled);
        match existing {
            Some(true) => {
                debug!(plugin = %name, "Replacing an enabled plugin, disabling first");
                self.disable_locked(name, true).await?;
                self.plugins.write().await.remove(name);
            }
            Some(false) => {
                self.plugins.write().await.remove(name);
            }
            None => {}
        }

        // The compiled half of the contract.
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PluginError::InvalidContract {
                name: name.to_string(),
                reason: "no compiled entry for this unit".to_string(),
            })?;
        let instance = (*factory)();
        if instance.name() != unit.name {
            return Err(PluginError::InvalidContract {
                name: name.to_string(),
                reason: format!("compiled entry exports identity '{}'", instance.name()),
            });
        }

        // Run init inside the fault boundary; no partial registry entry
        // survives a failure.
        let gate = Arc::new(AtomicBool::new(false));
        let handle = self.handles.obtain(name, &self.caps, &self.journal);
        let ctx = PluginContext::new(
            name,
            handle,
            Arc::clone(&gate),
            Arc::clone(&self.gateway),
            Arc::clone(&self.journal),
        );
        let outcome = std::panic::AssertUnwindSafe(instance.init(&ctx))
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_message(payload)),
        };
        if let Some(reason) = failure {
            error!(plugin = %name, error = %reason, "Plugin initialization failed");
            self.journal
                .record(name, FaultKind::Initialization, reason.clone());
            self.handles.release(name);
            self.units.invalidate(name);
            return Err(PluginError::Initialization {
                name: name.to_string(),
                reason,
            });
        }
        let (listeners, tasks) = ctx.take_captures();

        // Classification comes from startup configuration membership, never
        // from the unit itself. The live persisted set is not used here:
        // enable/disable edit it continuously, and a reload must not
        // reclassify a system plugin that happens to be disabled right now.
        let kind = if self.config.plugins.system.iter().any(|n| n == name) {
            PluginKind::System
        } else {
            PluginKind::User
        };

        info!(
            plugin = %name,
            version = %unit.version,
            kind = %kind,
            listeners = listeners.len(),
            tasks = tasks.len(),
            "Plugin loaded"
        );
        self.plugins.write().await.insert(
            name.to_string(),
            LoadedPlugin {
                unit,
                kind,
                enabled: false,
                gate,
                listeners,
                tasks,
                idle_since: Some(Instant::now()),
            },
        );

        if persisted.contains(kind, name) {
            self.enable_locked(name).await?;
        }
        Ok(())
    }

    /// The persisted plugin set, falling back to the startup configuration
    /// when the file cannot be read.
    fn persisted_set(&self) -> PersistedPluginSet {
        match self.store.read() {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "Cannot read persisted plugin set, using startup configuration");
                PersistedPluginSet {
                    system: self.config.plugins.system.clone(),
                    user: self.config.plugins.user.clone(),
                }
            }
        }
    }

    // ─── Enable / Disable ────────────────────────────────────────────────

    /// Enables the named plugin.
    ///
    /// Returns `Ok(true)` when the state changed, `Ok(false)` when already
    /// enabled.
    pub async fn enable(&self, name: &str) -> PluginResult<bool> {
        let _ops = self.ops.lock().await;
        self.enable_locked(name).await
    }

    async fn enable_locked(&self, name: &str) -> PluginResult<bool> {
        let (kind, listeners, tasks) = {
            let mut plugins = self.plugins.write().await;
            let Some(p) = plugins.get_mut(name) else {
                return Err(PluginError::NotFound(name.to_string()));
            };
            if p.enabled {
                debug!(plugin = %name, "Already enabled");
                return Ok(false);
            }
            // Flag first: a suspended operation on this name observes the
            // plugin as enabled and cannot bring it up a second time.
            p.enabled = true;
            p.gate.store(true, Ordering::Release);
            p.idle_since = None;
            (p.kind, p.listeners.clone(), p.tasks.clone())
        };

        let bring_up = (|| -> PluginResult<()> {
            self.dispatcher.insert(name, &listeners)?;
            for task in tasks.iter().flatten() {
                task.start(&self.pool)?;
            }
            Ok(())
        })();
        if let Err(e) = bring_up {
            error!(plugin = %name, error = %e, "Enable failed, rolling back");
            if let Err(rollback) = self.disable_locked(name, true).await {
                // Known gap: a failed rollback is best effort. The journal
                // entry is the operator-visible trace.
                warn!(plugin = %name, error = %rollback, "Rollback after failed enable also failed");
                self.journal
                    .record(name, FaultKind::Rollback, rollback.to_string());
            }
            return Err(e);
        }

        info!(plugin = %name, "Plugin enabled");

        if let Err(e) = self.store.set_membership(kind, name, true) {
            error!(plugin = %name, error = %e, "Failed to persist enable");
            self.journal
                .record(name, FaultKind::Persistence, e.to_string());
            // In-memory state stands; the caller learns the mirror is stale.
            return Err(e);
        }
        Ok(true)
    }

    /// Disables the named plugin.
    ///
    /// Returns `Ok(true)` when the state changed, `Ok(false)` when already
    /// disabled. Disabling the command plugin is rejected with
    /// [`PluginError::Protected`].
    pub async fn disable(&self, name: &str) -> PluginResult<bool> {
        let _ops = self.ops.lock().await;
        self.disable_locked(name, false).await
    }

    async fn disable_locked(&self, name: &str, bypass_protection: bool) -> PluginResult<bool> {
        if !bypass_protection && name == PROTECTED_PLUGIN {
            return Err(PluginError::Protected(name.to_string()));
        }

        let (kind, tasks) = {
            let mut plugins = self.plugins.write().await;
            let Some(p) = plugins.get_mut(name) else {
                return Err(PluginError::NotFound(name.to_string()));
            };
            if !p.enabled {
                debug!(plugin = %name, "Already disabled");
                return Ok(false);
            }
            // Flag first: closes the window in which a handler could still
            // fire after logical disable.
            p.enabled = false;
            p.gate.store(false, Ordering::Release);
            p.idle_since = Some(Instant::now());
            (p.kind, p.tasks.clone())
        };

        let removed = self.dispatcher.remove(name);
        let mut stopped = 0;
        for task in tasks.iter().flatten() {
            task.stop();
            stopped += 1;
        }
        self.pool.prune();
        self.units.invalidate(name);
        self.handles.release(name);

        info!(plugin = %name, listeners = removed, tasks = stopped, "Plugin disabled");

        if let Err(e) = self.store.set_membership(kind, name, false) {
            error!(plugin = %name, error = %e, "Failed to persist disable");
            self.journal
                .record(name, FaultKind::Persistence, e.to_string());
            return Err(e);
        }
        Ok(true)
    }

    // ─── Reload ──────────────────────────────────────────────────────────

    /// Reloads the named plugin: disable, settle, load, restore the prior
    /// enabled state.
    ///
    /// A name absent from the registry is loaded fresh instead.
    pub async fn reload(&self, name: &str) -> PluginResult<()> {
        let was_enabled = match self.is_enabled(name).await {
            Some(enabled) => enabled,
            None => {
                warn!(plugin = %name, "Reload of an unloaded plugin, loading fresh");
                return self.load(name).await;
            }
        };

        {
            let _ops = self.ops.lock().await;
            // Verify the unit still exists before tearing anything down.
            self.units.invalidate(name);
            self.units.resolve(name)?;
            if was_enabled {
                self.disable_locked(name, true).await?;
            }
        }

        // Settle: let in-flight handler continuations drain before new code
        // observes the module state. Only non-negativity matters.
        tokio::time::sleep(Duration::from_millis(self.config.plugins.settle_delay_ms)).await;

        {
            let _ops = self.ops.lock().await;
            self.load_locked(name).await?;
            if was_enabled {
                self.enable_locked(name).await?;
            }
        }
        info!(plugin = %name, "Plugin reloaded");
        Ok(())
    }

    // ─── Startup ─────────────────────────────────────────────────────────

    /// Loads every plugin named in the configured system and user lists.
    ///
    /// Individual failures are logged and skipped; returns
    /// `(loaded, failed)`.
    pub async fn load_all(&self) -> (usize, usize) {
        let configured: Vec<String> = self
            .config
            .plugins
            .system
            .iter()
            .chain(self.config.plugins.user.iter())
            .cloned()
            .collect();
        info!(plugins = ?configured, "Loading configured plugins");

        let (mut loaded, mut failed) = (0, 0);
        for name in &configured {
            match self.load(name).await {
                Ok(()) => loaded += 1,
                Err(e) => {
                    error!(plugin = %name, error = %e, "Failed to load plugin");
                    failed += 1;
                }
            }
        }
        let (enabled, available) = self.counts().await;
        info!(loaded, failed, enabled, available, "Plugin loading finished");
        (loaded, failed)
    }

    // ─── Storage sync & reclaim support ──────────────────────────────────

    /// Removes registry records whose backing unit disappeared from storage.
    /// Returns the removed names.
    pub async fn sync_with_storage(&self) -> Vec<String> {
        let _ops = self.ops.lock().await;
        let on_disk = self.units.discover();
        let stale: Vec<String> = self
            .plugins
            .read()
            .await
            .keys()
            .filter(|name| !on_disk.iter().any(|n| n == *name))
            .cloned()
            .collect();

        for name in &stale {
            warn!(plugin = %name, "Backing unit disappeared, removing from registry");
            if let Err(e) = self.disable_locked(name, true).await {
                debug!(plugin = %name, error = %e, "Teardown while removing stale plugin");
            }
            self.plugins.write().await.remove(name);
            self.handles.release(name);
            self.units.invalidate(name);
        }
        stale
    }

    /// Evicts cached state for disabled plugins idle past `retention`.
    /// Returns the evicted names.
    pub async fn reclaim_idle(&self, retention: Duration) -> Vec<String> {
        let idle: Vec<String> = self
            .plugins
            .read()
            .await
            .values()
            .filter(|p| !p.enabled && p.idle_since.is_some_and(|t| t.elapsed() >= retention))
            .map(|p| p.unit.name.clone())
            .collect();
        self.handles.evict(idle.iter().map(String::as_str));
        self.units.evict(idle.iter().map(String::as_str));
        idle
    }

    /// Stops tracked tasks whose owner is no longer in the registry.
    pub async fn stop_orphan_tasks(&self) -> usize {
        let known: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        self.pool.stop_orphans(known.iter().map(String::as_str))
    }

    /// Critical reclaim: clears both caches unconditionally and stops every
    /// tracked task whose owner is disabled. Enabled plugins' live state is
    /// never touched.
    pub async fn reclaim_critical(&self) {
        self.handles.clear();
        self.units.clear();
        let disabled: Vec<String> = self
            .plugins
            .read()
            .await
            .values()
            .filter(|p| !p.enabled)
            .map(|p| p.unit.name.clone())
            .collect();
        for name in &disabled {
            self.pool.stop_owner(name);
        }
        self.pool.prune();
    }

    pub(crate) fn handle_cache(&self) -> &HandleCache {
        &self.handles
    }

    pub(crate) fn task_pool(&self) -> &Arc<TaskPool> {
        &self.pool
    }

    // ─── Administrative surface ──────────────────────────────────────────
    //
    // Classified status strings: `[+]` success, `[*]` information, `[-]`
    // failure. Callers branch on the leading marker, never on the prose.

    /// Formatted plugin listing.
    pub async fn list_cmd(&self) -> String {
        self.sync_with_storage().await;
        let statuses = self.snapshot().await;
        let (enabled, available) = self.counts().await;

        let mut out = format!("[*]plugins {enabled}/{available} enabled (loaded/available)");
        for status in statuses {
            let state = if status.enabled { "on " } else { "off" };
            out.push_str(&format!(
                "\n{state} {} v{} [{}] {}",
                status.name, status.version, status.kind, status.description
            ));
        }
        out
    }

    pub async fn enable_cmd(&self, name: &str) -> String {
        match self.enable(name).await {
            Ok(true) => format!("[+]plugin {name} enabled"),
            Ok(false) => format!("[*]plugin {name} is already enabled"),
            Err(e) => format!("[-]failed to enable {name}: {e}"),
        }
    }

    pub async fn disable_cmd(&self, name: &str) -> String {
        match self.disable(name).await {
            Ok(true) => format!("[+]plugin {name} disabled"),
            Ok(false) => format!("[*]plugin {name} is already disabled"),
            Err(e) => format!("[-]failed to disable {name}: {e}"),
        }
    }

    pub async fn reload_cmd(&self, name: &str) -> String {
        match self.reload(name).await {
            Ok(()) => format!("[+]plugin {name} reloaded"),
            Err(e) => format!("[-]failed to reload {name}: {e}"),
        }
    }

    pub async fn load_cmd(&self, name: &str) -> String {
        match self.load(name).await {
            Ok(()) => format!("[+]plugin {name} loaded"),
            Err(e) => format!("[-]failed to load {name}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::default_factories;
    use crate::testutil::{
        BadCronPlugin, BrokenPlugin, FailingPlugin, PanickingPlugin, Target, TestBed,
        counting_factory, group_message, simple_factory, ticker_factory, write_unit,
    };
    use std::sync::atomic::AtomicUsize;

    fn counting_bed(names: &[&'static str]) -> (TestBed, Vec<Arc<AtomicUsize>>) {
        let factories = FactoryRegistry::new();
        let mut counters = Vec::new();
        for name in names {
            let counter = Arc::new(AtomicUsize::new(0));
            factories.register(counting_factory(name, Arc::clone(&counter)));
            counters.push(counter);
        }
        (TestBed::new(factories, &[], &[]), counters)
    }

    #[tokio::test]
    async fn load_twice_keeps_one_active_listener_set() {
        let (bed, counters) = counting_bed(&["steady"]);
        bed.manager.load("steady").await.unwrap();
        bed.manager.enable("steady").await.unwrap();

        // Second load replaces the entry; the persisted set snapshot taken
        // before teardown restores the enabled state.
        bed.manager.load("steady").await.unwrap();
        assert_eq!(bed.manager.is_enabled("steady").await, Some(true));
        assert_eq!(bed.manager.dispatcher().handler_count("steady"), 1);

        bed.emit_and_settle(group_message(7, 5, "hi")).await;
        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enable_and_disable_are_idempotent() {
        let (bed, _) = counting_bed(&["steady"]);
        bed.manager.load("steady").await.unwrap();

        assert!(bed.manager.enable("steady").await.unwrap());
        assert!(!bed.manager.enable("steady").await.unwrap());
        assert_eq!(bed.manager.dispatcher().handler_count("steady"), 1);

        assert!(bed.manager.disable("steady").await.unwrap());
        assert!(!bed.manager.disable("steady").await.unwrap());
        assert_eq!(bed.manager.dispatcher().handler_count("steady"), 0);
    }

    #[tokio::test]
    async fn lifecycle_operations_on_unknown_names_report_not_found() {
        let (bed, _) = counting_bed(&["steady"]);
        assert!(matches!(
            bed.manager.enable("ghost").await,
            Err(PluginError::NotFound(_))
        ));
        assert!(matches!(
            bed.manager.disable("ghost").await,
            Err(PluginError::NotFound(_))
        ));
        assert!(matches!(
            bed.manager.load("ghost").await,
            Err(PluginError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn panicking_sibling_does_not_block_delivery() {
        // Scenario C: "chaos" panics on every event, "steady" must still
        // run, and the host must survive.
        let factories = FactoryRegistry::new();
        factories.register(simple_factory::<PanickingPlugin>());
        factories.register(simple_factory::<FailingPlugin>());
        let counter = Arc::new(AtomicUsize::new(0));
        factories.register(counting_factory("steady", Arc::clone(&counter)));
        let bed = TestBed::new(factories, &[], &[]);

        for name in ["chaos", "grump", "steady"] {
            bed.manager.load(name).await.unwrap();
            bed.manager.enable(name).await.unwrap();
        }

        bed.emit_and_settle(group_message(7, 5, "boom")).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let faults = bed.manager.journal().records();
        assert!(
            faults
                .iter()
                .any(|r| r.plugin == "chaos" && r.kind == FaultKind::HandlerFault)
        );
        assert!(
            faults
                .iter()
                .any(|r| r.plugin == "grump" && r.kind == FaultKind::HandlerFault)
        );
    }

    #[tokio::test]
    async fn disable_stops_delivery() {
        let (bed, counters) = counting_bed(&["steady"]);
        bed.manager.load("steady").await.unwrap();
        bed.manager.enable("steady").await.unwrap();

        bed.emit_and_settle(group_message(7, 5, "one")).await;
        assert_eq!(counters[0].load(Ordering::SeqCst), 1);

        bed.manager.disable("steady").await.unwrap();
        bed.emit_and_settle(group_message(7, 5, "two")).await;
        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reload_preserves_enabled_state() {
        let (bed, _) = counting_bed(&["steady", "sleepy"]);
        bed.manager.load("steady").await.unwrap();
        bed.manager.enable("steady").await.unwrap();
        bed.manager.load("sleepy").await.unwrap();

        bed.manager.reload("steady").await.unwrap();
        assert_eq!(bed.manager.is_enabled("steady").await, Some(true));
        assert_eq!(bed.manager.dispatcher().handler_count("steady"), 1);

        bed.manager.reload("sleepy").await.unwrap();
        assert_eq!(bed.manager.is_enabled("sleepy").await, Some(false));
        assert_eq!(bed.manager.dispatcher().handler_count("sleepy"), 0);
    }

    #[tokio::test]
    async fn reload_of_unloaded_name_loads_fresh() {
        let (bed, _) = counting_bed(&["steady"]);
        bed.manager.reload("steady").await.unwrap();
        assert_eq!(bed.manager.is_enabled("steady").await, Some(false));
    }

    #[tokio::test]
    async fn protected_plugin_cannot_be_disabled() {
        let bed = TestBed::new(default_factories(), &["cmds"], &[]);
        bed.manager.load("cmds").await.unwrap();
        assert_eq!(bed.manager.is_enabled("cmds").await, Some(true));

        assert!(matches!(
            bed.manager.disable("cmds").await,
            Err(PluginError::Protected(_))
        ));
        // Listeners stay intact.
        assert_eq!(bed.manager.is_enabled("cmds").await, Some(true));
        assert_eq!(bed.manager.dispatcher().handler_count("cmds"), 1);
    }

    #[tokio::test]
    async fn demo_replies_world_to_hello_exactly_once() {
        // Scenario A, end to end through the dispatcher.
        let bed = TestBed::new(default_factories(), &[], &["demo"]);
        bed.manager.load("demo").await.unwrap();
        assert_eq!(bed.manager.is_enabled("demo").await, Some(true));

        bed.emit_and_settle(group_message(7, 5, "hello")).await;

        let sent = bed.gateway.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, Target::Group(7));
        assert!(sent[0].text.ends_with("world"));
    }

    #[tokio::test]
    async fn invalid_schedule_leaves_a_null_slot_and_a_journal_entry() {
        // Scenario B.
        let factories = FactoryRegistry::new();
        factories.register(simple_factory::<BadCronPlugin>());
        let bed = TestBed::new(factories, &[], &[]);

        bed.manager.load("badcron").await.unwrap();

        let plugins = bed.manager.plugins.read().await;
        let record = plugins.get("badcron").expect("registered");
        assert_eq!(record.tasks.len(), 1);
        assert!(record.tasks[0].is_none());
        drop(plugins);

        let faults = bed.manager.journal().for_plugin("badcron");
        assert_eq!(
            faults
                .iter()
                .filter(|r| r.kind == FaultKind::ScheduleInvalid)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn disabled_plugin_remains_discoverable() {
        // Scenario D.
        let (bed, _) = counting_bed(&["steady"]);
        bed.manager.load("steady").await.unwrap();
        bed.manager.enable("steady").await.unwrap();
        bed.manager.disable("steady").await.unwrap();

        assert!(bed.manager.discover().contains(&"steady".to_string()));
        let listing = bed.manager.snapshot().await;
        let entry = listing.iter().find(|s| s.name == "steady").expect("listed");
        assert!(!entry.enabled);
    }

    #[tokio::test]
    async fn unit_without_compiled_entry_fails_the_contract() {
        let (bed, _) = counting_bed(&["steady"]);
        write_unit(&bed.tmp.path().join("plugins"), "stranger");

        assert!(matches!(
            bed.manager.load("stranger").await,
            Err(PluginError::InvalidContract { .. })
        ));
        assert_eq!(bed.manager.is_enabled("stranger").await, None);
    }

    #[tokio::test]
    async fn failed_init_leaves_no_partial_registry_entry() {
        let factories = FactoryRegistry::new();
        factories.register(simple_factory::<BrokenPlugin>());
        let bed = TestBed::new(factories, &[], &[]);

        let err = bed.manager.load("broken").await.unwrap_err();
        assert!(matches!(err, PluginError::Initialization { .. }));
        assert_eq!(bed.manager.is_enabled("broken").await, None);
        assert!(!bed.manager.handle_cache().contains("broken"));
        assert!(
            bed.manager
                .journal()
                .for_plugin("broken")
                .iter()
                .any(|r| r.kind == FaultKind::Initialization)
        );
    }

    #[tokio::test]
    async fn system_list_membership_classifies_and_auto_enables() {
        let counter = Arc::new(AtomicUsize::new(0));
        let factories = FactoryRegistry::new();
        factories.register(counting_factory("core", Arc::clone(&counter)));
        let bed = TestBed::new(factories, &["core"], &[]);

        bed.manager.load("core").await.unwrap();
        assert_eq!(bed.manager.is_enabled("core").await, Some(true));
        let listing = bed.manager.snapshot().await;
        assert_eq!(listing[0].kind, PluginKind::System);
    }

    #[tokio::test]
    async fn enable_and_disable_mirror_into_the_persisted_set() {
        let (bed, _) = counting_bed(&["steady"]);
        bed.manager.load("steady").await.unwrap();

        bed.manager.enable("steady").await.unwrap();
        let set = bed.manager.store.read().unwrap();
        assert!(set.contains(PluginKind::User, "steady"));

        bed.manager.disable("steady").await.unwrap();
        let set = bed.manager.store.read().unwrap();
        assert!(!set.contains(PluginKind::User, "steady"));
    }

    #[tokio::test]
    async fn tasks_run_only_while_enabled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let factories = FactoryRegistry::new();
        factories.register(ticker_factory(Arc::clone(&counter)));
        let bed = TestBed::new(factories, &[], &[]);

        bed.manager.load("ticker").await.unwrap();
        // Committed disabled: the task must not have started.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        bed.manager.enable("ticker").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(counter.load(Ordering::SeqCst) >= 1);

        bed.manager.disable("ticker").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let settled = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn facade_failures_are_attributed_to_the_calling_plugin() {
        let (bed, _) = counting_bed(&["steady"]);
        bed.manager.load("steady").await.unwrap();

        let handle = bed
            .manager
            .handle_cache()
            .obtain("steady", &bed.manager.caps, bed.manager.journal());
        bed.gateway.fail_sends(true);
        assert!(handle.send_private_msg(1, "hi").await.is_err());

        let faults = bed.manager.journal().for_plugin("steady");
        assert!(
            faults
                .iter()
                .any(|r| r.kind == FaultKind::Facade && r.message.contains("send_private_msg"))
        );
    }

    #[tokio::test]
    async fn vanished_units_are_dropped_by_storage_sync() {
        let (bed, _) = counting_bed(&["steady"]);
        bed.manager.load("steady").await.unwrap();
        bed.manager.enable("steady").await.unwrap();

        std::fs::remove_dir_all(bed.tmp.path().join("plugins").join("steady")).unwrap();
        let removed = bed.manager.sync_with_storage().await;
        assert_eq!(removed, vec!["steady".to_string()]);
        assert_eq!(bed.manager.is_enabled("steady").await, None);
        assert_eq!(bed.manager.dispatcher().handler_count("steady"), 0);
    }
}
