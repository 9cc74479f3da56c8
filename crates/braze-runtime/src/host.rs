//! Host orchestration.
//!
//! [`Host`] wires the pieces together in startup order: logging from
//! configuration, connection log taps on the gateway, dispatcher binding,
//! the configured plugin set, the resource reclaimer, and an online notice
//! to the configured masters. `run` then parks until a shutdown signal.
//!
//! The gateway itself is handed in by the caller — the host never knows
//! which protocol implementation is behind the boundary.
//!
//! ```rust,ignore
//! use braze_runtime::host::Host;
//!
//! let host = Host::from_file("braze.toml", gateway)?;
//! host.run().await;
//! ```

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use braze_core::{EventKind, Gateway, GatewayEvent};

use crate::builtin;
use crate::config::{BrazeConfig, ConfigLoader, ConfigResult};
use crate::journal::ErrorJournal;
use crate::logging;
use crate::manager::PluginManager;
use crate::persist::PluginSetStore;
use crate::plugin::FactoryRegistry;
use crate::reclaim::ResourceReclaimer;

/// The assembled bot host.
pub struct Host {
    config: Arc<BrazeConfig>,
    gateway: Arc<dyn Gateway>,
    manager: Arc<PluginManager>,
    reclaim_token: Mutex<Option<CancellationToken>>,
    _log_guard: Option<WorkerGuard>,
}

impl Host {
    /// Loads configuration from `path` and assembles a host with the
    /// bundled plugins registered.
    pub fn from_file(path: impl AsRef<Path>, gateway: Arc<dyn Gateway>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let config = ConfigLoader::new().file(path).load()?;
        Ok(Self::with_factories(
            config,
            PluginSetStore::new(path),
            gateway,
            builtin::default_factories(),
        ))
    }

    /// Assembles a host with the bundled plugins registered.
    pub fn new(config: BrazeConfig, store: PluginSetStore, gateway: Arc<dyn Gateway>) -> Self {
        Self::with_factories(config, store, gateway, builtin::default_factories())
    }

    /// Assembles a host with a caller-provided factory registry.
    pub fn with_factories(
        config: BrazeConfig,
        store: PluginSetStore,
        gateway: Arc<dyn Gateway>,
        factories: FactoryRegistry,
    ) -> Self {
        let log_guard = logging::init_from_config(&config.logging);
        let config = Arc::new(config);
        let manager = PluginManager::new(
            Arc::clone(&config),
            store,
            Arc::clone(&gateway),
            factories,
            Arc::new(ErrorJournal::new()),
        );

        info!(
            gateway = %config.gateway.base_url,
            plugin_root = %config.plugins.root.display(),
            "Host assembled"
        );

        Self {
            config,
            gateway,
            manager,
            reclaim_token: Mutex::new(None),
            _log_guard: log_guard,
        }
    }

    /// The plugin manager.
    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    /// The configuration.
    pub fn config(&self) -> &BrazeConfig {
        &self.config
    }

    /// Brings the host up: log taps, dispatcher, plugins, reclaimer, online
    /// notice.
    pub async fn start(&self) {
        self.install_log_taps();
        self.manager.dispatcher().bind(&self.gateway);

        let (loaded, failed) = self.manager.load_all().await;
        if failed > 0 {
            warn!(loaded, failed, "Some configured plugins failed to load");
        }

        let reclaimer = ResourceReclaimer::new(
            Arc::downgrade(&self.manager),
            self.config.reclaimer.clone(),
        );
        *self.reclaim_token.lock() = Some(reclaimer.spawn());

        self.notify_masters().await;
        info!("Host started");
    }

    /// Stops background work. Plugins stay registered; a subsequent `start`
    /// on a fresh host resumes from the persisted set.
    pub async fn shutdown(&self) {
        if let Some(token) = self.reclaim_token.lock().take() {
            token.cancel();
        }
        info!("Host stopped");
    }

    /// Runs the host until Ctrl+C or SIGTERM.
    pub async fn run(&self) {
        self.start().await;
        Self::wait_for_shutdown().await;
        self.shutdown().await;
    }

    /// Connection-lifecycle log taps, installed alongside (not through) the
    /// dispatcher so they survive any plugin churn.
    fn install_log_taps(&self) {
        let taps: [(EventKind, fn(&GatewayEvent)); 6] = [
            (EventKind::ConnectionOpen, |e| {
                if let GatewayEvent::ConnectionOpen { url } = e {
                    info!(url = %url, "Gateway connection open");
                }
            }),
            (EventKind::ConnectionError, |e| {
                if let GatewayEvent::ConnectionError { reason } = e {
                    error!(reason = %reason, "Gateway connection error");
                }
            }),
            (EventKind::ConnectionClose, |e| {
                if let GatewayEvent::ConnectionClose { code } = e {
                    error!(code, "Gateway connection closed");
                }
            }),
            (EventKind::Lifecycle, |e| {
                if let GatewayEvent::Lifecycle { sub_type } = e {
                    info!(sub_type = %sub_type, "Gateway lifecycle event");
                }
            }),
            (EventKind::Heartbeat, |e| {
                if let GatewayEvent::Heartbeat { interval_ms } = e {
                    tracing::trace!(interval_ms, "Gateway heartbeat");
                }
            }),
            (EventKind::ApiFailure, |e| {
                if let GatewayEvent::ApiFailure { action, message } = e {
                    error!(action = %action, message = %message, "Gateway API call failed");
                }
            }),
        ];
        for (kind, tap) in taps {
            self.gateway.subscribe(kind, Arc::new(move |event| tap(&event)));
        }
    }

    /// Tells every configured master the host is online, with plugin counts.
    async fn notify_masters(&self) {
        let (enabled, available) = self.manager.counts().await;
        let notice = format!(
            "[braze] host online\nplugins: {enabled}/{available} enabled\nplatform: {} {}",
            std::env::consts::OS,
            std::env::consts::ARCH,
        );
        for master in &self.config.identity.master {
            if let Err(e) = self.gateway.send_private_msg(*master, &notice).await {
                error!(master, error = %e, "Failed to send online notice");
            }
        }
    }

    async fn wait_for_shutdown() {
        #[cfg(unix)]
        {
            let mut sigterm =
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(error = %e, "Cannot register SIGTERM handler");
                        let _ = signal::ctrl_c().await;
                        return;
                    }
                };
            tokio::select! {
                _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockGateway, Target, write_unit};
    use tempfile::tempdir;

    #[tokio::test]
    async fn start_loads_configured_plugins_and_notifies_masters() {
        let tmp = tempdir().unwrap();
        let plugin_root = tmp.path().join("plugins");
        write_unit(&plugin_root, "cmds");
        write_unit(&plugin_root, "demo");

        let config_path = tmp.path().join("braze.toml");
        std::fs::write(
            &config_path,
            format!(
                "[identity]\nbot_uin = 10000\nmaster = [42]\n\n\
                 [plugins]\nroot = {:?}\nsystem = [\"cmds\"]\nuser = [\"demo\"]\n",
                plugin_root.display().to_string(),
            ),
        )
        .unwrap();

        let gateway = Arc::new(MockGateway::new());
        let host = Host::from_file(&config_path, gateway.clone()).unwrap();
        host.start().await;

        assert_eq!(host.manager().is_enabled("cmds").await, Some(true));
        assert_eq!(host.manager().is_enabled("demo").await, Some(true));

        let notices = gateway.sent_messages();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].target, Target::User(42));
        assert!(notices[0].text.contains("2/2 enabled"));

        host.shutdown().await;
    }
}
