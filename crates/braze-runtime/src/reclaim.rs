//! Resource reclaimer.
//!
//! Periodic housekeeping that bounds memory growth across many plugin
//! reload cycles. Each pass runs the normal sweep — evict cached state for
//! disabled plugins idle past the retention window, prune old journal
//! records, stop tasks whose owner left the registry, drop records whose
//! backing unit vanished — and escalates to the critical sweep when the
//! process RSS crosses the configured high-water mark.
//!
//! The reclaimer never touches an enabled plugin's live listeners or
//! running tasks.

use std::sync::Weak;
use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ReclaimerConfig;
use crate::manager::PluginManager;

/// Periodic housekeeping over one [`PluginManager`].
pub struct ResourceReclaimer {
    manager: Weak<PluginManager>,
    config: ReclaimerConfig,
    system: System,
    pid: Option<Pid>,
}

impl ResourceReclaimer {
    pub fn new(manager: Weak<PluginManager>, config: ReclaimerConfig) -> Self {
        Self {
            manager,
            config,
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Spawns the interval loop; cancel the returned token to stop it.
    pub fn spawn(mut self) -> CancellationToken {
        let token = CancellationToken::new();
        let stopper = token.clone();
        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick: nothing to reclaim at startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stopper.cancelled() => break,
                    _ = ticker.tick() => self.pass().await,
                }
            }
            debug!("Resource reclaimer stopped");
        });
        token
    }

    /// One housekeeping pass.
    pub async fn pass(&mut self) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };

        let evicted = manager
            .reclaim_idle(Duration::from_secs(self.config.idle_retention_secs))
            .await;
        if !evicted.is_empty() {
            debug!(plugins = ?evicted, "Evicted idle plugin state");
        }

        manager
            .journal()
            .prune_older_than(chrono::Duration::seconds(
                self.config.journal_retention_secs as i64,
            ));

        let orphans = manager.stop_orphan_tasks().await;
        if orphans > 0 {
            warn!(orphans, "Stopped scheduled tasks with no registry owner");
        }

        manager.sync_with_storage().await;

        if let Some(rss_mb) = self.process_rss_mb()
            && rss_mb >= self.config.high_water_mb
        {
            warn!(
                rss_mb,
                high_water_mb = self.config.high_water_mb,
                "Memory pressure critical, clearing caches"
            );
            // This runtime exposes no collector to request; clearing the
            // caches is the whole critical pass.
            manager.reclaim_critical().await;
        }
    }

    /// Current process RSS in MiB, when the platform reports it.
    fn process_rss_mb(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system.process(pid).map(|p| p.memory() / (1024 * 1024))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::FactoryRegistry;
    use crate::testutil::{TestBed, counting_factory};
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn bed_with_idle_plugin() -> TestBed {
        let factories = FactoryRegistry::new();
        factories.register(counting_factory("idler", Arc::new(AtomicUsize::new(0))));
        // Not listed in system/user: loaded plugins stay disabled.
        TestBed::new(factories, &[], &[])
    }

    #[tokio::test]
    async fn normal_pass_evicts_idle_disabled_state() {
        let bed = bed_with_idle_plugin();
        bed.manager.load("idler").await.unwrap();
        assert!(bed.manager.handle_cache().contains("idler"));

        let config = ReclaimerConfig {
            idle_retention_secs: 0,
            high_water_mb: u64::MAX,
            ..ReclaimerConfig::default()
        };
        let mut reclaimer = ResourceReclaimer::new(Arc::downgrade(&bed.manager), config);
        reclaimer.pass().await;

        assert!(!bed.manager.handle_cache().contains("idler"));
        // Still loaded, still disabled: the reclaimer drops caches, not
        // registry records.
        assert_eq!(bed.manager.is_enabled("idler").await, Some(false));
    }

    #[tokio::test]
    async fn retention_window_spares_recently_disabled_state() {
        let bed = bed_with_idle_plugin();
        bed.manager.load("idler").await.unwrap();

        let config = ReclaimerConfig {
            idle_retention_secs: 3600,
            high_water_mb: u64::MAX,
            ..ReclaimerConfig::default()
        };
        let mut reclaimer = ResourceReclaimer::new(Arc::downgrade(&bed.manager), config);
        reclaimer.pass().await;

        assert!(bed.manager.handle_cache().contains("idler"));
    }

    #[tokio::test]
    async fn critical_pass_clears_caches_unconditionally() {
        let bed = bed_with_idle_plugin();
        bed.manager.load("idler").await.unwrap();

        let config = ReclaimerConfig {
            idle_retention_secs: 3600,
            // Zero high-water mark forces the critical path.
            high_water_mb: 0,
            ..ReclaimerConfig::default()
        };
        let mut reclaimer = ResourceReclaimer::new(Arc::downgrade(&bed.manager), config);
        reclaimer.pass().await;

        assert!(bed.manager.handle_cache().is_empty());
    }

    #[tokio::test]
    async fn orphaned_pool_tasks_are_stopped() {
        let bed = bed_with_idle_plugin();
        let token = tokio_util::sync::CancellationToken::new();
        bed.manager
            .task_pool()
            .register_for_test("ghost", token.clone());

        let config = ReclaimerConfig {
            high_water_mb: u64::MAX,
            ..ReclaimerConfig::default()
        };
        let mut reclaimer = ResourceReclaimer::new(Arc::downgrade(&bed.manager), config);
        reclaimer.pass().await;

        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_manager_makes_pass_a_no_op() {
        let bed = bed_with_idle_plugin();
        let weak = Arc::downgrade(&bed.manager);
        drop(bed);
        let mut reclaimer = ResourceReclaimer::new(weak, ReclaimerConfig::default());
        reclaimer.pass().await;
    }
}
