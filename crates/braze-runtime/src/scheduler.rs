//! Scheduler bridge for plugin-contributed recurring tasks.
//!
//! Schedule expressions are validated once, at registration time, against
//! the cron grammar; a [`TaskHandle`] is constructed **stopped** and only
//! [`enable`](crate::manager::PluginManager::enable) starts it. Callbacks
//! receive a minimal read-only [`TaskContext`] plus a synthetic template
//! event — never a live event from the transport layer, so no two
//! invocations share mutable state.
//!
//! Running tasks are additionally tracked in a process-wide [`TaskPool`] by
//! owning plugin, which is what lets the resource reclaimer stop tasks whose
//! owner has left the registry.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use braze_core::{ApiResult, Gateway, MessageEvent, MessageReceipt};

use crate::error::{PluginError, PluginResult};
use crate::journal::{ErrorJournal, FaultKind};

/// Callback type stored inside a [`TaskHandle`].
pub type TaskFn = Arc<
    dyn Fn(TaskContext) -> BoxFuture<'static, Result<(), crate::plugin::BoxError>> + Send + Sync,
>;

/// Parses a cron expression, accepting the common 5-field form.
///
/// The cron grammar used here wants seconds and an optional year; a 5-field
/// expression (`min hour dom month dow`) is padded with `0` seconds and a
/// `*` year before re-parsing.
pub fn parse_schedule(expr: &str) -> PluginResult<Schedule> {
    Schedule::from_str(expr)
        .or_else(|_| {
            let padded = format!("0 {expr} *");
            Schedule::from_str(&padded)
        })
        .map_err(|e| PluginError::ScheduleInvalid {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

// ============================================================================
// TaskContext
// ============================================================================

/// Minimal read-only context handed to scheduled-task callbacks.
///
/// Deliberately not the full capability façade: tasks can message, and
/// nothing else. The synthetic event is a fresh template copy per
/// invocation.
pub struct TaskContext {
    plugin: String,
    gateway: Arc<dyn Gateway>,
    event: MessageEvent,
}

impl TaskContext {
    fn new(plugin: &str, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            plugin: plugin.to_string(),
            gateway,
            event: MessageEvent::template(),
        }
    }

    /// The owning plugin's name.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// The synthetic template event for this invocation.
    pub fn synthetic_event(&self) -> &MessageEvent {
        &self.event
    }

    pub async fn send_private_msg(&self, user_id: i64, message: &str) -> ApiResult<MessageReceipt> {
        self.gateway.send_private_msg(user_id, message).await
    }

    pub async fn send_group_msg(&self, group_id: i64, message: &str) -> ApiResult<MessageReceipt> {
        self.gateway.send_group_msg(group_id, message).await
    }
}

// ============================================================================
// TaskHandle
// ============================================================================

/// A validated recurring task bound to one plugin.
///
/// Constructed stopped; started on plugin enable, stopped on disable. The
/// schedule is never re-validated after construction.
pub struct TaskHandle {
    plugin: String,
    expr: String,
    schedule: Schedule,
    run: TaskFn,
    gateway: Arc<dyn Gateway>,
    journal: Arc<ErrorJournal>,
    token: Mutex<Option<CancellationToken>>,
}

impl TaskHandle {
    pub(crate) fn new(
        plugin: &str,
        expr: &str,
        schedule: Schedule,
        run: TaskFn,
        gateway: Arc<dyn Gateway>,
        journal: Arc<ErrorJournal>,
    ) -> Self {
        Self {
            plugin: plugin.to_string(),
            expr: expr.to_string(),
            schedule,
            run,
            gateway,
            journal,
            token: Mutex::new(None),
        }
    }

    /// The schedule expression as registered.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Whether the task's driver loop is currently running.
    pub fn is_running(&self) -> bool {
        self.token
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Starts the task's driver loop.
    ///
    /// Errors if the task is already running — a stale handle must never be
    /// double-started.
    pub fn start(self: &Arc<Self>, pool: &TaskPool) -> PluginResult<()> {
        let mut slot = self.token.lock();
        if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return Err(PluginError::Initialization {
                name: self.plugin.clone(),
                reason: format!("task '{}' is already running", self.expr),
            });
        }

        let token = CancellationToken::new();
        *slot = Some(token.clone());
        pool.register(&self.plugin, token.clone());

        let handle = Arc::clone(self);
        tokio::spawn(async move {
            handle.drive(token).await;
        });
        debug!(plugin = %self.plugin, expr = %self.expr, "Scheduled task started");
        Ok(())
    }

    /// Stops the task's driver loop. Idempotent.
    pub fn stop(&self) {
        if let Some(token) = self.token.lock().take() {
            token.cancel();
            debug!(plugin = %self.plugin, expr = %self.expr, "Scheduled task stopped");
        }
    }

    async fn drive(self: Arc<Self>, token: CancellationToken) {
        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                debug!(plugin = %self.plugin, expr = %self.expr, "Schedule exhausted");
                break;
            };
            let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let ctx = TaskContext::new(&self.plugin, Arc::clone(&self.gateway));
            match std::panic::AssertUnwindSafe((*self.run)(ctx))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(plugin = %self.plugin, expr = %self.expr, error = %e, "Scheduled task failed");
                    self.journal
                        .record(&self.plugin, FaultKind::TaskFault, e.to_string());
                }
                Err(payload) => {
                    let msg = crate::plugin::panic_message(payload);
                    error!(plugin = %self.plugin, expr = %self.expr, error = %msg, "Scheduled task panicked");
                    self.journal.record(&self.plugin, FaultKind::TaskFault, msg);
                }
            }
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("plugin", &self.plugin)
            .field("expr", &self.expr)
            .field("running", &self.is_running())
            .finish()
    }
}

// ============================================================================
// TaskPool
// ============================================================================

/// Process-wide tracking of running tasks by owning plugin.
#[derive(Debug, Default)]
pub struct TaskPool {
    running: Mutex<HashMap<String, Vec<CancellationToken>>>,
}

impl TaskPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, owner: &str, token: CancellationToken) {
        self.running
            .lock()
            .entry(owner.to_string())
            .or_default()
            .push(token);
    }

    /// Owners with at least one live token.
    pub fn owners(&self) -> Vec<String> {
        self.prune();
        self.running.lock().keys().cloned().collect()
    }

    /// Cancels every tracked task belonging to `owner`.
    pub fn stop_owner(&self, owner: &str) -> usize {
        let Some(tokens) = self.running.lock().remove(owner) else {
            return 0;
        };
        let live = tokens.iter().filter(|t| !t.is_cancelled()).count();
        for token in tokens {
            token.cancel();
        }
        live
    }

    /// Cancels every tracked task whose owner is not in `known_owners`.
    pub fn stop_orphans<'a>(&self, known_owners: impl IntoIterator<Item = &'a str>) -> usize {
        let known: Vec<&str> = known_owners.into_iter().collect();
        let orphaned: Vec<String> = {
            let running = self.running.lock();
            running
                .keys()
                .filter(|owner| !known.contains(&owner.as_str()))
                .cloned()
                .collect()
        };
        let mut stopped = 0;
        for owner in orphaned {
            stopped += self.stop_owner(&owner);
        }
        stopped
    }

    #[cfg(test)]
    pub(crate) fn register_for_test(&self, owner: &str, token: CancellationToken) {
        self.register(owner, token);
    }

    /// Drops tokens whose task has already been cancelled.
    pub fn prune(&self) {
        let mut running = self.running.lock();
        running.retain(|_, tokens| {
            tokens.retain(|t| !t.is_cancelled());
            !tokens.is_empty()
        });
    }
}
