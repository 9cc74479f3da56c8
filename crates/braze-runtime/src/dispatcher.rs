//! Event dispatcher: one gateway subscription per category, fanned out to
//! every enabled plugin's registered handlers.
//!
//! The dispatcher subscribes exactly once per [`EventKind`] when bound,
//! regardless of how many plugins later register for that category. It owns
//! the fan-out table; the gateway only ever sees the dispatcher's own sinks,
//! so plugin churn (enable/disable/reload) never touches the gateway's
//! subscription state.
//!
//! Fan-out is unordered and per-handler independent: every delivery is its
//! own spawned task, awaited individually inside the handler's isolation
//! wrapper. A slow or failing handler cannot block or break delivery to its
//! siblings.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use braze_core::{EventKind, Gateway, GatewayEvent};

use crate::error::{PluginError, PluginResult};
use crate::plugin::{Listener, WrappedHandler};

struct Registration {
    plugin: String,
    handler: WrappedHandler,
}

/// Fan-out table from event categories to per-plugin wrapped handlers.
#[derive(Default)]
pub struct EventDispatcher {
    table: RwLock<HashMap<EventKind, Vec<Registration>>>,
    bound: AtomicBool,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes the dispatcher on `gateway`, once per event category.
    ///
    /// Idempotent: a second bind is ignored with a warning, preserving the
    /// once-per-category guarantee.
    pub fn bind(self: &Arc<Self>, gateway: &Arc<dyn Gateway>) {
        if self.bound.swap(true, Ordering::SeqCst) {
            warn!("Dispatcher is already bound to a gateway");
            return;
        }
        for kind in EventKind::ALL {
            let this = Arc::clone(self);
            gateway.subscribe(
                kind,
                Arc::new(move |event: Arc<GatewayEvent>| {
                    this.deliver(kind, event);
                }),
            );
        }
        debug!("Dispatcher bound to gateway");
    }

    /// Fans one event out to every handler registered for `kind`.
    ///
    /// Each handler runs in its own task; completion (and failure) is
    /// observed inside the handler's wrapper, never here.
    fn deliver(&self, kind: EventKind, event: Arc<GatewayEvent>) {
        let handlers: Vec<WrappedHandler> = {
            let table = self.table.read();
            match table.get(&kind) {
                Some(regs) => regs.iter().map(|r| Arc::clone(&r.handler)).collect(),
                None => return,
            }
        };
        trace!(category = %kind, handlers = handlers.len(), "Dispatching event");
        for handler in handlers {
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                (*handler)(event).await;
            });
        }
    }

    /// Registers `plugin`'s listeners into the fan-out table.
    ///
    /// Errors if the plugin already has live registrations — the registry
    /// guarantees at most one active listener set per plugin name, and this
    /// is the backstop for that invariant.
    pub(crate) fn insert(&self, plugin: &str, listeners: &[Listener]) -> PluginResult<()> {
        let mut table = self.table.write();
        if table
            .values()
            .any(|regs| regs.iter().any(|r| r.plugin == plugin))
        {
            return Err(PluginError::Initialization {
                name: plugin.to_string(),
                reason: "listeners are already subscribed".to_string(),
            });
        }
        for listener in listeners {
            table.entry(listener.kind).or_default().push(Registration {
                plugin: plugin.to_string(),
                handler: Arc::clone(&listener.handler),
            });
        }
        Ok(())
    }

    /// Removes every registration owned by `plugin`. Returns how many were
    /// removed.
    pub(crate) fn remove(&self, plugin: &str) -> usize {
        let mut table = self.table.write();
        let mut removed = 0;
        table.retain(|_, regs| {
            let before = regs.len();
            regs.retain(|r| r.plugin != plugin);
            removed += before - regs.len();
            !regs.is_empty()
        });
        removed
    }

    /// Number of live registrations owned by `plugin`.
    pub fn handler_count(&self, plugin: &str) -> usize {
        self.table
            .read()
            .values()
            .flat_map(|regs| regs.iter())
            .filter(|r| r.plugin == plugin)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockGateway;
    use braze_core::{MessageEvent, MessageScope, Sender};
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_listener(kind: EventKind, counter: Arc<AtomicUsize>) -> Listener {
        Listener {
            kind,
            handler: Arc::new(move |_event| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            }),
        }
    }

    fn group_message(text: &str) -> GatewayEvent {
        GatewayEvent::Message(MessageEvent {
            scope: MessageScope::Group,
            message_id: 1,
            user_id: 42,
            group_id: Some(7),
            raw_message: text.into(),
            sender: Sender {
                user_id: 42,
                ..Sender::default()
            },
            self_id: 0,
        })
    }

    #[tokio::test]
    async fn delivers_to_specific_and_umbrella_categories() {
        let gateway: Arc<MockGateway> = Arc::new(MockGateway::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        dispatcher.bind(&(gateway.clone() as Arc<dyn Gateway>));

        let umbrella = Arc::new(AtomicUsize::new(0));
        let specific = Arc::new(AtomicUsize::new(0));
        dispatcher
            .insert(
                "p",
                &[
                    counting_listener(EventKind::Message, Arc::clone(&umbrella)),
                    counting_listener(EventKind::GroupMessage, Arc::clone(&specific)),
                ],
            )
            .unwrap();

        gateway.emit(group_message("hi"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(umbrella.load(Ordering::SeqCst), 1);
        assert_eq!(specific.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn double_insert_is_rejected() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let listeners = vec![counting_listener(EventKind::Message, counter)];

        dispatcher.insert("p", &listeners).unwrap();
        assert!(dispatcher.insert("p", &listeners).is_err());
        assert_eq!(dispatcher.handler_count("p"), 1);
    }

    #[tokio::test]
    async fn remove_clears_only_the_named_plugin() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher
            .insert("a", &[counting_listener(EventKind::Message, Arc::clone(&counter))])
            .unwrap();
        dispatcher
            .insert("b", &[counting_listener(EventKind::Message, counter)])
            .unwrap();

        assert_eq!(dispatcher.remove("a"), 1);
        assert_eq!(dispatcher.handler_count("a"), 0);
        assert_eq!(dispatcher.handler_count("b"), 1);
    }

    #[tokio::test]
    async fn second_bind_is_ignored() {
        let gateway: Arc<MockGateway> = Arc::new(MockGateway::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        let gateway_dyn = gateway.clone() as Arc<dyn Gateway>;
        dispatcher.bind(&gateway_dyn);
        dispatcher.bind(&gateway_dyn);

        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher
            .insert("p", &[counting_listener(EventKind::GroupMessage, Arc::clone(&counter))])
            .unwrap();

        gateway.emit(group_message("hi"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // One subscription per category: exactly one delivery.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
