//! Notification surface of the engine
//!
//! Handlers are plain callbacks kept in a copy-on-write list. Emitting never blocks on
//! registration and delivery is synchronous on the emitting task.

use crate::network::{ConnectionDescription, ConnectionId, ModuleId, PortAddress, SlotChange};
use crate::runtime::context::{ModuleOutcome, RunStatus};
use arc_swap::ArcSwap;
use std::{fmt, sync::Arc};
use uuid::Uuid;

/// Everything observers can be told about
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    ModuleAdded {
        module: ModuleId,
    },
    ModuleRemoved {
        module: ModuleId,
    },
    ConnectionAdded {
        id: ConnectionId,
        description: ConnectionDescription,
    },
    ConnectionRemoved {
        id: ConnectionId,
    },
    /// A connection request was rejected
    InvalidConnection {
        from: PortAddress,
        to: PortAddress,
        reason: String,
    },
    /// Dynamic port slots were renumbered
    DynamicPortsUpdated {
        modules: Vec<ModuleId>,
        changes: Vec<SlotChange>,
    },
    ExecutionStarted {
        run_id: Uuid,
    },
    /// Fired exactly once per requested run
    ExecutionFinished {
        run_id: Uuid,
        status: RunStatus,
        code: i32,
    },
    ExecutionInterrupted {
        run_id: Uuid,
    },
    ModuleExecuteBegins {
        run_id: Uuid,
        module: ModuleId,
    },
    ModuleExecuteEnds {
        run_id: Uuid,
        module: ModuleId,
        outcome: ModuleOutcome,
    },
}

/// Shared callback type
pub type EventHandler = Arc<dyn Fn(&NetworkEvent) + Send + Sync>;

/// Callback registry; clones share the same handlers
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<ArcSwap<Vec<EventHandler>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(ArcSwap::from_pointee(Vec::new())),
        }
    }

    /// Register a handler for every event
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.handlers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&handler));
            next
        });
    }

    /// Deliver an event to every handler registered so far
    pub fn emit(&self, event: NetworkEvent) {
        let handlers = self.handlers.load();
        for handler in handlers.iter() {
            handler(&event);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.load().len()
    }

    pub fn on_module_added<F>(&self, f: F)
    where
        F: Fn(&ModuleId) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let NetworkEvent::ModuleAdded { module } = event {
                f(module);
            }
        });
    }

    pub fn on_module_removed<F>(&self, f: F)
    where
        F: Fn(&ModuleId) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let NetworkEvent::ModuleRemoved { module } = event {
                f(module);
            }
        });
    }

    pub fn on_connection_added<F>(&self, f: F)
    where
        F: Fn(&ConnectionId, &ConnectionDescription) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let NetworkEvent::ConnectionAdded { id, description } = event {
                f(id, description);
            }
        });
    }

    pub fn on_connection_removed<F>(&self, f: F)
    where
        F: Fn(&ConnectionId) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let NetworkEvent::ConnectionRemoved { id } = event {
                f(id);
            }
        });
    }

    pub fn on_invalid_connection<F>(&self, f: F)
    where
        F: Fn(&PortAddress, &PortAddress, &str) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let NetworkEvent::InvalidConnection { from, to, reason } = event {
                f(from, to, reason);
            }
        });
    }

    pub fn on_execution_started<F>(&self, f: F)
    where
        F: Fn(Uuid) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let NetworkEvent::ExecutionStarted { run_id } = event {
                f(*run_id);
            }
        });
    }

    pub fn on_execution_finished<F>(&self, f: F)
    where
        F: Fn(Uuid, RunStatus, i32) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let NetworkEvent::ExecutionFinished {
                run_id,
                status,
                code,
            } = event
            {
                f(*run_id, *status, *code);
            }
        });
    }

    pub fn on_module_execute_end<F>(&self, f: F)
    where
        F: Fn(&ModuleId, &ModuleOutcome) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let NetworkEvent::ModuleExecuteEnds {
                module, outcome, ..
            } = event
            {
                f(module, outcome);
            }
        });
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(NetworkEvent::ModuleAdded {
            module: ModuleId::new("A", 1),
        });
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn test_typed_registration_filters_events() {
        let bus = EventBus::new();
        let added = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&added);
        bus.on_module_added(move |id| sink.lock().push(id.clone()));

        bus.emit(NetworkEvent::ModuleRemoved {
            module: ModuleId::new("A", 1),
        });
        bus.emit(NetworkEvent::ModuleAdded {
            module: ModuleId::new("B", 2),
        });

        assert_eq!(*added.lock(), vec![ModuleId::new("B", 2)]);
    }

    #[test]
    fn test_clones_share_handlers() {
        let bus = EventBus::new();
        let other = bus.clone();
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        other.subscribe(move |_| *counter.lock() += 1);

        bus.emit(NetworkEvent::ExecutionStarted {
            run_id: Uuid::new_v4(),
        });
        assert_eq!(*count.lock(), 1);
        assert_eq!(bus.handler_count(), 1);
    }
}
