//! Event-driven communication between sensor readers and GATT characteristics.

use std::sync::{Arc, Weak};

use anyhow::Result;
use dashmap::DashMap;
use log::error;

/// Application events published through the [`EventBus`].
///
/// The set is closed: every sensor connectivity transition and the process
/// shutdown notification are variants here, and handlers dispatch with an
/// exhaustive match. Unknown kinds cannot exist at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The application is exiting.
    ExitApplication,
    /// The GPS reader established a working data stream.
    GpsConnected,
    /// The GPS reader lost its device (I/O failure, not fix loss).
    GpsDisconnected,
    /// The OBD reader established a working data stream.
    ObdConnected,
    /// The OBD reader lost its device.
    ObdDisconnected,
}

/// Receiver side of the event bus.
///
/// Handlers run synchronously on the emitting thread, so implementations
/// must be quick and must not touch the D-Bus connection directly; value
/// updates go through the notification bridge instead.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: EventKind) -> Result<()>;
}

/// Event bus for publish-subscribe messaging between readers and services.
///
/// Explicitly constructed and passed by reference (cloning is cheap and
/// shares the registry), never a process global, so unit tests stay
/// hermetic. Registrations are weak: dropping the owning service silences
/// its handlers without any unsubscribe bookkeeping.
///
/// Duplicate registration is allowed and fires the handler once per
/// registration; deduplication is the caller's responsibility.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<DashMap<EventKind, Vec<Weak<dyn EventHandler>>>>,
}

impl EventBus {
    /// Creates a new, empty event bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `handler` to `kind`.
    ///
    /// Only a weak reference is stored; the registration never extends the
    /// handler's lifetime past its owner.
    pub fn register_handler(&self, kind: EventKind, handler: &Arc<dyn EventHandler>) {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Arc::downgrade(handler));
    }

    /// Emits `kind` to every live handler, synchronously, in registration
    /// order, on the calling thread.
    ///
    /// A failing handler is logged and does not prevent the remaining
    /// handlers from running. Dead registrations are pruned along the way.
    pub fn emit(&self, kind: EventKind) {
        let snapshot: Vec<Weak<dyn EventHandler>> = match self.handlers.get_mut(&kind) {
            Some(mut entry) => {
                entry.value_mut().retain(|weak| weak.strong_count() > 0);
                entry.value().clone()
            }
            None => return,
        };

        for weak in snapshot {
            if let Some(handler) = weak.upgrade() {
                if let Err(e) = handler.handle_event(kind) {
                    error!("event handler failed for {kind:?}: {e}");
                }
            }
        }
    }

    /// Number of live registrations for `kind`.
    #[cfg(test)]
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .get(&kind)
            .map(|entry| entry.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        journal: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Recorder {
        fn new(
            label: &'static str,
            journal: &Arc<Mutex<Vec<&'static str>>>,
        ) -> Arc<dyn EventHandler> {
            Arc::new(Self {
                label,
                journal: journal.clone(),
                fail: false,
            })
        }

        fn failing(
            label: &'static str,
            journal: &Arc<Mutex<Vec<&'static str>>>,
        ) -> Arc<dyn EventHandler> {
            Arc::new(Self {
                label,
                journal: journal.clone(),
                fail: true,
            })
        }
    }

    impl EventHandler for Recorder {
        fn handle_event(&self, _event: EventKind) -> Result<()> {
            self.journal.lock().unwrap().push(self.label);
            if self.fail {
                return Err(anyhow!("handler {} exploded", self.label));
            }
            Ok(())
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let journal = Arc::new(Mutex::new(Vec::new()));

        let first = Recorder::new("first", &journal);
        let second = Recorder::new("second", &journal);
        let third = Recorder::new("third", &journal);

        bus.register_handler(EventKind::GpsConnected, &first);
        bus.register_handler(EventKind::GpsConnected, &second);
        bus.register_handler(EventKind::GpsConnected, &third);

        bus.emit(EventKind::GpsConnected);

        assert_eq!(*journal.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_handler_does_not_stop_the_rest() {
        let bus = EventBus::new();
        let journal = Arc::new(Mutex::new(Vec::new()));

        let bomb = Recorder::failing("bomb", &journal);
        let survivor = Recorder::new("survivor", &journal);

        bus.register_handler(EventKind::ObdDisconnected, &bomb);
        bus.register_handler(EventKind::ObdDisconnected, &survivor);

        bus.emit(EventKind::ObdDisconnected);

        assert_eq!(*journal.lock().unwrap(), vec!["bomb", "survivor"]);
    }

    #[test]
    fn dropped_handler_is_not_invoked() {
        let bus = EventBus::new();
        let journal = Arc::new(Mutex::new(Vec::new()));

        let transient = Recorder::new("transient", &journal);
        let durable = Recorder::new("durable", &journal);

        bus.register_handler(EventKind::ObdConnected, &transient);
        bus.register_handler(EventKind::ObdConnected, &durable);
        drop(transient);

        bus.emit(EventKind::ObdConnected);

        assert_eq!(*journal.lock().unwrap(), vec!["durable"]);
        assert_eq!(bus.handler_count(EventKind::ObdConnected), 1);
    }

    #[test]
    fn duplicate_registration_fires_twice() {
        let bus = EventBus::new();
        let journal = Arc::new(Mutex::new(Vec::new()));

        let handler = Recorder::new("dup", &journal);
        bus.register_handler(EventKind::GpsDisconnected, &handler);
        bus.register_handler(EventKind::GpsDisconnected, &handler);

        bus.emit(EventKind::GpsDisconnected);

        assert_eq!(*journal.lock().unwrap(), vec!["dup", "dup"]);
    }

    #[test]
    fn handler_may_register_for_multiple_kinds() {
        let bus = EventBus::new();
        let journal = Arc::new(Mutex::new(Vec::new()));

        let handler = Recorder::new("both", &journal);
        bus.register_handler(EventKind::GpsConnected, &handler);
        bus.register_handler(EventKind::GpsDisconnected, &handler);

        bus.emit(EventKind::GpsConnected);
        bus.emit(EventKind::GpsDisconnected);

        assert_eq!(*journal.lock().unwrap(), vec!["both", "both"]);
    }

    #[test]
    fn emit_without_handlers_is_a_no_op() {
        let bus = EventBus::new();
        bus.emit(EventKind::ExitApplication);
        assert_eq!(bus.handler_count(EventKind::ExitApplication), 0);
    }

    #[test]
    fn buses_cloned_from_each_other_share_the_registry() {
        let bus = EventBus::new();
        let other = bus.clone();
        let journal = Arc::new(Mutex::new(Vec::new()));

        let handler = Recorder::new("shared", &journal);
        bus.register_handler(EventKind::ObdConnected, &handler);

        other.emit(EventKind::ObdConnected);

        assert_eq!(*journal.lock().unwrap(), vec!["shared"]);
    }
}
