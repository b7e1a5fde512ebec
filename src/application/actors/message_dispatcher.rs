use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, warn};

use crate::domain::errors::ParseError;
use crate::domain::value_objects::inbound_message::InboundMessage;

pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

#[derive(Default)]
struct HandlerList {
    next_id: u64,
    handlers: Vec<(HandlerId, MessageHandler)>,
}

/// Result of delivering one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub delivered: usize,
    pub panicked: usize,
}

/// Fans inbound frames out to registered handlers.
///
/// Handlers run synchronously, in registration order, against a snapshot of
/// the list taken when dispatch starts. A handler may therefore add or remove
/// handlers (itself included) without affecting the delivery in progress.
#[derive(Clone, Default)]
pub struct MessageDispatcher {
    list: Arc<Mutex<HandlerList>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HandlerList> {
        self.list.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registering the same closure twice yields two independent
    /// registrations; it will be called twice per message.
    #[must_use = "the registration is the only way to remove the handler"]
    pub fn add_handler<F>(&self, handler: F) -> HandlerRegistration
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.add_shared_handler(Arc::new(handler))
    }

    #[must_use = "the registration is the only way to remove the handler"]
    pub fn add_shared_handler(&self, handler: MessageHandler) -> HandlerRegistration {
        let mut list = self.lock();
        let id = HandlerId(list.next_id);
        list.next_id += 1;
        list.handlers.push((id, handler));
        debug!("Registered message handler {:?} ({} total)", id, list.handlers.len());

        HandlerRegistration {
            id,
            list: Arc::downgrade(&self.list),
        }
    }

    pub fn handler_count(&self) -> usize {
        self.lock().handlers.len()
    }

    /// Parse a raw text frame and deliver it.
    ///
    /// A frame that fails to parse is logged and dropped; no handler runs.
    pub fn dispatch(&self, raw: &str) -> Result<(InboundMessage, DispatchReport), ParseError> {
        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping inbound frame: {}", e);
                return Err(e);
            }
        };

        let report = self.dispatch_message(&message);
        Ok((message, report))
    }

    pub fn dispatch_message(&self, message: &InboundMessage) -> DispatchReport {
        let snapshot: Vec<(HandlerId, MessageHandler)> = self.lock().handlers.clone();
        let mut report = DispatchReport::default();

        for (id, handler) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(()) => report.delivered += 1,
                Err(payload) => {
                    report.panicked += 1;
                    error!(
                        "Message handler {:?} panicked on '{}' message: {}",
                        id,
                        message.kind,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Proof of a handler registration.
///
/// Dropping it does NOT unregister the handler; call `remove`.
#[derive(Debug)]
pub struct HandlerRegistration {
    id: HandlerId,
    list: Weak<Mutex<HandlerList>>,
}

impl HandlerRegistration {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Removes exactly this registration. Returns `false` if the dispatcher
    /// is gone or the handler was already removed.
    pub fn remove(self) -> bool {
        let Some(list) = self.list.upgrade() else {
            return false;
        };
        let mut list = list.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = list.handlers.len();
        list.handlers.retain(|(id, _)| *id != self.id);
        let removed = list.handlers.len() != before;
        if removed {
            debug!("Removed message handler {:?}", self.id);
        }
        removed
    }
}
