//! Transport port
//!
//! The connection manager never talks to a socket library directly. It asks a
//! `Transport` to open a socket and receives the socket's lifecycle through
//! an `EventSink`, the same shape as browser-style open/close/error/message
//! callbacks. This keeps the state machine testable without a network.

use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::domain::errors::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    /// A UTF-8 text frame.
    Message(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Callback handle a transport uses to report events for one socket.
///
/// Each sink is bound to the socket it was created for; once that socket is
/// replaced or torn down, events emitted through the old sink are ignored.
#[derive(Clone)]
pub struct EventSink {
    emit: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new(emit: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.emit)(event)
    }

    pub fn opened(&self) {
        self.emit(TransportEvent::Opened)
    }

    pub fn message(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(text.into()))
    }

    pub fn closed(&self, code: Option<u16>, reason: impl Into<String>) {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.into(),
        })
    }

    pub fn error(&self, error: impl Into<String>) {
        self.emit(TransportEvent::Error(error.into()))
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// A live (or opening) socket owned by the connection manager.
pub trait Socket: Send {
    fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Idempotent. Implementations stop emitting events after close.
    fn close(&mut self);
}

pub trait Transport: Send + Sync {
    /// Start opening a socket to `url`. Returns immediately; the outcome is
    /// reported through `events` (`Opened`, then `Message`s, then `Closed` or
    /// `Error`).
    fn open(&self, url: &Url, events: EventSink) -> Result<Box<dyn Socket>, TransportError>;
}
