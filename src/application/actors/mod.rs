pub mod connection_manager;
pub mod event_collector;
pub mod message_dispatcher;

#[cfg(test)]
pub mod tests;

pub use connection_manager::ConnectionManager;
pub use event_collector::EventCollector;
pub use message_dispatcher::{DispatchReport, HandlerId, HandlerRegistration, MessageDispatcher};
