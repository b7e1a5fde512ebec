//! RelayKit
//!
//! A self-healing WebSocket connection manager: one logical connection with
//! automatic reconnect, fan-out of inbound messages to registered handlers,
//! and a debounced batching queue for outbound analytics events.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::actors::{ConnectionManager, EventCollector, HandlerRegistration};
pub use config::{BatchConfig, LinkConfig};
pub use domain::entities::connection_state::ConnectionState;
