pub mod analytics_event;
pub mod inbound_message;
