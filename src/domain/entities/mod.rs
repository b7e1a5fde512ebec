pub mod connection_info;
pub mod connection_state;
