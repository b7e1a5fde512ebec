pub mod batch_sink;
pub mod transport;
