pub mod adapters;
pub mod http_batch_sink;

pub use adapters::tungstenite_transport::TungsteniteTransport;
pub use http_batch_sink::HttpBatchSink;
