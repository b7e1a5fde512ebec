// Actor tests run against in-memory collaborators; no sockets, no HTTP.

pub mod recording_sink;

pub use mock_transport::{MockSocket, MockTransport};
pub use recording_sink::RecordingSink;
