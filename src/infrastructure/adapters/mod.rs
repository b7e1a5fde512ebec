pub mod tungstenite_transport;
