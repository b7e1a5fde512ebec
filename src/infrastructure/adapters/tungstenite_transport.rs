use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};
use url::Url;

use crate::config::LinkConfig;
use crate::domain::errors::TransportError;
use crate::domain::repositories::transport::{EventSink, Socket, Transport};

/// `Transport` backed by tokio-tungstenite.
///
/// Each socket is one spawned task that performs the handshake, then pumps
/// inbound frames into the event sink and outbound frames onto the wire.
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    connect_timeout: Duration,
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new(LinkConfig::DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TungsteniteTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.connect_timeout)
    }
}

impl Transport for TungsteniteTransport {
    fn open(&self, url: &Url, events: EventSink) -> Result<Box<dyn Socket>, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::OpenFailed(format!("no tokio runtime: {}", e)))?;

        let closed = Arc::new(AtomicBool::new(false));
        let opened = Arc::new(AtomicBool::new(false));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let guarded = {
            let closed = closed.clone();
            EventSink::new(move |event| {
                if !closed.load(Ordering::SeqCst) {
                    events.emit(event);
                }
            })
        };

        let task = runtime.spawn(run_socket(
            url.clone(),
            self.connect_timeout,
            guarded,
            opened.clone(),
            outbound_rx,
        ));

        Ok(Box::new(TungsteniteSocket {
            outbound: Some(outbound_tx),
            closed,
            opened,
            task,
        }))
    }
}

async fn run_socket(
    url: Url,
    connect_timeout: Duration,
    events: EventSink,
    opened: Arc<AtomicBool>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    debug!("Opening WebSocket to {}", url);
    let ws_stream = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(e)) => {
            events.error(format!("Failed to connect to {}: {}", url, e));
            return;
        }
        Err(_) => {
            events.error(format!("Connection timeout after {:?}", connect_timeout));
            return;
        }
    };

    opened.store(true, Ordering::SeqCst);
    events.opened();
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let message = message.unwrap_or(Message::Close(None));
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    events.error(format!("WebSocket write failed: {}", e));
                    return;
                }
                if closing {
                    return;
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => events.message(text),
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring binary frame ({} bytes)", data.len());
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    events.closed(code, reason);
                    return;
                }
                Some(Err(e)) => {
                    warn!("WebSocket error on {}: {}", url, e);
                    events.error(e.to_string());
                    return;
                }
                None => {
                    events.closed(None, "stream ended");
                    return;
                }
            }
        }
    }
}

struct TungsteniteSocket {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    closed: Arc<AtomicBool>,
    opened: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Socket for TungsteniteSocket {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound
            .send(Message::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    /// Queues a close frame; the socket task writes it and exits. A socket
    /// still handshaking is abandoned outright.
    fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let outbound = self.outbound.take();
        if !self.opened.load(Ordering::SeqCst) {
            self.task.abort();
            return;
        }
        match outbound {
            Some(outbound) if outbound.send(Message::Close(None)).is_ok() => {}
            _ => self.task.abort(),
        }
    }
}

impl Drop for TungsteniteSocket {
    fn drop(&mut self) {
        self.close();
    }
}
