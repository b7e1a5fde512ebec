//! Connection manager: one logical, self-healing connection to a server.
//!
//! The manager owns the state machine, the live socket, the reconnect and
//! heartbeat timers, and the handler list. Consumers only see `connect`,
//! `disconnect`, `send`, `add_message_handler` and the connected flag.
//!
//! Transport failures never reach callers. A close or error on the live
//! socket moves the machine to `Disconnected` and immediately schedules a
//! reconnect with capped exponential backoff, forever unless a bounded
//! `RetryPolicy` was configured.
//!
//! Requires a tokio runtime: timers are spawned tasks.

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::application::actors::message_dispatcher::{HandlerRegistration, MessageDispatcher};
use crate::config::LinkConfig;
use crate::domain::entities::connection_info::ConnectionInfo;
use crate::domain::entities::connection_state::{
    ConnectionState, ConnectionStateMachine, StateChangeEvent,
};
use crate::domain::errors::{ConnectionError, TransportError};
use crate::domain::repositories::transport::{EventSink, Socket, Transport, TransportEvent};
use crate::domain::value_objects::inbound_message::{InboundMessage, PING_TYPE, PONG_TYPE};

const STATE_CHANGE_CAPACITY: usize = 100;

/// Single-slot timer ownership. A slot is always cancelled before it is
/// replaced, and a firing timer only acts if its id still occupies the slot.
struct TimerSlot {
    id: u64,
    handle: JoinHandle<()>,
}

fn cancel_timer(slot: &mut Option<TimerSlot>) {
    if let Some(timer) = slot.take() {
        timer.handle.abort();
    }
}

struct ManagerState {
    machine: ConnectionStateMachine,
    info: ConnectionInfo,
    /// Cleared by teardown and abort; every async callback checks it.
    active: bool,
    /// Bumped whenever the current socket is abandoned. Events stamped with
    /// an older generation are ignored.
    generation: u64,
    socket: Option<Box<dyn Socket>>,
    reconnect_timer: Option<TimerSlot>,
    heartbeat_timer: Option<TimerSlot>,
    next_timer_id: u64,
}

impl ManagerState {
    fn next_timer_id(&mut self) -> u64 {
        self.next_timer_id += 1;
        self.next_timer_id
    }
}

struct Shared {
    config: LinkConfig,
    transport: Arc<dyn Transport>,
    dispatcher: MessageDispatcher,
    state: Mutex<ManagerState>,
    connected_tx: watch::Sender<bool>,
    state_change_tx: broadcast::Sender<StateChangeEvent>,
}

/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(config: LinkConfig, transport: Arc<dyn Transport>) -> Self {
        let info = ConnectionInfo::new(
            Some(config.url.to_string()),
            config.backoff.base_delay().as_millis() as u64,
            config.backoff.max_delay().as_millis() as u64,
        );
        let (connected_tx, _) = watch::channel(false);
        let (state_change_tx, _) = broadcast::channel(STATE_CHANGE_CAPACITY);

        let state = ManagerState {
            machine: ConnectionStateMachine::new(),
            info,
            active: false,
            generation: 0,
            socket: None,
            reconnect_timer: None,
            heartbeat_timer: None,
            next_timer_id: 0,
        };

        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                dispatcher: MessageDispatcher::new(),
                state: Mutex::new(state),
                connected_tx,
                state_change_tx,
            }),
        }
    }

    /// Open the connection. A no-op while a connection is opening or open.
    ///
    /// From `Reconnecting` the pending timer is cancelled and the attempt
    /// starts now; from `Failed` the retry cycle starts over.
    pub fn connect(&self) {
        self.shared.connect();
    }

    /// Teardown: cancel timers, close the socket, return to `Idle`.
    /// Registered handlers are kept. Safe to call repeatedly or before any
    /// connection was opened.
    pub fn disconnect(&self) {
        self.shared.teardown();
    }

    pub fn teardown(&self) {
        self.shared.teardown();
    }

    /// Give up: cancel timers, close the socket, enter `Failed`.
    pub fn abort_retries(&self) {
        self.shared.abort_retries();
    }

    pub fn send<T: Serialize>(&self, payload: &T) -> Result<(), ConnectionError> {
        let text = serde_json::to_string(payload)?;
        self.shared.send_text(text)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.shared.send_text(text.into())
    }

    #[must_use = "the registration is the only way to remove the handler"]
    pub fn add_message_handler<F>(&self, handler: F) -> HandlerRegistration
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.shared.dispatcher.add_handler(handler)
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.shared.dispatcher
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected_tx.borrow()
    }

    /// Reactive view of `is_connected`.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.shared.connected_tx.subscribe()
    }

    pub fn subscribe_state_changes(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.shared.state_change_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().machine.state()
    }

    pub fn info(&self) -> ConnectionInfo {
        self.shared.lock().info.clone()
    }

    pub fn url(&self) -> &Url {
        &self.shared.config.url
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, st: &mut ManagerState, next: ConnectionState, reason: &str) {
        match st.machine.transition(next, reason) {
            Ok(event) => {
                info!(
                    "Connection to {}: {} -> {} ({})",
                    self.config.url, event.from_state, event.to_state, reason
                );
                st.info.state = next;
                self.connected_tx.send_if_modified(|connected| {
                    let changed = *connected != next.is_connected();
                    *connected = next.is_connected();
                    changed
                });
                let _ = self.state_change_tx.send(event);
            }
            Err(e) => warn!("{}", e),
        }
    }

    fn event_sink(self: &Arc<Self>, generation: u64) -> EventSink {
        let weak: Weak<Shared> = Arc::downgrade(self);
        EventSink::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_event(generation, event);
            }
        })
    }

    fn connect(self: &Arc<Self>) {
        let generation = {
            let mut st = self.lock();
            let state = st.machine.state();
            if state.is_in_flight() {
                debug!("connect() ignored: connection already {}", state);
                return;
            }
            if state == ConnectionState::Failed {
                st.info.reconnect_attempts = 0;
                st.info.reconnect_delay_ms = self.config.backoff.base_delay().as_millis() as u64;
            }
            st.active = true;
            cancel_timer(&mut st.reconnect_timer);
            self.begin_attempt(&mut st, "connect requested")
        };
        self.open_socket(generation);
    }

    fn begin_attempt(&self, st: &mut ManagerState, reason: &str) -> u64 {
        st.generation += 1;
        self.transition(st, ConnectionState::Connecting, reason);
        st.generation
    }

    /// Called without the state lock held, so a transport may report events
    /// from inside `open`.
    fn open_socket(self: &Arc<Self>, generation: u64) {
        let sink = self.event_sink(generation);
        match self.transport.open(&self.config.url, sink) {
            Ok(mut socket) => {
                let mut st = self.lock();
                if st.generation == generation && st.active {
                    st.socket = Some(socket);
                } else {
                    drop(st);
                    debug!("Discarding socket for abandoned attempt {}", generation);
                    socket.close();
                }
            }
            Err(e) => {
                warn!("Failed to open transport to {}: {}", self.config.url, e);
                self.handle_transport_down(generation, &e.to_string());
            }
        }
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.handle_opened(generation),
            TransportEvent::Message(text) => self.handle_message(generation, text),
            TransportEvent::Closed { code, reason } => {
                let reason = match code {
                    Some(code) => format!("closed with code {}: {}", code, reason),
                    None => format!("closed: {}", reason),
                };
                self.handle_transport_down(generation, &reason);
            }
            TransportEvent::Error(e) => {
                self.handle_transport_down(generation, &format!("transport error: {}", e));
            }
        }
    }

    fn is_current(st: &ManagerState, generation: u64) -> bool {
        st.active && st.generation == generation
    }

    fn handle_opened(self: &Arc<Self>, generation: u64) {
        let mut st = self.lock();
        if !Self::is_current(&st, generation) {
            debug!("Ignoring open event from stale socket {}", generation);
            return;
        }
        if st.machine.state() != ConnectionState::Connecting {
            return;
        }

        self.transition(&mut st, ConnectionState::Connected, "transport opened");
        st.info.reconnect_attempts = 0;
        st.info.reconnect_delay_ms = self.config.backoff.base_delay().as_millis() as u64;
        st.info.statistics.reset(Utc::now());
        self.start_heartbeat(&mut st, generation);
    }

    fn handle_message(self: &Arc<Self>, generation: u64, text: String) {
        {
            let mut st = self.lock();
            if !Self::is_current(&st, generation) {
                debug!("Ignoring frame from stale socket {}", generation);
                return;
            }
            st.info.statistics.record_received(text.len(), Utc::now());
        }
        debug!("Received frame ({} bytes)", text.len());

        // Handlers run without the lock so they may call back into the manager.
        let Ok((message, _)) = self.dispatcher.dispatch(&text) else {
            return;
        };

        if message.is(PONG_TYPE) {
            let mut st = self.lock();
            if st.generation == generation {
                st.info.statistics.record_pong(Utc::now());
            }
        }
    }

    fn handle_transport_down(self: &Arc<Self>, generation: u64, reason: &str) {
        let stale_socket = {
            let mut st = self.lock();
            if !Self::is_current(&st, generation) {
                debug!("Ignoring '{}' from stale socket {}", reason, generation);
                return;
            }
            if !st.machine.state().is_in_flight() {
                return;
            }

            // Detach: anything the old socket still emits is now stale.
            st.generation += 1;
            cancel_timer(&mut st.heartbeat_timer);
            let socket = st.socket.take();
            warn!("Connection to {} lost: {}", self.config.url, reason);
            self.transition(&mut st, ConnectionState::Disconnected, reason);
            self.schedule_reconnect(&mut st);
            socket
        };

        if let Some(mut socket) = stale_socket {
            socket.close();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, st: &mut ManagerState) {
        let attempt = st.info.reconnect_attempts;
        if !self.config.retry_policy.allows(attempt) {
            error!(
                "Giving up on {} after {} reconnect attempts",
                self.config.url, attempt
            );
            self.transition(st, ConnectionState::Failed, "retry limit reached");
            return;
        }

        let delay = self.config.backoff.next_delay(attempt);
        st.info.reconnect_attempts = attempt + 1;
        st.info.reconnect_delay_ms = delay.as_millis() as u64;
        self.transition(
            st,
            ConnectionState::Reconnecting,
            &format!("retry in {}ms", delay.as_millis()),
        );
        info!(
            "Reconnecting to {} in {}ms (attempt {})",
            self.config.url,
            delay.as_millis(),
            attempt + 1
        );

        let timer_id = st.next_timer_id();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.on_reconnect_due(timer_id);
            }
        });
        cancel_timer(&mut st.reconnect_timer);
        st.reconnect_timer = Some(TimerSlot {
            id: timer_id,
            handle,
        });
    }

    fn on_reconnect_due(self: &Arc<Self>, timer_id: u64) {
        let generation = {
            let mut st = self.lock();
            match &st.reconnect_timer {
                Some(slot) if slot.id == timer_id => {}
                _ => {
                    debug!("Ignoring superseded reconnect timer {}", timer_id);
                    return;
                }
            }
            // Our own slot: release without aborting the running task.
            st.reconnect_timer = None;
            if !st.active || st.machine.state() != ConnectionState::Reconnecting {
                return;
            }
            self.begin_attempt(&mut st, "reconnect timer fired")
        };
        self.open_socket(generation);
    }

    fn start_heartbeat(self: &Arc<Self>, st: &mut ManagerState, generation: u64) {
        let Some(interval) = self.config.heartbeat_interval else {
            return;
        };

        let timer_id = st.next_timer_id();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if !shared.send_ping(generation) {
                    break;
                }
            }
        });
        cancel_timer(&mut st.heartbeat_timer);
        st.heartbeat_timer = Some(TimerSlot {
            id: timer_id,
            handle,
        });
    }

    fn send_ping(&self, generation: u64) -> bool {
        let mut st = self.lock();
        if !Self::is_current(&st, generation) || !st.machine.state().is_connected() {
            return false;
        }
        let Ok(ping) = serde_json::to_string(&InboundMessage::new(PING_TYPE)) else {
            return false;
        };
        let bytes = ping.len();
        let Some(socket) = st.socket.as_mut() else {
            return true;
        };
        match socket.send_text(ping) {
            Ok(()) => {
                let now = Utc::now();
                st.info.statistics.record_sent(bytes, now);
                st.info.statistics.record_ping(now);
                debug!("Heartbeat ping sent");
                true
            }
            Err(e) => {
                warn!("Heartbeat ping failed: {}", e);
                true
            }
        }
    }

    fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        let mut st = self.lock();
        let state = st.machine.state();
        if !state.is_connected() {
            return Err(ConnectionError::NotConnected(state));
        }
        let bytes = text.len();
        let socket = st
            .socket
            .as_mut()
            .ok_or(ConnectionError::Transport(TransportError::Closed))?;
        socket.send_text(text)?;
        st.info.statistics.record_sent(bytes, Utc::now());
        debug!("Sent frame ({} bytes)", bytes);
        Ok(())
    }

    fn teardown(&self) {
        let socket = {
            let mut st = self.lock();
            st.active = false;
            st.generation += 1;
            cancel_timer(&mut st.reconnect_timer);
            cancel_timer(&mut st.heartbeat_timer);
            if st.machine.state() != ConnectionState::Idle {
                self.transition(&mut st, ConnectionState::Idle, "teardown");
            }
            st.socket.take()
        };

        if let Some(mut socket) = socket {
            socket.close();
        }
    }

    fn abort_retries(&self) {
        let socket = {
            let mut st = self.lock();
            st.active = false;
            st.generation += 1;
            cancel_timer(&mut st.reconnect_timer);
            cancel_timer(&mut st.heartbeat_timer);
            let state = st.machine.state();
            if state != ConnectionState::Idle && state != ConnectionState::Failed {
                warn!("Aborting connection to {} from {}", self.config.url, state);
                self.transition(&mut st, ConnectionState::Failed, "retries aborted");
            }
            st.socket.take()
        };

        if let Some(mut socket) = socket {
            socket.close();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let st = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cancel_timer(&mut st.reconnect_timer);
        cancel_timer(&mut st.heartbeat_timer);
        if let Some(mut socket) = st.socket.take() {
            socket.close();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.shared.config.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}
