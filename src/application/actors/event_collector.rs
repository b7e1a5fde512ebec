//! Outbound batching queue.
//!
//! Events are buffered and shipped to a `BatchSink` either when the buffer
//! reaches `max_batch_size` or once `flush_interval` has elapsed since the
//! first event of the window. Collecting more events does not push the
//! window out. At most one batch is in flight and no batch exceeds
//! `max_batch_size`; a failed batch is logged and dropped, never re-queued.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BatchConfig;
use crate::domain::repositories::batch_sink::BatchSink;

struct FlushTimer {
    id: u64,
    handle: JoinHandle<()>,
}

struct CollectorState<E> {
    pending: Vec<E>,
    flushing: bool,
    closed: bool,
    timer: Option<FlushTimer>,
    next_timer_id: u64,
}

struct CollectorShared<E>
where
    E: Send + 'static,
{
    config: BatchConfig,
    sink: Arc<dyn BatchSink<E>>,
    state: Mutex<CollectorState<E>>,
}

pub struct EventCollector<E>
where
    E: Send + 'static,
{
    shared: Arc<CollectorShared<E>>,
}

impl<E> Clone for EventCollector<E>
where
    E: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<E> EventCollector<E>
where
    E: Send + 'static,
{
    pub fn new(config: BatchConfig, sink: Arc<dyn BatchSink<E>>) -> Self {
        Self {
            shared: Arc::new(CollectorShared {
                config,
                sink,
                state: Mutex::new(CollectorState {
                    pending: Vec::new(),
                    flushing: false,
                    closed: false,
                    timer: None,
                    next_timer_id: 0,
                }),
            }),
        }
    }

    /// Queue an event. Never blocks and never fails.
    ///
    /// Must be called within a tokio runtime.
    pub fn collect(&self, event: E) {
        self.shared.collect(event);
    }

    /// Ship whatever is pending now. Returns immediately if a flush is
    /// already running or nothing is pending.
    pub async fn flush(&self) {
        self.shared.flush().await;
    }

    /// Stop the debounce timer and make a final best-effort flush.
    ///
    /// Events collected afterwards are discarded. Awaiting the returned
    /// handle is optional.
    pub fn shutdown(&self) -> JoinHandle<()> {
        let pending = {
            let mut st = self.shared.lock();
            st.closed = true;
            if let Some(timer) = st.timer.take() {
                timer.handle.abort();
            }
            st.pending.len()
        };
        info!("Event collector shutting down with {} pending events", pending);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.flush().await;
        })
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_flushing(&self) -> bool {
        self.shared.lock().flushing
    }
}

impl<E> CollectorShared<E>
where
    E: Send + 'static,
{
    fn lock(&self) -> MutexGuard<'_, CollectorState<E>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn collect(self: &Arc<Self>, event: E) {
        let mut st = self.lock();
        if st.closed {
            debug!("Event collector is shut down; discarding event");
            return;
        }

        st.pending.push(event);
        if st.pending.len() >= self.config.max_batch_size {
            // A running flush keeps draining full chunks on its own.
            if st.flushing {
                return;
            }
            if let Some(timer) = st.timer.take() {
                timer.handle.abort();
            }
            drop(st);
            debug!("Batch size reached, flushing");
            let shared = self.clone();
            tokio::spawn(async move {
                shared.flush().await;
            });
        } else if st.timer.is_none() {
            self.schedule_flush(&mut st);
        }
    }

    fn schedule_flush(self: &Arc<Self>, st: &mut CollectorState<E>) {
        st.next_timer_id += 1;
        let id = st.next_timer_id;
        let interval = self.config.flush_interval;
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            {
                let mut st = shared.lock();
                match &st.timer {
                    Some(timer) if timer.id == id => st.timer = None,
                    _ => return,
                }
            }
            shared.flush().await;
        });
        st.timer = Some(FlushTimer { id, handle });
    }

    async fn flush(self: &Arc<Self>) {
        loop {
            let batch = {
                let mut st = self.lock();
                if st.flushing || st.pending.is_empty() {
                    return;
                }
                st.flushing = true;
                if let Some(timer) = st.timer.take() {
                    timer.handle.abort();
                }
                let take = st.pending.len().min(self.config.max_batch_size);
                st.pending.drain(..take).collect::<Vec<E>>()
            };

            let count = batch.len();
            match self.sink.send_batch(batch).await {
                Ok(()) => debug!("Shipped batch of {} events", count),
                Err(e) => warn!("Dropping batch of {} events: {}", count, e),
            }

            let mut st = self.lock();
            st.flushing = false;
            if st.pending.len() >= self.config.max_batch_size {
                continue;
            }
            if !st.pending.is_empty() && !st.closed && st.timer.is_none() {
                self.schedule_flush(&mut st);
            }
            if st.closed && !st.pending.is_empty() {
                continue;
            }
            return;
        }
    }
}

impl<E> Drop for CollectorShared<E>
where
    E: Send + 'static,
{
    fn drop(&mut self) {
        let st = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(timer) = st.timer.take() {
            timer.handle.abort();
        }
        if !st.pending.is_empty() {
            warn!("Event collector dropped with {} unsent events", st.pending.len());
        }
    }
}
