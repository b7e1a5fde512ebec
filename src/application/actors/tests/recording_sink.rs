use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::errors::BatchSendError;
use crate::domain::repositories::batch_sink::BatchSink;

/// In-memory `BatchSink` that records every batch it is handed, including
/// the ones it rejects.
pub struct RecordingSink<E> {
    batches: Mutex<Vec<Vec<E>>>,
    latency: Duration,
    failing: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl<E: Clone> RecordingSink<E> {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Each send takes `latency` of (tokio) time before completing.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            latency,
            failing: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<E>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E> BatchSink<E> for RecordingSink<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn send_batch(&self, batch: Vec<E>) -> Result<(), BatchSendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.batches.lock().unwrap().push(batch);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(BatchSendError::Rejected { status: 503 })
        } else {
            Ok(())
        }
    }
}
