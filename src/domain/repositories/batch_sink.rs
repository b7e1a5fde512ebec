use async_trait::async_trait;

use crate::domain::errors::BatchSendError;

/// Outbound collaborator for the `EventCollector`.
///
/// A failed send is final: the collector logs it and drops the batch.
#[async_trait]
pub trait BatchSink<E>: Send + Sync
where
    E: Send + 'static,
{
    async fn send_batch(&self, batch: Vec<E>) -> Result<(), BatchSendError>;
}
