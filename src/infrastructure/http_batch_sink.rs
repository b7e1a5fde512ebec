use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::domain::errors::BatchSendError;
use crate::domain::repositories::batch_sink::BatchSink;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts each batch to an HTTP endpoint as a JSON array.
#[derive(Debug, Clone)]
pub struct HttpBatchSink {
    client: Client,
    endpoint: Url,
}

impl HttpBatchSink {
    pub fn new(endpoint: Url) -> Result<Self, BatchSendError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BatchSendError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl<E> BatchSink<E> for HttpBatchSink
where
    E: Serialize + Send + Sync + 'static,
{
    async fn send_batch(&self, batch: Vec<E>) -> Result<(), BatchSendError> {
        let body = serde_json::to_vec(&batch)
            .map_err(|e| BatchSendError::Serialization(e.to_string()))?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| BatchSendError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BatchSendError::Rejected {
                status: response.status().as_u16(),
            });
        }

        debug!("Posted {} events to {}", batch.len(), self.endpoint);
        Ok(())
    }
}
