//! Status event publishing.
//!
//! The staging job announces a staged chunk with exactly one status event.
//! Publishing is the last step of the pipeline and its failure fails the
//! whole job: data that was loaded but never announced is invisible to the
//! tracker, so the job must be retried from the top.

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use chunkflow_common::types::StatusEvent;

use crate::error::StageError;

/// Seam to the message bus's publish API.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, event: &StatusEvent) -> Result<(), StageError>;
}

/// HTTP publisher POSTing the event JSON to the bus.
pub struct HttpStatusPublisher {
    client: reqwest::Client,
    publish_url: String,
}

impl HttpStatusPublisher {
    pub fn new(publish_url: impl Into<String>, timeout_secs: u64) -> Result<Self, StageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StageError::Publish(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            publish_url: publish_url.into(),
        })
    }
}

#[async_trait]
impl StatusPublisher for HttpStatusPublisher {
    async fn publish(&self, event: &StatusEvent) -> Result<(), StageError> {
        let response = self
            .client
            .post(&self.publish_url)
            .json(event)
            .send()
            .await
            .map_err(|e| StageError::Publish(format!("Publish request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::Publish(format!(
                "Publish endpoint returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        info!(
            chunk_id = event.apdb_replica_chunk,
            operation = %event.operation,
            "Published chunk status event"
        );

        Ok(())
    }
}
