//! Destination that POSTs message JSON to an HTTP endpoint.

use async_trait::async_trait;
use courier_core::{Context, Destination, Message};
use reqwest::header::CONTENT_TYPE;

/// Delivers batches as `POST {endpoint}` with a JSON body.
///
/// A single-message batch is sent as one message object, larger batches as
/// a JSON array. Any 2xx response counts as delivered; everything else is
/// an error for the bridge to retry.
pub struct HttpDestination {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpDestination {
    /// Creates a destination with a default client.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), client: reqwest::Client::new() }
    }

    /// Creates a destination with a caller-configured client.
    pub fn with_client(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self { endpoint: endpoint.into(), client }
    }
}

#[async_trait]
impl Destination for HttpDestination {
    async fn deliver(&self, _cx: &Context, batch: &[Message]) -> anyhow::Result<()> {
        let body = match batch {
            [message] => serde_json::to_vec(message)?,
            _ => serde_json::to_vec(batch)?,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("endpoint returned a {} status", status.as_u16());
        }
        Ok(())
    }
}
