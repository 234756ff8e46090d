//! HTTP client abstraction used by the catalog resolver and the downloader.

use crate::config::FleetConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::pin::Pin;

/// Stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Minimal HTTP surface the artifact layer needs.
///
/// Implementations must map non-success statuses to [`Error::HttpStatus`] and
/// transport failures to [`Error::Network`], so the resolver can tell a
/// missing version (404) from a connectivity problem.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET `url` and return the body as text.
    async fn get_text(&self, url: &str) -> Result<String>;

    /// GET `url` and return the body as a stream of chunks.
    async fn get_stream(&self, url: &str) -> Result<ByteStream>;
}

/// GET `url` and decode the body as JSON.
pub async fn fetch_json<T: DeserializeOwned>(client: &dyn HttpClient, url: &str) -> Result<T> {
    let body = client.get_text(url).await?;
    serde_json::from_str(&body).map_err(|e| {
        tracing::error!(url = %url, error = %e, "Failed to decode catalog response");
        Error::Serialization(format!("Invalid response from {}: {}", url, e))
    })
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Build a client with the timeout and user agent from `config`.
    pub fn new(config: &FleetConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.client.get(url).send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "HTTP request failed");
            Error::Network(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url = %url, status = %status, "Non-success HTTP status");
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.send(url).await?;
        response.text().await.map_err(Error::from)
    }

    async fn get_stream(&self, url: &str) -> Result<ByteStream> {
        let response = self.send(url).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from));
        Ok(Box::pin(stream))
    }
}
