//! Remote document-store collaborator.
//!
//! The sync engine replays queued operations against this interface. The
//! production implementation speaks JSON over HTTPS to an aulasync-server
//! style document API; tests substitute an in-memory double.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use crate::config::SyncConfig;

/// Errors that can occur talking to the remote document store.
#[derive(Debug)]
pub enum RemoteError {
    /// Sync is not configured
    NotConfigured,
    /// Server could not be reached at all
    Unreachable(String),
    /// Request exceeded the per-operation timeout
    Timeout,
    /// Server answered with an error status
    Rejected { status: u16, message: String },
    /// Request could not be built
    Invalid(String),
}

impl RemoteError {
    /// True when the whole batch should stop: the server is not reachable,
    /// so every remaining operation would fail the same way.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_))
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::NotConfigured => {
                write!(f, "Sync not configured. Add server_url and api_key to config.")
            }
            RemoteError::Unreachable(e) => write!(f, "Server unreachable: {}", e),
            RemoteError::Timeout => write!(f, "Request timed out"),
            RemoteError::Rejected { status, message } => {
                if message.is_empty() {
                    write!(f, "Server rejected request (HTTP {})", status)
                } else {
                    write!(f, "Server rejected request (HTTP {}): {}", status, message)
                }
            }
            RemoteError::Invalid(e) => write!(f, "Invalid request: {}", e),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Document-oriented remote store, addressed by collection and document id.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), RemoteError>;

    /// Full document write; replaces any existing body.
    async fn put_document(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<(), RemoteError>;

    /// Field-level merge into an existing document; creates it when missing.
    async fn merge_document(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<(), RemoteError>;

    /// Idempotent delete; removing a missing document succeeds.
    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError>;
}

/// HTTP client for the document API exposed by aulasync-server.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRemoteStore {
    /// Creates a remote store from config.
    ///
    /// Returns an error if sync is not configured.
    pub fn from_config(config: &SyncConfig) -> Result<Self, RemoteError> {
        let server_url = config
            .server_url
            .clone()
            .ok_or(RemoteError::NotConfigured)?;
        let api_key = config.api_key.clone().ok_or(RemoteError::NotConfigured)?;

        Self::new(
            server_url,
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Creates a remote store with explicit parameters. `timeout` bounds each
    /// request; expiry is reported as a per-operation failure, not as the
    /// server being unreachable.
    pub fn new(
        server_url: String,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Invalid(e.to_string()))?;

        Ok(Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/collections/{}/documents/{}",
            self.base_url, collection, id
        )
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), RemoteError> {
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Rejected { status, message })
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn ping(&self) -> Result<(), RemoteError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(transport_error)?;

        Self::expect_success(response).await
    }

    async fn put_document(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<(), RemoteError> {
        let response = self
            .client
            .put(self.document_url(collection, id))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        Self::expect_success(response).await
    }

    async fn merge_document(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<(), RemoteError> {
        let response = self
            .client
            .patch(self.document_url(collection, id))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        Self::expect_success(response).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.document_url(collection, id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        // The document may already be gone; deletes are idempotent
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        Self::expect_success(response).await
    }
}
