//! Transport to the generation backend.
//!
//! [`GenerationBackend`] is the seam the stage controller talks to: one `POST`
//! per stage returning a stream of raw byte fragments. [`HttpBackend`] is the
//! `reqwest` implementation; tests substitute scripted streams.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::GenerationError;
use crate::protocol::Endpoint;

/// Response body as it arrives: byte fragments on arbitrary boundaries.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, GenerationError>> + Send>>;

pub trait GenerationBackend: Send + Sync {
    /// Issue the request for `endpoint` and return the response stream once
    /// the backend has accepted it with a success status.
    fn open(
        &self,
        endpoint: Endpoint,
        body: serde_json::Value,
    ) -> impl Future<Output = Result<FragmentStream, GenerationError>> + Send;
}

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, GenerationError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }
}

impl GenerationBackend for HttpBackend {
    fn open(
        &self,
        endpoint: Endpoint,
        body: serde_json::Value,
    ) -> impl Future<Output = Result<FragmentStream, GenerationError>> + Send {
        let url = self.config.url(endpoint);
        let request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body);

        async move {
            debug!(%url, "opening generation stream");
            let response = request.send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!(%url, status = status.as_u16(), "backend rejected request");
                return Err(GenerationError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let stream = response.bytes_stream().map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| GenerationError::Read(e.to_string()))
            });
            Ok(Box::pin(stream) as FragmentStream)
        }
    }
}
