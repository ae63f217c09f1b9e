//! Executor API client.

use std::time::Duration;

use async_trait::async_trait;
use cell_models::executor::{
    AllocationFailure, AllocationRequest, Container, Event, ExecutorResources,
};
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{EventSource, ExecutorClient, ExecutorError};

/// Executor client speaking JSON over HTTP.
pub struct HttpExecutorClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExecutorClient {
    /// Create a new executor client.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExecutorError> {
        let url = self.url(path);
        debug!(url = %url, "Executor request");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExecutorError::Request(e.to_string()))?;

        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ExecutorError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ExecutorError::Status {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| ExecutorError::Decode(e.to_string()))
}

#[async_trait]
impl ExecutorClient for HttpExecutorClient {
    async fn list_containers(&self) -> Result<Vec<Container>, ExecutorError> {
        self.get_json("/v1/containers").await
    }

    async fn get_container(&self, guid: &str) -> Result<Container, ExecutorError> {
        let url = self.url(&format!("/v1/containers/{guid}"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExecutorError::Request(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ExecutorError::ContainerNotFound(guid.to_string()));
        }
        decode(response).await
    }

    async fn allocate_containers(
        &self,
        requests: Vec<AllocationRequest>,
    ) -> Result<Vec<AllocationFailure>, ExecutorError> {
        let url = self.url("/v1/containers");
        debug!(count = requests.len(), "Allocating containers");

        let response = self
            .client
            .post(&url)
            .json(&requests)
            .send()
            .await
            .map_err(|e| ExecutorError::Request(e.to_string()))?;

        decode(response).await
    }

    async fn total_resources(&self) -> Result<ExecutorResources, ExecutorError> {
        self.get_json("/v1/resources/total").await
    }

    async fn remaining_resources(&self) -> Result<ExecutorResources, ExecutorError> {
        self.get_json("/v1/resources/remaining").await
    }

    async fn volume_drivers(&self) -> Result<Vec<String>, ExecutorError> {
        self.get_json("/v1/volume_drivers").await
    }

    async fn healthy(&self) -> bool {
        match self
            .client
            .get(self.url("/v1/ping"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Executor health check failed");
                false
            }
        }
    }

    async fn subscribe_to_events(&self) -> Result<Box<dyn EventSource>, ExecutorError> {
        // The shared client timeout would cut a long-lived stream short.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ExecutorError::Request(e.to_string()))?;

        let response = client
            .get(self.url("/v1/events"))
            .send()
            .await
            .map_err(|e| ExecutorError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();

        Ok(Box::new(HttpEventSource {
            stream: Some(stream),
            buffer: Vec::new(),
        }))
    }
}

/// Longest event line accepted before the stream is abandoned.
const MAX_EVENT_LINE_BYTES: usize = 1024 * 1024;

/// Newline-delimited JSON events read from a streaming response.
pub struct HttpEventSource {
    stream: Option<BoxStream<'static, reqwest::Result<Vec<u8>>>>,
    buffer: Vec<u8>,
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn next(&mut self) -> Result<Event, ExecutorError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let line = line.trim_ascii();
                if line.is_empty() {
                    continue;
                }
                return serde_json::from_slice(line)
                    .map_err(|e| ExecutorError::Decode(e.to_string()));
            }

            if self.buffer.len() > MAX_EVENT_LINE_BYTES {
                self.close();
                return Err(ExecutorError::Decode(format!(
                    "event line exceeds {MAX_EVENT_LINE_BYTES} bytes"
                )));
            }

            let stream = self.stream.as_mut().ok_or(ExecutorError::StreamClosed)?;
            match stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(ExecutorError::Request(e.to_string()));
                }
                None => {
                    self.stream = None;
                    return Err(ExecutorError::StreamClosed);
                }
            }
        }
    }

    fn close(&mut self) {
        self.stream = None;
        self.buffer.clear();
    }
}
