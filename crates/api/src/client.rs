//! REST client for the coordination server endpoints.
//!
//! Wraps the server's HTTP API (client registration, task acquisition,
//! multipart artifact upload, failure reporting, heartbeat/progress
//! telemetry, input-image download) using [`reqwest`].

use std::path::Path;

use chrono::Utc;
use easel_core::task::TaskStatus;
use serde_json::Value;

use crate::metadata::{ClientMetadata, ServerAck};

/// Errors from the server API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Server error ({status}): {body}")]
    Status {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body did not decode as the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server acknowledged the request but refused it.
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// Reading or writing a local artifact failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP client for one coordination server.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    metadata: ClientMetadata,
}

impl ApiClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: &str, metadata: ClientMetadata) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            metadata,
        }
    }

    /// Identity and capability flags this client announces.
    pub fn metadata(&self) -> &ClientMetadata {
        &self.metadata
    }

    /// Register this client with the server (`PUT /register_client`).
    ///
    /// An error-status ack, an undecodable ack, or a transport failure
    /// all mean the worker must not start.
    pub async fn register(&self) -> Result<(), ApiError> {
        let response = self
            .client
            .put(format!("{}/register_client", self.base_url))
            .json(&self.metadata)
            .send()
            .await?;

        let ack = Self::parse_ack(response).await?;
        if ack.status == TaskStatus::Error.wire_code() {
            return Err(ApiError::Rejected(
                ack.message.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        Ok(())
    }

    /// Ask the server for a job (`PUT /process_task/{client_uid}`).
    ///
    /// Returns `Ok(Some(descriptor))` when the response carries a
    /// `task_id` key, `Ok(None)` for "no work", which includes empty,
    /// undecodable, and unexpectedly-shaped bodies. Only transport
    /// failures surface as errors.
    pub async fn request_task(&self) -> Result<Option<Value>, ApiError> {
        let response = self
            .client
            .put(format!(
                "{}/process_task/{}",
                self.base_url, self.metadata.client_uid
            ))
            .header("Cache-Control", "no-cache")
            .json(&self.metadata)
            .send()
            .await?;

        let body = response.text().await?;
        match serde_json::from_str::<Value>(&body) {
            Ok(value) if value.get("task_id").is_some() => Ok(Some(value)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::debug!(error = %e, body = %body, "Undecodable task response, treating as no work");
                Ok(None)
            }
        }
    }

    /// Upload a finished artifact
    /// (`POST /report_complete/{task_id}/{0|1}`).
    pub async fn report_complete(
        &self,
        task_id: i64,
        nsfw: bool,
        artifact: &Path,
    ) -> Result<(), ApiError> {
        let url = format!(
            "{}/report_complete/{}/{}",
            self.base_url,
            task_id,
            u8::from(nsfw)
        );
        self.upload_artifact(&url, artifact, "result.jpg").await
    }

    /// Upload a print-format artifact
    /// (`POST /report_print_complete/{task_id}`).
    pub async fn report_print_complete(&self, task_id: i64, artifact: &Path) -> Result<(), ApiError> {
        let url = format!("{}/report_print_complete/{}", self.base_url, task_id);
        self.upload_artifact(&url, artifact, "result.tiff").await
    }

    /// Report a task as failed (`PUT /report_failed/{task_id}`).
    /// Best-effort; the caller logs failures and never retries.
    pub async fn report_failed(&self, task_id: i64) -> Result<(), ApiError> {
        let response = self
            .client
            .put(format!("{}/report_failed/{}", self.base_url, task_id))
            .json(&self.metadata)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Liveness heartbeat (`GET /poll`) carrying overall progress.
    pub async fn poll(&self, progress: f64) -> Result<(), ApiError> {
        let mut body = serde_json::to_value(&self.metadata)
            .map_err(|e| ApiError::Protocol(e.to_string()))?;
        body["progress"] = Value::from(progress);
        body["timestamp"] = Value::from(Utc::now().to_rfc3339());

        let response = self
            .client
            .get(format!("{}/poll", self.base_url))
            .json(&body)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Per-task progress telemetry
    /// (`GET /progress_update/{task_id}`).
    pub async fn progress_update(&self, task_id: i64, progress: f64) -> Result<(), ApiError> {
        let response = self
            .client
            .get(format!("{}/progress_update/{}", self.base_url, task_id))
            .json(&serde_json::json!({ "progress": progress }))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Download a server-referenced image into a local scratch file.
    pub async fn download_file(&self, url: &str, dest: &Path) -> Result<(), ApiError> {
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }

    // ---- private helpers ----

    /// Read the artifact and send it as a multipart `file` part,
    /// requiring a done-status ack back.
    async fn upload_artifact(
        &self,
        url: &str,
        artifact: &Path,
        file_name: &str,
    ) -> Result<(), ApiError> {
        let bytes = tokio::fs::read(artifact).await?;
        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string()),
        );

        let response = self.client.post(url).multipart(form).send().await?;
        let ack = Self::parse_ack(response).await?;
        if ack.status != TaskStatus::Done.wire_code() {
            return Err(ApiError::Rejected(
                ack.message.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        Ok(())
    }

    /// Ensure a success status code. Returns the response unchanged on
    /// success, or [`ApiError::Status`] with the body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful response body into a [`ServerAck`].
    async fn parse_ack(response: reqwest::Response) -> Result<ServerAck, ApiError> {
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::Protocol(format!("undecodable ack: {e} (body: {body})")))
    }
}
