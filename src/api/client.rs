//! REST client for the launcher backend with connection pooling.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::InstanceBackend;
use crate::error::{ApiError, ErrorPayload};
use crate::models::{CreateRequest, Credentials, InstanceDetails, InstanceRequest, VmStatus};

const CREATE_PATH: &str = "/ec2/create-vm";
const STOP_PATH: &str = "/ec2/stop-instance";
const STATUS_PATH: &str = "/ec2/check-status";

/// Launcher backend client with a persistent connection pool.
#[derive(Clone)]
pub struct Ec2Client {
    client: Client,
    base_url: String,
}

impl Ec2Client {
    /// Create a new client for the backend at `base_url`.
    ///
    /// Requests never time out unless `timeout` is given.
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().pool_max_idle_per_host(5);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body and decode the JSON response.
    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Sending backend request");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ApiError::Transport {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "Backend request failed");
            return Err(classify_failure(&url, status, &text));
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Decode {
            url,
            status: status.as_u16(),
            reason: format!("{} | Raw: {}", e, truncate(&text, 300)),
        })
    }
}

impl InstanceBackend for Ec2Client {
    async fn create_instance(
        &self,
        credentials: &Credentials,
    ) -> Result<InstanceDetails, ApiError> {
        let body = CreateRequest {
            client_id: &credentials.client_id,
            client_secret: &credentials.client_secret,
        };
        self.post(CREATE_PATH, &body).await
    }

    async fn stop_instance(
        &self,
        credentials: &Credentials,
        instance_id: &str,
    ) -> Result<VmStatus, ApiError> {
        let body = InstanceRequest {
            client_id: &credentials.client_id,
            client_secret: &credentials.client_secret,
            instance_id,
        };
        self.post(STOP_PATH, &body).await
    }

    async fn check_status(
        &self,
        credentials: &Credentials,
        instance_id: &str,
    ) -> Result<VmStatus, ApiError> {
        let body = InstanceRequest {
            client_id: &credentials.client_id,
            client_secret: &credentials.client_secret,
            instance_id,
        };
        self.post(STATUS_PATH, &body).await
    }
}

/// Build the error for a non-success response.
///
/// A JSON string body, or a body that is not JSON at all, is kept as the
/// message text. JSON objects, arrays and empty bodies are structured.
pub fn classify_failure(url: &str, status: StatusCode, body: &str) -> ApiError {
    let payload = if body.trim().is_empty() {
        ErrorPayload::Structured(None)
    } else {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::String(text)) => ErrorPayload::Text(text),
            Ok(Value::Null) => ErrorPayload::Structured(None),
            Ok(other) => ErrorPayload::Structured(Some(other)),
            Err(_) => ErrorPayload::Text(body.to_string()),
        }
    };

    ApiError::Application {
        url: url.to_string(),
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        payload,
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
