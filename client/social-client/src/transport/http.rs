//! reqwest-backed transport
//!
//! Adds `Accept: application/json`, the bearer token of the current session
//! and a request id to every call. Non-2xx responses become
//! [`ApiFailure::Status`] with the server's `message` when one is present.
//! Time limits belong to the caller's request policy.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{message_of, ApiFailure, ApiResponse, Operation, Transport};
use crate::error::{ClientError, ClientResult};
use crate::session::SessionHandle;

pub struct HttpTransport {
    client: Client,
    base_url: String,
    session: SessionHandle,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, session: SessionHandle) -> ClientResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("community-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, operation: &Operation) -> Result<(StatusCode, String), ApiFailure> {
        let route = operation.route();
        let url = format!("{}{}", self.base_url, route.path);
        let request_id = Uuid::new_v4();

        let mut request = self
            .client
            .request(route.method, &url)
            .header(ACCEPT, "application/json")
            .header("X-Request-Id", request_id.to_string());
        if !route.query.is_empty() {
            request = request.query(&route.query);
        }
        if let Some(body) = &route.body {
            request = request.json(body);
        }
        if let Some(token) = self.session.token() {
            request = request.bearer_auth(token);
        }

        debug!(
            operation = operation.name(),
            %request_id,
            url = %url,
            "Sending request"
        );

        let response = request.send().await.map_err(|e| network(operation, request_id, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| network(operation, request_id, e))?;
        Ok((status, text))
    }
}

fn network(operation: &Operation, request_id: Uuid, err: reqwest::Error) -> ApiFailure {
    warn!(operation = operation.name(), %request_id, error = %err, "Request failed");
    ApiFailure::Network(err.to_string())
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, operation: Operation) -> Result<ApiResponse, ApiFailure> {
        let started = Instant::now();
        let (status, text) = self.send(&operation).await?;
        let body = parse_body(&text);

        debug!(
            operation = operation.name(),
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Response received"
        );

        if status.is_success() {
            return Ok(ApiResponse::new(status.as_u16(), body));
        }

        let message = message_of(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });
        Err(ApiFailure::Status {
            status: status.as_u16(),
            message,
            body,
        })
    }
}
