//! HTTP bulk transport: one POST of newline-delimited JSON per batch.

use crate::error::ShipperResult;
use crate::event::Event;
use crate::level::parse_level_hint;
use crate::transport::{BatchTransport, SendOutcome};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Response header a collector may use to request a minimum level.
pub const MINIMUM_LEVEL_HEADER: &str = "X-Minimum-Level";

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Bulk endpoint URL.
    pub endpoint: String,
    /// Optional bearer token.
    pub bearer_token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl HttpTransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer_token: None,
            timeout_secs: 30,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// Posts batches to a bulk endpoint.
pub struct HttpBulkTransport {
    config: HttpTransportConfig,
    client: Client,
}

impl HttpBulkTransport {
    pub fn new(config: HttpTransportConfig) -> ShipperResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[async_trait]
impl BatchTransport for HttpBulkTransport {
    async fn send(&self, events: &[Event]) -> SendOutcome {
        let body = to_ndjson(events);

        debug!(
            url = %self.config.endpoint,
            events = events.len(),
            bytes = body.len(),
            "Sending batch"
        );

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        if let Some(token) = &self.config.bearer_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return SendOutcome::transient("network", e.to_string()),
        };

        let status = response.status();
        let minimum_level = response
            .headers()
            .get(MINIMUM_LEVEL_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_level_hint);

        if status.is_success() {
            return SendOutcome::Accepted { minimum_level };
        }

        let text = response.text().await.unwrap_or_default();
        let message = if text.trim().is_empty() {
            status.canonical_reason().unwrap_or("Unknown error").to_string()
        } else {
            text
        };
        classify_failure(status, message)
    }
}

/// Map a non-success status onto a rejection or a transient failure.
pub fn classify_failure(status: StatusCode, message: String) -> SendOutcome {
    let code = status.as_u16().to_string();
    let transient = status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error();

    if status.is_client_error() && !transient {
        SendOutcome::Rejected { code, message }
    } else {
        SendOutcome::TransientFailure { code, message }
    }
}

fn to_ndjson(events: &[Event]) -> String {
    let mut body = String::with_capacity(events.iter().map(|e| e.len() + 1).sum());
    for event in events {
        body.push_str(event.as_str());
        body.push('\n');
    }
    body
}
