//! Wire transport for the telemetry query endpoint.
//!
//! `QueryTransport` is the seam between the retrying executor and the
//! network. `HttpTransport` implements the endpoint contract:
//!
//! - `POST {base_url}{path}` with body `{"sn_list": [...]}`
//! - headers `timestamp` and `signature`
//! - success body `{"data": [...]}`
//! - 429 rate limit, 401/403 authentication, 5xx server error

use crate::client::signer::RequestAuth;
use crate::error::{FetchError, Result};
use crate::models::{DeviceId, TelemetryRecord};
use anyhow::Context;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Something that can run one signed query for a list of devices.
pub trait QueryTransport: Send + Sync {
    fn query<'a>(
        &'a self,
        devices: &'a [DeviceId],
        auth: &'a RequestAuth,
    ) -> BoxFuture<'a, Result<Vec<TelemetryRecord>>>;
}

/// Query request body.
#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    sn_list: &'a [DeviceId],
}

/// Query response envelope.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    data: Vec<TelemetryRecord>,
}

/// HTTP transport backed by reqwest.
pub struct HttpTransport {
    http_client: reqwest::Client,
    url: String,
    timeout_seconds: u64,
}

impl HttpTransport {
    /// Create a transport for the full endpoint URL.
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::with_client(http_client, url, timeout))
    }

    /// Use an already configured client. `timeout` is only reported in errors.
    pub fn with_client(http_client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client,
            url: url.into(),
            timeout_seconds: timeout.as_secs(),
        }
    }

    /// Build the signed request without sending it.
    pub fn build_request(
        &self,
        devices: &[DeviceId],
        auth: &RequestAuth,
    ) -> reqwest::Result<reqwest::Request> {
        self.http_client
            .post(&self.url)
            .header("timestamp", &auth.timestamp)
            .header("signature", &auth.signature)
            .json(&QueryRequest { sn_list: devices })
            .build()
    }

    async fn send(&self, devices: &[DeviceId], auth: &RequestAuth) -> Result<Vec<TelemetryRecord>> {
        let request = self
            .build_request(devices, auth)
            .map_err(|e| FetchError::InvalidArgument(format!("Failed to build request: {}", e)))?;

        debug!("POST {} with {} devices", self.url, devices.len());

        let response = self.http_client.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Transient(format!(
                    "Request timed out after {}s",
                    self.timeout_seconds
                ))
            } else if e.is_connect() {
                FetchError::Transient(format!("Cannot connect to {}", self.url))
            } else {
                FetchError::Transient(format!("Failed to send request: {}", e))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status(status, body));
        }

        parse_response(&body)
    }
}

impl QueryTransport for HttpTransport {
    fn query<'a>(
        &'a self,
        devices: &'a [DeviceId],
        auth: &'a RequestAuth,
    ) -> BoxFuture<'a, Result<Vec<TelemetryRecord>>> {
        self.send(devices, auth).boxed()
    }
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn classify_status(status: StatusCode, body: String) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimitExceeded,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::AuthenticationFailure {
            status: status.as_u16(),
            body,
        },
        s if s.is_server_error() => {
            FetchError::Transient(format!("Server error {}: {}", s.as_u16(), body))
        }
        s => FetchError::Rejected {
            status: s.as_u16(),
            body,
        },
    }
}

/// Decode a success body. A malformed body counts as a server fault.
pub fn parse_response(body: &str) -> Result<Vec<TelemetryRecord>> {
    serde_json::from_str::<QueryResponse>(body)
        .map(|r| r.data)
        .map_err(|e| FetchError::Transient(format!("Failed to parse response: {}", e)))
}

#[cfg(test)]
pub mod testing {
    //! Scripted transport for exercising the executor and aggregator
    //! against tokio's paused clock.

    use super::*;
    use serde_json::{json, Map};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// What the scripted endpoint does for one call.
    #[derive(Debug, Clone)]
    pub enum Reply {
        /// One online 2 kW record per requested device.
        Echo,
        /// Fixed records regardless of the request.
        Records(Vec<TelemetryRecord>),
        Fail(FetchError),
    }

    /// One observed call.
    #[derive(Debug, Clone)]
    pub struct Call {
        pub at: Instant,
        pub devices: Vec<DeviceId>,
        pub auth: RequestAuth,
    }

    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Reply>>,
        fallback: Reply,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedTransport {
        pub fn always(reply: Reply) -> Self {
            Self::scripted(Vec::new(), reply)
        }

        /// Play `replies` in order, then `fallback` forever.
        pub fn scripted(replies: Vec<Reply>, fallback: Reply) -> Self {
            Self {
                script: Mutex::new(replies.into()),
                fallback,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl QueryTransport for ScriptedTransport {
        fn query<'a>(
            &'a self,
            devices: &'a [DeviceId],
            auth: &'a RequestAuth,
        ) -> BoxFuture<'a, Result<Vec<TelemetryRecord>>> {
            self.calls.lock().unwrap().push(Call {
                at: Instant::now(),
                devices: devices.to_vec(),
                auth: auth.clone(),
            });

            let reply = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());

            let result = match reply {
                Reply::Echo => Ok(devices
                    .iter()
                    .map(|d| record(d.as_str(), "2 kW", "Online"))
                    .collect()),
                Reply::Records(records) => Ok(records),
                Reply::Fail(err) => Err(err),
            };

            async move { result }.boxed()
        }
    }

    pub fn record(sn: &str, power: &str, status: &str) -> TelemetryRecord {
        TelemetryRecord {
            sn: DeviceId::from(sn),
            power: json!(power),
            status: status.into(),
            last_updated: json!("2024-01-01T00:00:00Z"),
            extra: Map::new(),
        }
    }
}
