//! HTTP bridge
//!
//! Plugins describe a request with an [`HttpRequest`] envelope and get back a
//! string: either the raw response body, or (with `responseWithHeaders`) a
//! JSON document `{"data": body, "headers": {...}}`. The body is never
//! parsed, and HTTP status codes are not treated as failures. Only transport
//! problems (DNS, refused connection, broken body, timeout) produce an error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::core::config::HttpConfig;
use crate::core::error::{BridgeError, Result};

/// Methods conventionally used by plugins; others are passed through
pub const KNOWN_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Request envelope as sent by a plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    /// Pre-serialized payload, the bridge never encodes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Milliseconds; absent (or 0) means no timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_with_headers: Option<bool>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, "GET")
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(url, "POST")
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_response_headers(mut self, enabled: bool) -> Self {
        self.response_with_headers = Some(enabled);
        self
    }

    /// Whether the response should use the `{data, headers}` shape
    pub fn wants_headers(&self) -> bool {
        self.response_with_headers.unwrap_or(false)
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

/// Request as handed to the transport, after envelope normalization
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// What the transport got back
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Headers-mode response shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadersEnvelope {
    pub data: String,
    pub headers: BTreeMap<String, String>,
}

/// Network seam of the bridge
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: PreparedRequest) -> Result<TransportResponse>;
}

/// Default transport built on reqwest
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client; no overall timeout is set, per-request timeouts are
    /// applied by the bridge
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if config.connect_timeout_ms > 0 {
            builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        }

        let client = builder
            .build()
            .map_err(|e| BridgeError::ConfigError(format!("Failed to build http client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: PreparedRequest) -> Result<TransportResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            BridgeError::InvalidRequest(format!("invalid method token: {:?}", request.method))
        })?;

        let mut builder = self.client.request(method, request.url);

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| BridgeError::InvalidRequest(format!("invalid header name: {:?}", name)))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                BridgeError::InvalidRequest(format!("invalid value for header {}", name))
            })?;
            builder = builder.header(name, value);
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse { status, headers, body })
    }
}

/// The `httpRequest` operation
#[derive(Clone)]
pub struct HttpBridge {
    transport: Arc<dyn HttpTransport>,
}

impl HttpBridge {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(ReqwestTransport::new(config)?)))
    }

    /// Issue a request and encode the response envelope
    pub async fn request(&self, envelope: HttpRequest) -> Result<String> {
        let prepared = prepare(&envelope)?;
        let timeout = envelope.timeout();
        let method = prepared.method.clone();
        let url = prepared.url.to_string();
        let started = Instant::now();

        debug!(%method, %url, timeout_ms = ?envelope.timeout, "Sending plugin http request");

        let sent = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.transport.send(prepared))
                .await
                .map_err(|_| {
                    BridgeError::Timeout(format!(
                        "{} {} did not complete within {} ms",
                        method,
                        url,
                        limit.as_millis()
                    ))
                })
                .and_then(|result| result),
            None => self.transport.send(prepared).await,
        };

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                warn!(%method, %url, error_type = e.error_type(), "Plugin http request failed: {}", e);
                return Err(e);
            }
        };

        info!(
            %method,
            %url,
            status = response.status,
            body_len = response.body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Plugin http request completed"
        );

        encode_response(response, envelope.wants_headers())
    }

    /// Same as [`HttpBridge::request`], taking the envelope as JSON
    pub async fn request_json(&self, envelope: &str) -> Result<String> {
        let envelope: HttpRequest = serde_json::from_str(envelope)
            .map_err(|e| BridgeError::InvalidRequest(format!("malformed request envelope: {}", e)))?;
        self.request(envelope).await
    }
}

/// Normalize an envelope into what the transport sends
pub fn prepare(envelope: &HttpRequest) -> Result<PreparedRequest> {
    if envelope.url.trim().is_empty() {
        return Err(BridgeError::InvalidRequest("url cannot be empty".to_string()));
    }
    let method = envelope.method.trim().to_uppercase();
    if method.is_empty() {
        return Err(BridgeError::InvalidRequest("method cannot be empty".to_string()));
    }
    if !KNOWN_METHODS.contains(&method.as_str()) {
        debug!(%method, "Passing unconventional http method through to the transport");
    }

    let mut url = Url::parse(envelope.url.trim())
        .map_err(|e| BridgeError::InvalidRequest(format!("invalid url {:?}: {}", envelope.url, e)))?;

    let mut headers: Vec<(String, String)> = envelope
        .headers
        .iter()
        .flatten()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    headers.sort();

    if let Some(content_type) = &envelope.content_type {
        headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
        headers.push(("content-type".to_string(), content_type.clone()));
    }

    // GET and HEAD carry the payload as the query string
    let payload = envelope.payload.as_deref().filter(|payload| !payload.is_empty());
    let body = match payload {
        Some(payload) if method == "GET" || method == "HEAD" => {
            let payload = payload.trim_start_matches('?');
            let query = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{}&{}", existing, payload),
                _ => payload.to_string(),
            };
            url.set_query(Some(&query));
            None
        }
        Some(payload) => Some(payload.to_string()),
        None => None,
    };

    Ok(PreparedRequest { method, url, headers, body })
}

/// Lower-case header names, joining repeated headers with `", "`
pub fn collect_headers(headers: Vec<(String, String)>) -> BTreeMap<String, String> {
    let mut collected: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        collected
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    collected
}

fn encode_response(response: TransportResponse, with_headers: bool) -> Result<String> {
    let data = match String::from_utf8(response.body) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };

    if !with_headers {
        return Ok(data);
    }

    let envelope = HeadersEnvelope {
        data,
        headers: collect_headers(response.headers),
    };
    Ok(serde_json::to_string(&envelope)?)
}
