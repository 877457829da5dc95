//! Upstream HTTP seam shared by every adapter.
//!
//! Adapters build [`UpstreamRequest`]s; the `wreq` client performs the IO
//! with a browser-grade TLS fingerprint, which these consumer services
//! require even for their JSON APIs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use chatgate_provider_core::{AdapterError, AdapterResult, TransportErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

impl UpstreamRequest {
    pub fn post_json(url: impl Into<String>, body: Bytes, is_stream: bool) -> Self {
        let mut req = Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
            is_stream,
        };
        req.set_header("content-type", "application/json");
        req.set_header(
            "accept",
            if is_stream {
                "text/event-stream"
            } else {
                "application/json"
            },
        );
        req
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body bytes for non-streaming responses; drains a stream if one
    /// arrived anyway.
    pub async fn into_bytes(self) -> Bytes {
        match self.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(mut rx) => {
                let mut buf = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk);
                }
                Bytes::from(buf)
            }
        }
    }
}

pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = AdapterResult<UpstreamResponse>> + Send + 'a>>;
}

/// Map a non-2xx upstream status to the adapter error taxonomy.
pub fn classify_status(status: u16, retry_after: Option<u64>, body: &str) -> AdapterError {
    let message = body.chars().take(300).collect::<String>();
    match status {
        401 | 403 => AdapterError::AuthRejected { status, message },
        429 => AdapterError::RateLimited { retry_after },
        _ => AdapterError::Upstream { status, message },
    }
}

const BACKOFF_BASE_MS: u64 = 500;
const MAX_ATTEMPTS: u32 = 6;

/// Exponential backoff for 429/5xx, up to six attempts. Everything else
/// (auth, 4xx, transport, timeout) surfaces immediately.
pub async fn send_with_backoff(
    client: &dyn UpstreamClient,
    req: &UpstreamRequest,
) -> AdapterResult<UpstreamResponse> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let response = client.send(req.clone()).await?;
        if (200..300).contains(&response.status) {
            return Ok(response);
        }

        let status = response.status;
        let retry_after = response
            .header("retry-after")
            .and_then(|value| value.trim().parse::<u64>().ok());
        let body = String::from_utf8_lossy(&response.into_bytes().await).to_string();
        let err = classify_status(status, retry_after, &body);

        if !err.is_retryable_upstream() || attempt >= MAX_ATTEMPTS {
            return Err(err);
        }
        let delay = retry_after
            .map(Duration::from_secs)
            .unwrap_or_else(|| backoff_delay(attempt));
        debug!(status, attempt, delay_ms = delay.as_millis() as u64, "retrying upstream call");
        tokio::time::sleep(delay).await;
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::rng().random_range(0..base / 2 + 1);
    Duration::from_millis(base + jitter)
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Idle gap between stream reads before the stream is abandoned.
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    clients: Arc<Mutex<HashMap<Option<String>, wreq::Client>>>,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let proxy = normalize_proxy(config.proxy.clone());
        let initial = build_client(&config, proxy.as_deref())?;
        let mut clients = HashMap::new();
        clients.insert(proxy, initial);
        Ok(Self {
            config,
            clients: Arc::new(Mutex::new(clients)),
        })
    }

    fn client(&self) -> AdapterResult<wreq::Client> {
        let proxy = normalize_proxy(self.config.proxy.clone());
        let mut guard = self.clients.lock().map_err(|_| AdapterError::Transport {
            kind: TransportErrorKind::Other,
            message: "upstream client cache lock failed".to_string(),
        })?;
        if let Some(client) = guard.get(&proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, proxy.as_deref()).map_err(map_wreq_error)?;
        guard.insert(proxy, client.clone());
        Ok(client)
    }
}

fn normalize_proxy(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn build_client(
    config: &UpstreamClientConfig,
    proxy: Option<&str>,
) -> Result<wreq::Client, wreq::Error> {
    let mut builder = wreq::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .read_timeout(config.stream_idle_timeout);
    if let Some(proxy) = proxy {
        builder = builder.proxy(wreq::Proxy::all(proxy)?);
    }
    builder.build()
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = AdapterResult<UpstreamResponse>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client()?;
            let method = match req.method {
                HttpMethod::Get => wreq::Method::GET,
                HttpMethod::Post => wreq::Method::POST,
            };
            let mut builder = client.request(method, &req.url);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(map_wreq_error)?;
            convert_response(resp, req.is_stream, self.config.stream_idle_timeout).await
        })
    }
}

async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> AdapterResult<UpstreamResponse> {
    let status = resp.status().as_u16();
    let headers = resp
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::time::timeout(stream_idle_timeout, stream.next()).await;
            let item = match next {
                Ok(item) => item,
                Err(_) => {
                    warn!("upstream stream idle timeout; abandoning read");
                    break;
                }
            };
            let Some(item) = item else {
                break;
            };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(_) => break,
            };
            if tx.send(chunk).await.is_err() {
                // Downstream gave up; stop reading upstream.
                break;
            }
        }
    });

    Ok(UpstreamResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn map_wreq_error(err: wreq::Error) -> AdapterError {
    let message = err.to_string();
    let lowered = message.to_ascii_lowercase();
    let kind = if err.is_timeout() {
        if lowered.contains("read") || lowered.contains("idle") {
            TransportErrorKind::ReadTimeout
        } else {
            TransportErrorKind::Timeout
        }
    } else if err.is_connect() {
        if lowered.contains("dns") || lowered.contains("resolve") {
            TransportErrorKind::Dns
        } else if lowered.contains("tls") || lowered.contains("ssl") {
            TransportErrorKind::Tls
        } else {
            TransportErrorKind::Connect
        }
    } else if lowered.contains("tls") || lowered.contains("ssl") {
        TransportErrorKind::Tls
    } else {
        TransportErrorKind::Other
    };
    AdapterError::Transport { kind, message }
}
