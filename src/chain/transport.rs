//! HTTP seam between the client and the block explorer.
//!
//! `HttpTransport` talks to a real Esplora instance over reqwest.
//! `ScriptedTransport` replays canned responses so retry and gate timing
//! can be asserted without sockets.

use super::clock::Clock;
use crate::error::{Result, WalletError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path below the base URL, starting with `/`.
    pub path: String,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::Get, path: path.into(), body: None }
    }

    pub fn post(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self { method: Method::Post, path: path.into(), body: Some(body.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After`, when the server sent one.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: 200, body: body.into(), retry_after: None }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into(), retry_after: None }
    }

    pub fn too_many_requests(retry_after: Option<Duration>) -> Self {
        Self { status: 429, body: "Too Many Requests".into(), retry_after }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP exchange. `Err` means no response arrived (connect failure, timeout).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// `Retry-After` is either delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(feature = "native")]
pub use http::HttpTransport;

#[cfg(feature = "native")]
mod http {
    use super::*;
    use crate::config::ClientConfig;
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER, USER_AGENT};
    use reqwest::Client;

    pub struct HttpTransport {
        base_url: String,
        request_timeout: Duration,
        client: Client,
    }

    impl HttpTransport {
        pub fn new(config: &ClientConfig) -> Result<Self> {
            let mut headers = HeaderMap::new();
            headers.insert(
                USER_AGENT,
                HeaderValue::from_str(&config.user_agent)
                    .map_err(|e| WalletError::validation(format!("user agent: {}", e)))?,
            );
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

            let client = Client::builder()
                .default_headers(headers)
                .connect_timeout(config.connect_timeout)
                .timeout(config.request_timeout)
                .build()
                .map_err(|e| WalletError::network(format!("http client: {}", e), None))?;

            Ok(Self { base_url: config.base_url.trim_end_matches('/').to_string(), request_timeout: config.request_timeout, client })
        }

        pub fn base_url(&self) -> &str {
            &self.base_url
        }
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
            let url = format!("{}{}", self.base_url, request.path);
            let builder = match request.method {
                Method::Get => self.client.get(&url),
                Method::Post => self
                    .client
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "text/plain")
                    .body(request.body.clone().unwrap_or_default()),
            };

            let response = builder.timeout(self.request_timeout).send().await.map_err(|e| {
                let reason = if e.is_timeout() { "timed out" } else if e.is_connect() { "connection failed" } else { "request failed" };
                WalletError::network(format!("{} {}: {}", reason, request.path, e), None)
            })?;

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response
                .text()
                .await
                .map_err(|e| WalletError::network(format!("reading {}: {}", request.path, e), Some(status)))?;

            Ok(HttpResponse { status, body, retry_after })
        }
    }
}

/// A request as seen by [`ScriptedTransport`], stamped with the clock time it arrived.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: HttpRequest,
    pub at: Duration,
}

type Reply = std::result::Result<HttpResponse, String>;

/// Canned responses keyed by path. Queued replies are consumed first, then
/// the sticky reply for that path, else 404.
#[derive(Default)]
pub struct ScriptedTransport {
    clock: Option<Arc<dyn Clock>>,
    queued: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    sticky: Mutex<HashMap<(Method, String), Reply>>,
    log: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp recorded requests with this clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Queue a one-shot reply for `GET path`.
    pub fn push(&self, path: &str, response: HttpResponse) -> &Self {
        self.enqueue(Method::Get, path, Ok(response))
    }

    pub fn push_post(&self, path: &str, response: HttpResponse) -> &Self {
        self.enqueue(Method::Post, path, Ok(response))
    }

    /// Queue a transport failure (no response) for `GET path`.
    pub fn push_failure(&self, path: &str, message: &str) -> &Self {
        self.enqueue(Method::Get, path, Err(message.to_string()))
    }

    /// Reply returned for `GET path` whenever nothing is queued.
    pub fn respond(&self, path: &str, response: HttpResponse) -> &Self {
        if let Ok(mut sticky) = self.sticky.lock() {
            sticky.insert((Method::Get, path.to_string()), Ok(response));
        }
        self
    }

    pub fn respond_json(&self, path: &str, value: serde_json::Value) -> &Self {
        self.respond(path, HttpResponse::ok(value.to_string()))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.request.path).collect()
    }

    fn enqueue(&self, method: Method, path: &str, reply: Reply) -> &Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.entry((method, path.to_string())).or_default().push_back(reply);
        }
        self
    }

    fn next_reply(&self, method: Method, path: &str) -> Reply {
        let key = (method, path.to_string());
        if let Some(reply) = self.queued.lock().ok().and_then(|mut q| q.get_mut(&key).and_then(VecDeque::pop_front)) {
            return reply;
        }
        self.sticky
            .lock()
            .ok()
            .and_then(|s| s.get(&key).cloned())
            .unwrap_or_else(|| Ok(HttpResponse::status(404, "not found")))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let at = self.clock.as_ref().map(|c| c.now()).unwrap_or_default();
        if let Ok(mut log) = self.log.lock() {
            log.push(RecordedRequest { request: request.clone(), at });
        }
        self.next_reply(request.method, &request.path)
            .map_err(|message| WalletError::network(message, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[tokio::test]
    async fn test_scripted_queue_then_sticky() {
        let transport = ScriptedTransport::new();
        transport.push("/a", HttpResponse::status(503, "busy"));
        transport.respond("/a", HttpResponse::ok("ready"));

        assert_eq!(transport.send(&HttpRequest::get("/a")).await.unwrap().status, 503);
        assert_eq!(transport.send(&HttpRequest::get("/a")).await.unwrap().body, "ready");
        assert_eq!(transport.send(&HttpRequest::get("/a")).await.unwrap().body, "ready");
        assert_eq!(transport.send(&HttpRequest::get("/missing")).await.unwrap().status, 404);
        assert_eq!(transport.paths(), vec!["/a", "/a", "/a", "/missing"]);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_network_error() {
        let transport = ScriptedTransport::new();
        transport.push_failure("/x", "connection reset");
        let err = transport.send(&HttpRequest::get("/x")).await.unwrap_err();
        assert!(matches!(err, WalletError::Network { status: None, .. }));
    }
}
