use std::future::Future;
use std::io::Write;
use std::time::Duration;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Serialize;
use tracing::debug;

use crate::error::DeliveryError;

/// Request timeout used by [`HttpTransport::default`].
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body kept in a [`DeliveryError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// HTTP method of an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

/// Per-request delivery options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostOptions {
    /// Short label for logs, e.g. `flush` or `flush_traces`
    pub action: &'static str,
    /// Whether the body may be deflate-compressed
    pub compress: bool,
    /// The response body is informational only and is not logged
    pub discard_body: bool,
}

/// One outbound request with an already serialized JSON body
#[derive(Debug, Clone)]
pub struct PostRequest {
    pub method: Method,
    pub url: String,
    pub body: Vec<u8>,
    pub options: PostOptions,
}

impl PostRequest {
    /// Serializes `payload` as JSON into a new request.
    pub fn json<P: Serialize + ?Sized>(
        method: Method,
        url: String,
        payload: &P,
        options: PostOptions,
    ) -> Result<Self, DeliveryError> {
        Ok(Self {
            method,
            url,
            body: serde_json::to_vec(payload)?,
            options,
        })
    }
}

/// Delivers requests to the backend.
///
/// Timeouts and cancellation are the transport's responsibility. Errors are
/// reported to the caller and never retried by the sinks.
pub trait Transport: Send + Sync + 'static {
    /// Sends one request.
    fn send(&self, request: PostRequest) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// `reqwest`-backed transport with optional deflate compression
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport around an existing client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Creates a transport with the given request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: PostRequest) -> Result<(), DeliveryError> {
        let PostRequest {
            method,
            url,
            body,
            options,
        } = request;
        let raw_len = body.len();

        let mut builder = match method {
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
        }
        .header("Content-Type", "application/json");

        builder = if options.compress {
            builder
                .header("Content-Encoding", "deflate")
                .body(deflate(&body)?)
        } else {
            builder.body(body)
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let status = resp.status();
        // Drain body for connection reuse.
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body: truncate(text, MAX_ERROR_BODY),
            });
        }

        if options.discard_body {
            debug!(action = options.action, bytes = raw_len, "request delivered");
        } else {
            debug!(action = options.action, bytes = raw_len, response = %text, "request delivered");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Compresses a body with zlib (`Content-Encoding: deflate`).
pub fn deflate(data: &[u8]) -> Result<Vec<u8>, DeliveryError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

/// Stdout transport for local runs and debugging
pub struct StdoutTransport {
    verbose: bool,
}

impl StdoutTransport {
    /// Creates a new stdout transport
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Transport for StdoutTransport {
    async fn send(&self, request: PostRequest) -> Result<(), DeliveryError> {
        println!(
            "{} {} ({} bytes, action={})",
            request.method.as_str(),
            request.url,
            request.body.len(),
            request.options.action
        );
        if self.verbose {
            println!("{}", String::from_utf8_lossy(&request.body));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Transport that discards all requests (for benchmarking)
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for NullTransport {
    async fn send(&self, _request: PostRequest) -> Result<(), DeliveryError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test transport that records every request for verification
#[cfg(test)]
pub struct RecordingTransport {
    requests: std::sync::Mutex<Vec<PostRequest>>,
    fail_when: Box<dyn Fn(&PostRequest) -> bool + Send + Sync>,
}

#[cfg(test)]
impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            requests: std::sync::Mutex::new(Vec::new()),
            fail_when: Box::new(|_| false),
        }
    }
}

#[cfg(test)]
impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every request but fails those matching `predicate`.
    pub fn failing_when(predicate: impl Fn(&PostRequest) -> bool + Send + Sync + 'static) -> Self {
        Self {
            fail_when: Box::new(predicate),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<PostRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Decoded JSON bodies of all requests sent to URLs containing `path`.
    pub fn bodies_for(&self, path: &str) -> Vec<serde_json::Value> {
        self.requests()
            .iter()
            .filter(|r| r.url.contains(path))
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }
}

#[cfg(test)]
impl Transport for RecordingTransport {
    async fn send(&self, request: PostRequest) -> Result<(), DeliveryError> {
        let fail = (self.fail_when)(&request);
        self.requests.lock().unwrap().push(request);
        if fail {
            return Err(DeliveryError::Status {
                status: 500,
                body: "internal error".into(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    const OPTS: PostOptions = PostOptions {
        action: "flush",
        compress: false,
        discard_body: true,
    };

    #[test]
    fn deflate_roundtrip() {
        let data = br#"{"series":[]}"#;
        let compressed = deflate(data).unwrap();

        let mut decoder = flate2::read::ZlibDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo".to_string(), 2), "h");
        assert_eq!(truncate("short".to_string(), 64), "short");
    }

    #[test]
    fn json_request_serializes_payload() {
        let url = "http://x/v0.3/traces".to_string();
        let req = PostRequest::json(Method::Put, url, &vec![vec![1, 2]], OPTS).unwrap();
        assert_eq!(req.body, b"[[1,2]]");
        assert_eq!(req.method.as_str(), "PUT");
    }

    #[tokio::test]
    async fn stdout_and_null_transports_accept_everything() {
        let req = PostRequest::json(Method::Post, "http://x".into(), &[1], OPTS).unwrap();
        assert!(StdoutTransport::new(false).send(req.clone()).await.is_ok());
        assert!(NullTransport::new().send(req).await.is_ok());
    }

    #[tokio::test]
    async fn recording_transport_fails_on_predicate() {
        let transport = RecordingTransport::failing_when(|r| r.url.ends_with("/bad"));
        let ok = PostRequest::json(Method::Post, "http://x/good".into(), &[1], OPTS).unwrap();
        let bad = PostRequest::json(Method::Post, "http://x/bad".into(), &[1], OPTS).unwrap();

        assert!(transport.send(ok).await.is_ok());
        assert!(transport.send(bad).await.is_err());
        assert_eq!(transport.requests().len(), 2);
    }

    /// Accepts one connection, replies with `response` and returns the raw
    /// request head and body.
    async fn serve_once(
        response: &'static str,
    ) -> (String, tokio::task::JoinHandle<(String, Vec<u8>)>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let head_end = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
            let length: usize = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map_or(0, |v| v.trim().parse().unwrap());
            while buf.len() < head_end + length {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before body");
                buf.extend_from_slice(&chunk[..n]);
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            (head, buf[head_end..head_end + length].to_vec())
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn http_transport_deflates_and_maps_error_status() {
        let (base, server) = serve_once(
            "HTTP/1.1 403 Forbidden\r\ncontent-length: 9\r\nconnection: close\r\n\r\nforbidden",
        )
        .await;
        let options = PostOptions {
            action: "flush",
            compress: true,
            discard_body: true,
        };
        let payload = serde_json::json!({"series": [{"metric": "m", "points": [[1.0, 2.0]]}]});
        let url = format!("{base}/api/v1/series");
        let req = PostRequest::json(Method::Post, url, &payload, options).unwrap();

        let transport = HttpTransport::with_timeout(Duration::from_secs(5)).unwrap();
        let result = transport.send(req).await;
        assert!(matches!(
            result,
            Err(DeliveryError::Status { status: 403, ref body }) if body == "forbidden"
        ));

        let (head, body) = server.await.unwrap();
        assert!(head.starts_with("post /api/v1/series"));
        assert!(head.contains("content-encoding: deflate"));
        assert!(head.contains("content-type: application/json"));

        let mut decoder = flate2::read::ZlibDecoder::new(body.as_slice());
        let mut json = Vec::new();
        decoder.read_to_end(&mut json).unwrap();
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&json).unwrap(), payload);
    }

    #[tokio::test]
    async fn http_transport_sends_plain_body_when_uncompressed() {
        let (base, server) =
            serve_once("HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        let url = format!("{base}/v0.3/traces");
        let req = PostRequest::json(Method::Put, url, &vec![vec![1, 2]], OPTS).unwrap();

        let transport = HttpTransport::with_timeout(Duration::from_secs(5)).unwrap();
        assert!(transport.send(req).await.is_ok());

        let (head, body) = server.await.unwrap();
        assert!(head.starts_with("put /v0.3/traces"));
        assert!(!head.contains("content-encoding"));
        assert_eq!(body, b"[[1,2]]");
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = truncate("x".repeat(2 * MAX_ERROR_BODY), MAX_ERROR_BODY);
        assert_eq!(body.len(), MAX_ERROR_BODY);
    }

    #[tokio::test]
    async fn http_transport_reports_unreachable_backend() {
        let transport = HttpTransport::with_timeout(Duration::from_millis(200)).unwrap();
        let url = "http://127.0.0.1:9/api".to_string();
        let req = PostRequest::json(Method::Post, url, &[1], OPTS).unwrap();
        assert!(matches!(
            transport.send(req).await,
            Err(DeliveryError::Transport(_))
        ));
    }
}
