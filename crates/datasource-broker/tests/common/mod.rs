// crates/datasource-broker/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Shared fixtures for datasource-broker integration tests.
// Purpose: Provide HTTP fixtures, mock key services, and counting sources.
// Dependencies: datasource-broker, tiny_http, reqwest, serde_json, tokio
// ============================================================================

//! ## Overview
//! Provides a threaded `tiny_http` server with JSON, header-echo, status, slow,
//! and oversized endpoints, plus in-memory [`KeyService`] and [`Source`] mocks.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use datasource_broker::FetchRequest;
use datasource_broker::KeyService;
use datasource_broker::KeyServiceError;
use datasource_broker::Source;
use datasource_broker::SourceError;
use datasource_broker::SourcePayload;
use tiny_http::Header;
use tiny_http::Request;
use tiny_http::Response;
use tiny_http::Server;
use tiny_http::StatusCode;
use tokio::sync::Notify;

// ============================================================================
// SECTION: HTTP Fixture Server
// ============================================================================

/// Error body returned by `/status/500`; longer than the default excerpt.
pub const LONG_ERROR_BODY_LEN: usize = 1024;
/// Body size returned by `/big`.
pub const BIG_BODY_LEN: usize = 4096;
/// Delay applied by `/slow`.
pub const SLOW_DELAY: Duration = Duration::from_secs(3);

/// Threaded HTTP fixture server.
///
/// Routes (path only; absolute-form proxy requests are routed the same way):
/// - `/json`, `/foo.json`: `{"hello":"world"}` as `application/json; charset=utf-8`
/// - `/echo`, `/foo`: request headers as a JSON object of name -> values
/// - `/status/500`: 500 with a long body
/// - `/status/404`: 404 with body `missing`
/// - `/slow`: responds after [`SLOW_DELAY`]
/// - `/big`: [`BIG_BODY_LEN`] bytes of text
/// - `/yaml`: a YAML document as `application/yaml`
/// - `/raw-json`: JSON text served as `text/plain`
pub struct TestServer {
    /// Underlying server.
    server: Arc<Server>,
    /// Accept loop thread.
    handle: Option<JoinHandle<()>>,
    /// Number of requests received.
    hits: Arc<AtomicUsize>,
    /// Base URL without trailing slash.
    base_url: String,
}

impl TestServer {
    /// Starts a server on an ephemeral local port.
    pub fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("http server"));
        let base_url = format!("http://{}", server.server_addr());
        let hits = Arc::new(AtomicUsize::new(0));
        let worker = Arc::clone(&server);
        let counter = Arc::clone(&hits);
        let handle = thread::spawn(move || {
            for request in worker.incoming_requests() {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::spawn(move || handle_request(request));
            }
        });
        Self {
            server,
            handle: Some(handle),
            hits,
            base_url,
        }
    }

    /// Returns the base URL (no trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Returns the number of requests received so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Extracts the path (without query) from an origin-form or absolute-form target.
fn route_path(target: &str) -> String {
    let without_scheme = target.split_once("://").map_or(target, |(_, rest)| rest);
    let path = if target.contains("://") {
        without_scheme.find('/').map_or("/", |index| &without_scheme[index..])
    } else {
        without_scheme
    };
    path.split('?').next().unwrap_or("/").to_string()
}

/// Canonicalizes a header name, e.g. `accept-encoding` to `Accept-Encoding`.
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
            })
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Headers added by the transport rather than by the datasource layer.
const TRANSPORT_HEADERS: [&str; 5] =
    ["host", "accept", "connection", "proxy-connection", "content-length"];

/// Builds the JSON body echoed by `/echo`.
fn echo_body(request: &Request) -> String {
    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for header in request.headers() {
        let name = header.field.as_str().as_str().to_string();
        if TRANSPORT_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        headers
            .entry(canonical_header_name(&name))
            .or_default()
            .push(header.value.as_str().to_string());
    }
    serde_json::to_string(&headers).expect("serialize headers")
}

/// Builds a header from static parts.
fn header(name: &str, value: &str) -> Header {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).expect("header")
}

/// Routes and answers one request.
fn handle_request(request: Request) {
    let path = route_path(request.url());
    let response = match path.as_str() {
        "/json" | "/foo.json" => Response::from_string(r#"{"hello":"world"}"#)
            .with_header(header("Content-Type", "application/json; charset=utf-8")),
        "/echo" | "/foo" => Response::from_string(echo_body(&request))
            .with_header(header("Content-Type", "application/json")),
        "/status/500" => Response::from_string("e".repeat(LONG_ERROR_BODY_LEN))
            .with_status_code(StatusCode(500))
            .with_header(header("Content-Type", "text/plain")),
        "/status/404" => Response::from_string("missing").with_status_code(StatusCode(404)),
        "/slow" => {
            thread::sleep(SLOW_DELAY);
            Response::from_string("late").with_header(header("Content-Type", "text/plain"))
        }
        "/big" => Response::from_string("b".repeat(BIG_BODY_LEN))
            .with_header(header("Content-Type", "text/plain")),
        "/yaml" => Response::from_string("name: demo\nitems:\n  - 1\n  - 2\n")
            .with_header(header("Content-Type", "application/yaml")),
        "/raw-json" => Response::from_string(r#"{"typed":true}"#)
            .with_header(header("Content-Type", "text/plain")),
        _ => Response::from_string("not found").with_status_code(StatusCode(404)),
    };
    let _ = request.respond(response);
}

/// Builds a client that sends every plain-HTTP request through `server`.
pub fn proxy_client(server: &TestServer) -> reqwest::Client {
    let proxy = reqwest::Proxy::http(server.base_url()).expect("proxy");
    reqwest::Client::builder().proxy(proxy).build().expect("proxy client")
}

// ============================================================================
// SECTION: Key Service Mocks
// ============================================================================

/// Key service whose "encryption" uppercases and "decryption" lowercases.
#[derive(Debug, Default)]
pub struct CaseFoldingKeyService {
    /// Key ids passed to `encrypt`.
    pub seen_keys: Mutex<Vec<String>>,
}

#[async_trait]
impl KeyService for CaseFoldingKeyService {
    async fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, KeyServiceError> {
        self.seen_keys.lock().unwrap().push(key_id.to_string());
        Ok(plaintext.to_ascii_uppercase())
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyServiceError> {
        Ok(ciphertext.to_ascii_lowercase())
    }
}

/// Key service that XORs every byte with a fixed mask.
#[derive(Debug, Clone, Copy)]
pub struct XorKeyService(pub u8);

#[async_trait]
impl KeyService for XorKeyService {
    async fn encrypt(&self, _key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, KeyServiceError> {
        Ok(plaintext.iter().map(|byte| byte ^ self.0).collect())
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyServiceError> {
        Ok(ciphertext.iter().map(|byte| byte ^ self.0).collect())
    }
}

/// Key service that rejects every request.
#[derive(Debug, Clone)]
pub struct FailingKeyService(pub KeyServiceError);

#[async_trait]
impl KeyService for FailingKeyService {
    async fn encrypt(&self, _key_id: &str, _plaintext: &[u8]) -> Result<Vec<u8>, KeyServiceError> {
        Err(self.0.clone())
    }

    async fn decrypt(&self, _ciphertext: &[u8]) -> Result<Vec<u8>, KeyServiceError> {
        Err(self.0.clone())
    }
}

// ============================================================================
// SECTION: Source Mocks
// ============================================================================

/// Source that counts fetches and answers after an optional delay.
#[derive(Debug)]
pub struct CountingSource {
    /// Number of fetches started.
    calls: AtomicUsize,
    /// Delay before answering.
    delay: Duration,
    /// Result returned by every fetch.
    result: Result<SourcePayload, SourceError>,
}

impl CountingSource {
    /// Creates a source that returns `body` with `content_type`.
    pub fn ok(body: &str, content_type: Option<&str>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            result: Ok(SourcePayload {
                bytes: body.as_bytes().to_vec(),
                content_type: content_type.map(str::to_string),
            }),
        }
    }

    /// Creates a source that fails with `error`.
    pub fn failing(error: SourceError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    /// Adds a delay before each answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns the number of fetches started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for CountingSource {
    async fn fetch(&self, request: &FetchRequest<'_>) -> Result<SourcePayload, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(self.delay) => {}
                () = request.context.cancellation().cancelled() => {
                    return Err(SourceError::Cancelled);
                }
            }
        }
        self.result.clone()
    }
}

/// Source that answers only after the test opens its gate.
///
/// It ignores the render's cancellation token, so the fetch result and a
/// cancellation can become ready together.
#[derive(Debug, Default)]
pub struct GatedSource {
    /// Released by [`Self::open`].
    gate: Notify,
}

impl GatedSource {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets the pending fetch complete.
    pub fn open(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Source for GatedSource {
    async fn fetch(&self, _request: &FetchRequest<'_>) -> Result<SourcePayload, SourceError> {
        self.gate.notified().await;
        Ok(SourcePayload {
            bytes: b"done".to_vec(),
            content_type: Some("text/plain".to_string()),
        })
    }
}

// ============================================================================
// SECTION: Shared Buffer for Write Testing
// ============================================================================

/// A thread-safe buffer for testing Write implementations.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    /// Shared byte storage.
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Creates a new empty shared buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the contents as a string.
    pub fn to_string_lossy(&self) -> String {
        let guard = self.inner.lock().expect("buffer lock");
        String::from_utf8_lossy(&guard).to_string()
    }

    /// Parses every line as JSON.
    pub fn json_lines(&self) -> Vec<serde_json::Value> {
        self.to_string_lossy()
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
