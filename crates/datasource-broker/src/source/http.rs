// crates/datasource-broker/src/source/http.rs
// ============================================================================
// Module: Datasource HTTP Source
// Description: HTTP-backed source for datasource resolution.
// Purpose: Fetch datasource bytes via HTTP GET with merged headers.
// Dependencies: reqwest, tokio, url
// ============================================================================

//! ## Overview
//! [`HttpSource`] resolves `http://` and `https://` URIs. It uses the render's
//! client override when one is installed and its own client otherwise.
//! Non-success status codes fail closed with a bounded body excerpt.
//! Invariants:
//! - Every merged header value is sent; repeated values become repeated lines.
//! - Cancellation drops the in-flight request; a response that was fully read
//!   before cancellation is still returned.
//! - Payload bytes are capped at [`HttpSourceConfig::max_response_bytes`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::Response;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;

use crate::headers::HeaderSet;
use crate::source::DEFAULT_MAX_SOURCE_BYTES;
use crate::source::FetchRequest;
use crate::source::Source;
use crate::source::SourceError;
use crate::source::SourcePayload;
use crate::source::enforce_max_bytes;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Default byte budget for status error excerpts.
pub const DEFAULT_ERROR_EXCERPT_BYTES: usize = 256;

/// Limits applied by [`HttpSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSourceConfig {
    /// Request timeout for the source's own client; `None` leaves requests
    /// bounded only by render cancellation.
    pub timeout: Option<Duration>,
    /// Maximum accepted response body size.
    pub max_response_bytes: usize,
    /// Maximum bytes of body kept in [`SourceError::HttpStatus`].
    pub error_excerpt_bytes: usize,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            max_response_bytes: DEFAULT_MAX_SOURCE_BYTES,
            error_excerpt_bytes: DEFAULT_ERROR_EXCERPT_BYTES,
        }
    }
}

// ============================================================================
// SECTION: HTTP Source
// ============================================================================

/// HTTP-backed datasource source.
#[derive(Debug, Clone)]
pub struct HttpSource {
    /// Client used when the render context has no override.
    client: Client,
    /// Size and timeout limits.
    config: HttpSourceConfig,
}

impl HttpSource {
    /// Builds an HTTP source with a default client.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, SourceError> {
        Self::with_config(HttpSourceConfig::default())
    }

    /// Builds an HTTP source with specific limits.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the HTTP client cannot be constructed.
    pub fn with_config(config: HttpSourceConfig) -> Result<Self, SourceError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|err| SourceError::Network(err.to_string()))?;
        Ok(Self {
            client,
            config,
        })
    }

    /// Creates an HTTP source with a preconfigured client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self::with_client_and_config(client, HttpSourceConfig::default())
    }

    /// Creates an HTTP source with a preconfigured client and limits.
    #[must_use]
    pub const fn with_client_and_config(client: Client, config: HttpSourceConfig) -> Self {
        Self {
            client,
            config,
        }
    }

    /// Returns the configured limits.
    #[must_use]
    pub const fn config(&self) -> &HttpSourceConfig {
        &self.config
    }

    /// Sends the request and reads the body within the configured limits.
    async fn send(
        &self,
        client: &Client,
        request: &FetchRequest<'_>,
    ) -> Result<SourcePayload, SourceError> {
        let headers = header_map(request.headers)?;
        let response = client
            .get(request.uri.as_str())
            .headers(headers)
            .send()
            .await
            .map_err(|err| SourceError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let excerpt = read_excerpt(response, self.config.error_excerpt_bytes).await;
            return Err(SourceError::HttpStatus {
                code: status.as_u16(),
                body_excerpt: excerpt,
            });
        }

        let max_bytes = self.config.max_response_bytes;
        if let Some(length) = response.content_length() {
            let actual_bytes = usize::try_from(length).unwrap_or(usize::MAX);
            enforce_max_bytes(actual_bytes, max_bytes)?;
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = read_body_with_limit(response, max_bytes).await?;
        Ok(SourcePayload {
            bytes,
            content_type,
        })
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn fetch(&self, request: &FetchRequest<'_>) -> Result<SourcePayload, SourceError> {
        match request.uri.scheme() {
            "http" | "https" => {}
            scheme => return Err(SourceError::UnsupportedScheme(scheme.to_string())),
        }
        let cancel = request.context.cancellation();
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        let client = request.context.http_client().unwrap_or(&self.client);
        tokio::select! {
            biased;
            result = self.send(client, request) => result,
            () = cancel.cancelled() => Err(SourceError::Cancelled),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts a merged header set into a request header map.
fn header_map(headers: &HeaderSet) -> Result<HeaderMap, SourceError> {
    let mut map = HeaderMap::new();
    for entry in headers {
        let name = HeaderName::from_bytes(entry.name.as_bytes())
            .map_err(|err| SourceError::InvalidHeader(format!("{}: {err}", entry.name)))?;
        for value in &entry.values {
            let value = HeaderValue::from_str(value)
                .map_err(|err| SourceError::InvalidHeader(format!("{}: {err}", entry.name)))?;
            map.append(name.clone(), value);
        }
    }
    Ok(map)
}

/// Reads a response body, failing once it exceeds `limit` bytes.
async fn read_body_with_limit(
    mut response: Response,
    limit: usize,
) -> Result<Vec<u8>, SourceError> {
    let mut body = Vec::new();
    while let Some(chunk) =
        response.chunk().await.map_err(|err| SourceError::Network(err.to_string()))?
    {
        let next_total = body.len().saturating_add(chunk.len());
        enforce_max_bytes(next_total, limit)?;
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Reads at most `limit` bytes of an error body as text.
///
/// Body read failures yield whatever was read so far; the status code is the
/// primary error.
async fn read_excerpt(mut response: Response, limit: usize) -> String {
    let mut body = Vec::new();
    while body.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }
    truncate_excerpt(&body, limit)
}

/// Converts bytes to text no longer than `limit` bytes, cut on a char boundary.
fn truncate_excerpt(bytes: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut end = limit.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
