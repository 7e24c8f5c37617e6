// crates/datasource-broker/src/source/mod.rs
// ============================================================================
// Module: Datasource Broker Sources
// Description: Source trait and reference implementations for datasource fetch.
// Purpose: Fetch raw datasource bytes for a resolved URI and header set.
// Dependencies: async-trait, thiserror, url
// ============================================================================

//! ## Overview
//! Sources fetch the raw bytes behind a resolved datasource URI. Every backend
//! implements the same small contract: `(uri, headers, context) -> payload`.
//! Decoding is left to the broker so every backend shares one content-type
//! policy.
//! Invariants:
//! - Implementations fail closed on invalid URIs or fetch errors.
//! - Implementations observe the render's cancellation token.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::context::RenderContext;
use crate::headers::HeaderSet;

// ============================================================================
// SECTION: Source Payload
// ============================================================================

/// Payload bytes fetched from a datasource backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePayload {
    /// Raw payload bytes.
    pub bytes: Vec<u8>,
    /// Optional content type hint.
    pub content_type: Option<String>,
}

/// Default maximum payload size accepted by sources (16 MiB).
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 16 * 1024 * 1024;

// ============================================================================
// SECTION: Source Errors
// ============================================================================

/// Errors emitted by datasource sources.
///
/// # Invariants
/// - Variants carry owned strings so failures can be shared with coalesced
///   waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Unsupported or missing URI scheme.
    #[error("unsupported uri scheme: {0}")]
    UnsupportedScheme(String),
    /// URI failed to parse or resolve.
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    /// Header name or value could not be sent.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// Resource was not found.
    #[error("resource not found: {0}")]
    NotFound(String),
    /// Source reported an I/O failure.
    #[error("io failure: {0}")]
    Io(String),
    /// Transport-level failure (connect, TLS, timeout).
    #[error("network failure: {0}")]
    Network(String),
    /// Remote server answered with a non-success status.
    #[error("http status {code}: {body_excerpt}")]
    HttpStatus {
        /// HTTP status code.
        code: u16,
        /// Leading bytes of the response body.
        body_excerpt: String,
    },
    /// Payload bytes could not be decoded for the content type.
    #[error("decode failure: {0}")]
    Decode(String),
    /// Payload exceeded the configured byte limit.
    #[error("payload exceeds size limit: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
    /// The render was cancelled before the fetch completed.
    #[error("fetch cancelled")]
    Cancelled,
}

impl SourceError {
    /// Returns a stable label for telemetry.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedScheme(_) => "unsupported_scheme",
            Self::InvalidUri(_) => "invalid_uri",
            Self::InvalidHeader(_) => "invalid_header",
            Self::NotFound(_) => "not_found",
            Self::Io(_) => "io",
            Self::Network(_) => "network",
            Self::HttpStatus {
                ..
            } => "http_status",
            Self::Decode(_) => "decode",
            Self::TooLarge {
                ..
            } => "too_large",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Returns an error when a payload exceeds the provided size cap.
pub(crate) const fn enforce_max_bytes(
    actual_bytes: usize,
    max_bytes: usize,
) -> Result<(), SourceError> {
    if actual_bytes > max_bytes {
        return Err(SourceError::TooLarge {
            max_bytes,
            actual_bytes,
        });
    }
    Ok(())
}

// ============================================================================
// SECTION: Fetch Request
// ============================================================================

/// Inputs handed to a source for one fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// Resolved datasource URI.
    pub uri: &'a Url,
    /// Merged headers to attach to the request.
    pub headers: &'a HeaderSet,
    /// Render context carrying cancellation and client overrides.
    pub context: &'a RenderContext,
}

// ============================================================================
// SECTION: Source Trait
// ============================================================================

/// Fetches raw datasource bytes for a resolved URI.
#[async_trait]
pub trait Source: Send + Sync {
    /// Fetches payload bytes for the provided request.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the datasource cannot be fetched.
    async fn fetch(&self, request: &FetchRequest<'_>) -> Result<SourcePayload, SourceError>;
}

// ============================================================================
// SECTION: Scheme Kind
// ============================================================================

/// Backend family selected from a URI scheme.
///
/// # Invariants
/// - `http` and `https` share [`SchemeKind::Http`].
/// - [`SchemeKind::Other`] holds a lowercase scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemeKind {
    /// `http://` and `https://`.
    Http,
    /// `file://`.
    File,
    /// Any other scheme, resolved against registered backends.
    Other(String),
}

impl SchemeKind {
    /// Classifies a URI scheme.
    #[must_use]
    pub fn from_scheme(scheme: &str) -> Self {
        let scheme = scheme.to_ascii_lowercase();
        match scheme.as_str() {
            "http" | "https" => Self::Http,
            "file" => Self::File,
            _ => Self::Other(scheme),
        }
    }

    /// Classifies the scheme of a parsed URI.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        Self::from_scheme(url.scheme())
    }

    /// Returns the base scheme when the scheme carries a `+suffix`.
    ///
    /// `git+https` falls back to `git`.
    #[must_use]
    pub fn base(&self) -> Option<Self> {
        match self {
            Self::Other(scheme) => {
                scheme.split_once('+').map(|(base, _)| Self::from_scheme(base))
            }
            Self::Http | Self::File => None,
        }
    }

    /// Returns a stable label for the scheme kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http => "http",
            Self::File => "file",
            Self::Other(scheme) => scheme.as_str(),
        }
    }
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Implementations
// ============================================================================

pub mod file;
pub mod http;

pub use file::FileSource;
pub use http::HttpSource;
pub use http::HttpSourceConfig;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

    use super::SchemeKind;
    use super::SourceError;
    use super::enforce_max_bytes;

    #[test]
    fn scheme_kind_groups_http_and_https() {
        assert_eq!(SchemeKind::from_scheme("http"), SchemeKind::Http);
        assert_eq!(SchemeKind::from_scheme("HTTPS"), SchemeKind::Http);
        assert_eq!(SchemeKind::from_scheme("file"), SchemeKind::File);
        assert_eq!(SchemeKind::from_scheme("Vault"), SchemeKind::Other("vault".to_string()));
    }

    #[test]
    fn scheme_kind_base_strips_suffix() {
        let kind = SchemeKind::from_scheme("git+https");
        assert_eq!(kind.base(), Some(SchemeKind::Other("git".to_string())));
        assert_eq!(SchemeKind::Http.base(), None);
        assert_eq!(SchemeKind::from_scheme("vault").base(), None);
    }

    #[test]
    fn enforce_max_bytes_rejects_oversized_payloads() {
        assert!(enforce_max_bytes(4, 4).is_ok());
        let err = enforce_max_bytes(5, 4).unwrap_err();
        assert_eq!(
            err,
            SourceError::TooLarge {
                max_bytes: 4,
                actual_bytes: 5
            }
        );
        assert_eq!(err.kind(), "too_large");
    }
}
