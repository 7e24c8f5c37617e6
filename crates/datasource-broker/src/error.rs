// crates/datasource-broker/src/error.rs
// ============================================================================
// Module: Datasource Resolution Errors
// Description: Error taxonomy surfaced by the broker to the rendering layer.
// Purpose: Classify resolution failures without losing backend causes.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`ResolveError`] is what template code sees. Backend failures are wrapped in
//! [`ResolveError::FetchFailed`] with the original [`SourceError`] kept as the
//! cause; cancellation is lifted to [`ResolveError::Cancelled`] so callers can
//! tell an aborted render from a broken source.
//! Invariants:
//! - Errors are `Clone` so a single failed fetch can be handed to every
//!   coalesced waiter.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::source::SourceError;

// ============================================================================
// SECTION: Resolve Errors
// ============================================================================

/// Errors returned by datasource resolution.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Duplicate alias registration, unknown alias, or invalid definition.
    #[error("datasource configuration error: {0}")]
    Config(String),
    /// No backend is registered for the URI scheme.
    #[error("unsupported uri scheme: {0}")]
    UnsupportedScheme(String),
    /// The backend failed to fetch or decode the payload.
    #[error("fetch failed for {uri}: {cause}")]
    FetchFailed {
        /// Resolved URI that was being fetched.
        uri: String,
        /// Backend failure.
        #[source]
        cause: SourceError,
    },
    /// The render context was cancelled before the value was available.
    #[error("datasource resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Wraps a backend failure for the provided URI.
    ///
    /// Cancellation reported by a backend is lifted to [`Self::Cancelled`].
    #[must_use]
    pub fn fetch_failed(uri: &str, cause: SourceError) -> Self {
        match cause {
            SourceError::Cancelled => Self::Cancelled,
            cause => Self::FetchFailed {
                uri: uri.to_string(),
                cause,
            },
        }
    }

    /// Returns a stable label for telemetry.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::UnsupportedScheme(_) => "unsupported_scheme",
            Self::FetchFailed {
                cause, ..
            } => cause.kind(),
            Self::Cancelled => "cancelled",
        }
    }
}
