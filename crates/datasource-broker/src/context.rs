// crates/datasource-broker/src/context.rs
// ============================================================================
// Module: Datasource Render Context
// Description: Per-render cancellation and request override carrier.
// Purpose: Thread render-scoped state explicitly through every resolution.
// Dependencies: reqwest, tokio, url
// ============================================================================

//! ## Overview
//! A [`RenderContext`] is created for exactly one render. It carries the
//! render's [`CancellationToken`], an optional HTTP client override, and a
//! table of extra headers keyed by datasource URI. Sources read it through
//! [`crate::source::FetchRequest`]; nothing is stored in globals.
//! Invariants:
//! - Overrides are installed before resolution starts and are read-only after.
//! - Extra-header keys are normalized through URL parsing so `http://host`
//!   and `http://host/` address the same entry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use reqwest::Client;
use tokio::sync::Notify;
use url::Url;

use crate::headers::HeaderSet;

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Cooperative cancellation flag shared by everything in one render.
///
/// # Invariants
/// - Cancellation is one-way; a cancelled token never resets.
/// - Clones share state.
#[derive(Clone, Default)]
pub struct CancellationToken {
    /// Shared cancellation state.
    inner: Arc<CancellationInner>,
}

/// Shared state behind a [`CancellationToken`].
#[derive(Default)]
struct CancellationInner {
    /// Set once cancellation is requested.
    cancelled: AtomicBool,
    /// Wakes tasks parked in [`CancellationToken::cancelled`].
    notify: Notify,
}

impl CancellationToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Requests cancellation and wakes every waiter.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut notified = pin!(self.inner.notify.notified());
        // Register before checking the flag so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken").field("is_cancelled", &self.is_cancelled()).finish()
    }
}

// ============================================================================
// SECTION: Render Context
// ============================================================================

/// Render-scoped resolution state.
///
/// # Invariants
/// - Owned by a single render; not `Clone`.
#[derive(Debug, Default)]
pub struct RenderContext {
    /// Cancellation token for the render.
    cancel: CancellationToken,
    /// Optional HTTP client used instead of the source's own client.
    http_client: Option<Client>,
    /// Extra headers keyed by normalized datasource URI.
    extra_headers: BTreeMap<String, HeaderSet>,
}

impl RenderContext {
    /// Creates a context with a fresh cancellation token and no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an HTTP client override.
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Installs extra headers for requests to `uri`.
    ///
    /// Headers for the same URI accumulate in call order.
    #[must_use]
    pub fn with_extra_headers(mut self, uri: &str, headers: HeaderSet) -> Self {
        let slot = self.extra_headers.entry(normalize_uri_key(uri)).or_default();
        for entry in headers.entries() {
            slot.push(entry.name.clone(), entry.values.iter().cloned());
        }
        self
    }

    /// Uses the provided cancellation token instead of a fresh one.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the render's cancellation token.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels the render.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the render has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the HTTP client override, if any.
    #[must_use]
    pub const fn http_client(&self) -> Option<&Client> {
        self.http_client.as_ref()
    }

    /// Returns the extra headers registered for `uri`, if any.
    #[must_use]
    pub fn extra_headers_for(&self, uri: &Url) -> Option<&HeaderSet> {
        self.extra_headers.get(uri.as_str())
    }
}

/// Normalizes a URI string into the key used by the extra-header table.
///
/// Unparseable input is used verbatim and therefore never matches a resolved
/// datasource URI.
fn normalize_uri_key(uri: &str) -> String {
    Url::parse(uri).map_or_else(|_| uri.to_string(), |url| url.to_string())
}
