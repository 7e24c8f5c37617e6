// crates/datasource-broker/src/telemetry.rs
// ============================================================================
// Module: Datasource Resolution Telemetry
// Description: Structured resolution events and observer hooks.
// Purpose: Record each datasource resolution without coupling to a backend.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The broker reports one [`ResolutionEvent`] per resolution to its
//! [`ResolutionObserver`]. [`NoopObserver`] is the default;
//! [`JsonLinesObserver`] writes one JSON object per line to any writer.
//! Invariants:
//! - Header values never appear in events; they may carry credentials.
//! - Observers must not fail the resolution they describe.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;

// ============================================================================
// SECTION: Events
// ============================================================================

/// How the cache participated in a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Value was already cached.
    Hit,
    /// This call fetched the value.
    Miss,
    /// This call waited on another caller's in-flight fetch.
    Coalesced,
}

/// Result of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Value was resolved.
    Ok,
    /// Resolution failed.
    Error,
}

/// One datasource resolution as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionEvent {
    /// Alias or raw URI requested by the template.
    pub name: String,
    /// Resolved URI, when resolution got that far.
    pub uri: Option<String>,
    /// Scheme label of the resolved URI.
    pub scheme: Option<String>,
    /// Outcome of the resolution.
    pub outcome: ResolutionOutcome,
    /// Cache participation, when the cache was consulted.
    pub cache: Option<CacheStatus>,
    /// Content type of the resolved payload.
    pub content_type: Option<String>,
    /// Stable error label for failed resolutions.
    pub error_kind: Option<&'static str>,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
}

// ============================================================================
// SECTION: Observers
// ============================================================================

/// Receives resolution events.
pub trait ResolutionObserver: Send + Sync {
    /// Records a resolution event.
    fn record(&self, event: &ResolutionEvent);
}

/// Observer that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ResolutionObserver for NoopObserver {
    fn record(&self, _event: &ResolutionEvent) {}
}

/// Observer that writes events as JSON lines.
pub struct JsonLinesObserver<W: Write + Send> {
    /// Output writer for event records.
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesObserver<W> {
    /// Creates an observer writing to `writer`.
    pub const fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> ResolutionObserver for JsonLinesObserver<W> {
    fn record(&self, event: &ResolutionEvent) {
        let Ok(mut guard) = self.writer.lock() else {
            return;
        };
        // Write failures are dropped; telemetry never fails a render.
        if serde_json::to_writer(&mut *guard, event).is_ok() {
            let _ = guard.write_all(b"\n");
        }
        drop(guard);
    }
}
