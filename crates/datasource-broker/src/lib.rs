// crates/datasource-broker/src/lib.rs
// ============================================================================
// Module: Datasource Broker Library
// Description: Alias and URI datasource resolution for template renders.
// Purpose: Resolve, fetch, decode, and memoize datasources for one render.
// Dependencies: async-trait, base64, reqwest, serde_json, tokio, url
// ============================================================================

//! ## Overview
//! Datasource Broker turns a datasource alias (or a raw URI) referenced by a
//! template into a decoded [`ResolvedValue`]. The [`Broker`] resolves the alias
//! through a render-scoped [`SourceRegistry`], merges headers with
//! [`merge_headers`], consults the render's [`ResolutionCache`], and routes
//! misses to the [`Source`] registered for the URI's [`SchemeKind`].
//! Encrypted values are handled separately by the [`CryptoHelper`], which wraps
//! an external [`KeyService`].
//! Invariants:
//! - Every resolution call receives an explicit [`RenderContext`].
//! - Failures are never cached and propagate without fallback values.
//! - Concurrent requests for the same cache key share a single fetch.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod broker;
pub mod cache;
pub mod context;
pub mod crypto;
pub mod error;
pub mod headers;
pub mod registry;
pub mod source;
pub mod telemetry;
pub mod value;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use broker::Broker;
pub use broker::BrokerBuilder;
pub use cache::CacheEntry;
pub use cache::CacheKey;
pub use cache::ResolutionCache;
pub use context::CancellationToken;
pub use context::RenderContext;
pub use crypto::CryptoError;
pub use crypto::CryptoHelper;
pub use crypto::KeyService;
pub use crypto::KeyServiceError;
pub use crypto::decode_blob;
pub use crypto::encode_blob;
pub use error::ResolveError;
pub use headers::HeaderEntry;
pub use headers::HeaderSet;
pub use headers::is_valid_header_name;
pub use headers::is_valid_header_value;
pub use headers::merge_headers;
pub use registry::SourceDefinition;
pub use registry::SourceRegistry;
pub use source::DEFAULT_MAX_SOURCE_BYTES;
pub use source::FetchRequest;
pub use source::FileSource;
pub use source::HttpSource;
pub use source::HttpSourceConfig;
pub use source::SchemeKind;
pub use source::Source;
pub use source::SourceError;
pub use source::SourcePayload;
pub use telemetry::CacheStatus;
pub use telemetry::JsonLinesObserver;
pub use telemetry::NoopObserver;
pub use telemetry::ResolutionEvent;
pub use telemetry::ResolutionObserver;
pub use telemetry::ResolutionOutcome;
pub use value::ResolvedValue;
pub use value::decode_payload;
