// crates/datasource-config/src/lib.rs
// ============================================================================
// Module: Datasource Config Library
// Description: Datasource configuration model, validation, and wiring.
// Purpose: Single source of truth for datasources.toml semantics.
// Dependencies: datasource-broker, serde, toml
// ============================================================================

//! ## Overview
//! `datasource-config` loads the datasource table for a render from TOML,
//! validates it fail-closed, and converts it into the registry, default
//! headers, HTTP limits, and per-URL extra headers used by
//! [`datasource_broker::Broker`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
