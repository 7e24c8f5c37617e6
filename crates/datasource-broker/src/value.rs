// crates/datasource-broker/src/value.rs
// ============================================================================
// Module: Datasource Values
// Description: Decoded datasource values and content-type driven decoding.
// Purpose: Turn fetched bytes into structured values for the rendering layer.
// Dependencies: serde_json, serde_yaml, toml
// ============================================================================

//! ## Overview
//! [`decode_payload`] picks a decoder from the payload's content type.
//! Structured formats (JSON, YAML, TOML) all decode into a
//! [`serde_json::Value`] so templates see one data model. Text stays text,
//! and bytes that are not valid UTF-8 are kept as raw bytes.
//! Invariants:
//! - Content types compare without parameters and case-insensitively.
//! - A declared structured type that fails to parse is an error, never a
//!   silent fallback to text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::source::SourceError;

// ============================================================================
// SECTION: Resolved Value
// ============================================================================

/// Decoded datasource value handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedValue {
    /// Structured value (JSON, YAML, or TOML payloads).
    Json(Value),
    /// UTF-8 text payload.
    Text(String),
    /// Raw bytes that are not valid UTF-8.
    Bytes(Vec<u8>),
}

impl ResolvedValue {
    /// Returns the structured value, if any.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) | Self::Bytes(_) => None,
        }
    }

    /// Returns the text value, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Json(_) | Self::Bytes(_) => None,
        }
    }

    /// Returns the raw bytes, if any.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes.as_slice()),
            Self::Json(_) | Self::Text(_) => None,
        }
    }

    /// Renders the value as text.
    ///
    /// Structured values are serialized as compact JSON; bytes are converted
    /// lossily.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text.clone(),
            Self::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

// ============================================================================
// SECTION: Content Types
// ============================================================================

/// Payload format selected from a content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadFormat {
    /// `application/json` and `+json` types.
    Json,
    /// YAML media types.
    Yaml,
    /// `application/toml`.
    Toml,
    /// `text/*`.
    Text,
    /// Anything else, or no content type.
    Unknown,
}

/// Strips parameters and lowercases a content type.
#[must_use]
pub fn normalize_content_type(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

/// Returns true when the content type is JSON or a `+json` suffix type.
#[must_use]
pub fn is_json_content_type(content_type: &str) -> bool {
    let normalized = normalize_content_type(content_type);
    normalized == "application/json" || normalized.ends_with("+json")
}

/// Classifies a content type into a payload format.
fn payload_format(content_type: Option<&str>) -> PayloadFormat {
    let Some(content_type) = content_type else {
        return PayloadFormat::Unknown;
    };
    let normalized = normalize_content_type(content_type);
    match normalized.as_str() {
        "application/json" => PayloadFormat::Json,
        "application/yaml" | "application/x-yaml" | "text/yaml" | "text/x-yaml" => {
            PayloadFormat::Yaml
        }
        "application/toml" => PayloadFormat::Toml,
        other if other.ends_with("+json") => PayloadFormat::Json,
        other if other.ends_with("+yaml") => PayloadFormat::Yaml,
        other if other.starts_with("text/") => PayloadFormat::Text,
        _ => PayloadFormat::Unknown,
    }
}

// ============================================================================
// SECTION: Decoding
// ============================================================================

/// Decodes fetched bytes according to their content type.
///
/// # Errors
///
/// Returns [`SourceError::Decode`] when a structured payload fails to parse
/// or a `text/*` payload is not valid UTF-8.
pub fn decode_payload(
    bytes: &[u8],
    content_type: Option<&str>,
) -> Result<ResolvedValue, SourceError> {
    match payload_format(content_type) {
        PayloadFormat::Json => serde_json::from_slice(bytes)
            .map(ResolvedValue::Json)
            .map_err(|err| SourceError::Decode(format!("invalid json: {err}"))),
        PayloadFormat::Yaml => serde_yaml::from_slice(bytes)
            .map(ResolvedValue::Json)
            .map_err(|err| SourceError::Decode(format!("invalid yaml: {err}"))),
        PayloadFormat::Toml => {
            let text = utf8_text(bytes)?;
            toml::from_str(&text)
                .map(ResolvedValue::Json)
                .map_err(|err| SourceError::Decode(format!("invalid toml: {err}")))
        }
        PayloadFormat::Text => utf8_text(bytes).map(ResolvedValue::Text),
        PayloadFormat::Unknown => Ok(String::from_utf8(bytes.to_vec()).map_or_else(
            |err| ResolvedValue::Bytes(err.into_bytes()),
            ResolvedValue::Text,
        )),
    }
}

/// Converts bytes to a UTF-8 string or fails with a decode error.
fn utf8_text(bytes: &[u8]) -> Result<String, SourceError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|err| SourceError::Decode(format!("invalid utf-8: {err}")))
}
