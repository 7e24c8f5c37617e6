// crates/datasource-broker/src/headers.rs
// ============================================================================
// Module: Datasource Header Merge
// Description: Ordered multi-valued header sets and deterministic merging.
// Purpose: Combine default, configured, and call-site headers per request.
// Dependencies: reqwest
// ============================================================================

//! ## Overview
//! [`HeaderSet`] is an ordered `name -> [value]` multi-map. Unlike an HTTP
//! header map it keeps entries whose value list is empty, because an empty
//! configured list is how a source suppresses a default header.
//! [`merge_headers`] folds three layers into the set that is sent:
//! defaults, the source's configured headers, and per-render extra headers.
//! Invariants:
//! - Header names compare case-insensitively.
//! - Merging is pure; output is ordered by lowercase name.
//! - Merged output never contains an entry with an empty value list.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;

// ============================================================================
// SECTION: Header Set
// ============================================================================

/// Single header entry with its values in declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    /// Header name as declared.
    pub name: String,
    /// Header values in declared order; may be empty.
    pub values: Vec<String>,
}

/// Ordered multi-valued header set.
///
/// # Invariants
/// - Entries keep declaration order.
/// - Repeated names are allowed; lookups match case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    /// Header entries in declaration order.
    entries: Vec<HeaderEntry>,
}

impl HeaderSet {
    /// Creates an empty header set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns the set with an additional entry appended.
    #[must_use]
    pub fn with<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(name, values);
        self
    }

    /// Appends an entry.
    pub fn push<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.push(HeaderEntry {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
    }

    /// Returns the entries in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[HeaderEntry] {
        &self.entries
    }

    /// Iterates over `(name, values)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|entry| (entry.name.as_str(), entry.values.as_slice()))
    }

    /// Returns all values declared for `name`, across repeated entries.
    #[must_use]
    pub fn get(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| entry.name.eq_ignore_ascii_case(name))
            .flat_map(|entry| entry.values.iter().map(String::as_str))
            .collect()
    }

    /// Returns true when an entry for `name` exists, even with no values.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    /// Returns the number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the set has no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a deterministic signature used in cache keys.
    ///
    /// Names are lowercased and every component is length-prefixed so
    /// distinct sets cannot collide through concatenation.
    #[must_use]
    pub fn signature(&self) -> String {
        let mut signature = String::new();
        for entry in &self.entries {
            let name = entry.name.to_ascii_lowercase();
            signature.push_str(&format!("{}:{name}={};", name.len(), entry.values.len()));
            for value in &entry.values {
                signature.push_str(&format!("{}:{value};", value.len()));
            }
        }
        signature
    }
}

impl<'a> IntoIterator for &'a HeaderSet {
    type IntoIter = std::slice::Iter<'a, HeaderEntry>;
    type Item = &'a HeaderEntry;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// ============================================================================
// SECTION: Merge
// ============================================================================

/// Accumulated state for one lowercase header key during a merge.
#[derive(Debug, Default)]
struct MergedKey {
    /// Canonical casing for the output.
    name: Option<String>,
    /// Values from the configured and extra layers.
    values: Vec<String>,
    /// True once the configured or extra layer mentioned the key.
    explicit: bool,
}

/// Merges default, configured, and extra headers into one header set.
///
/// - Configured values come first, followed by extra values.
/// - Defaults apply only to keys that neither configured nor extra mention,
///   so a configured empty value list suppresses the default.
/// - Keys with no remaining values are omitted.
/// - The output name uses the first casing seen in configured, then extra,
///   then defaults.
#[must_use]
pub fn merge_headers(
    defaults: Option<&HeaderSet>,
    configured: Option<&HeaderSet>,
    extra: Option<&HeaderSet>,
) -> HeaderSet {
    let mut merged: BTreeMap<String, MergedKey> = BTreeMap::new();

    for layer in [configured, extra].into_iter().flatten() {
        for entry in layer {
            let slot = merged.entry(entry.name.to_ascii_lowercase()).or_default();
            slot.explicit = true;
            if slot.name.is_none() {
                slot.name = Some(entry.name.clone());
            }
            slot.values.extend(entry.values.iter().cloned());
        }
    }

    if let Some(defaults) = defaults {
        for entry in defaults {
            let slot = merged.entry(entry.name.to_ascii_lowercase()).or_default();
            if slot.explicit {
                continue;
            }
            if slot.name.is_none() {
                slot.name = Some(entry.name.clone());
            }
            slot.values.extend(entry.values.iter().cloned());
        }
    }

    let mut output = HeaderSet::new();
    for (key, slot) in merged {
        if slot.values.is_empty() {
            continue;
        }
        output.push(slot.name.unwrap_or(key), slot.values);
    }
    output
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Returns true when `name` is a valid HTTP header name.
#[must_use]
pub fn is_valid_header_name(name: &str) -> bool {
    HeaderName::from_bytes(name.as_bytes()).is_ok()
}

/// Returns true when `value` is a valid HTTP header value.
#[must_use]
pub fn is_valid_header_value(value: &str) -> bool {
    HeaderValue::from_str(value).is_ok()
}
