// crates/datasource-broker/src/registry.rs
// ============================================================================
// Module: Datasource Source Registry
// Description: Render-scoped table of datasource aliases.
// Purpose: Map template aliases to resolved source definitions.
// Dependencies: url
// ============================================================================

//! ## Overview
//! A [`SourceRegistry`] is built for one render and handed to the broker. Each
//! [`SourceDefinition`] records its [`SchemeKind`] at registration time so
//! dispatch never re-inspects the URI.
//! Invariants:
//! - Aliases are unique; a second registration is a configuration error.
//! - Definitions are immutable once registered.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use url::Url;

use crate::error::ResolveError;
use crate::headers::HeaderSet;
use crate::source::SchemeKind;

// ============================================================================
// SECTION: Source Definition
// ============================================================================

/// A named datasource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDefinition {
    /// Alias used by templates.
    alias: String,
    /// Datasource URI.
    uri: Url,
    /// Configured request headers.
    headers: HeaderSet,
    /// Backend family, resolved from the URI scheme.
    scheme: SchemeKind,
}

impl SourceDefinition {
    /// Creates a definition with no headers.
    #[must_use]
    pub fn new(alias: impl Into<String>, uri: Url) -> Self {
        let scheme = SchemeKind::from_url(&uri);
        Self {
            alias: alias.into(),
            uri,
            headers: HeaderSet::new(),
            scheme,
        }
    }

    /// Parses `uri` and creates a definition with no headers.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Config`] when `uri` is not an absolute URI.
    pub fn parse(alias: impl Into<String>, uri: &str) -> Result<Self, ResolveError> {
        let alias = alias.into();
        let uri = Url::parse(uri).map_err(|err| {
            ResolveError::Config(format!("datasource {alias}: invalid url: {err}"))
        })?;
        Ok(Self::new(alias, uri))
    }

    /// Replaces the configured headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderSet) -> Self {
        self.headers = headers;
        self
    }

    /// Appends one configured header entry.
    #[must_use]
    pub fn with_header<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers.push(name, values);
        self
    }

    /// Returns the alias.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Returns the URI.
    #[must_use]
    pub const fn uri(&self) -> &Url {
        &self.uri
    }

    /// Returns the configured headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    /// Returns the backend family.
    #[must_use]
    pub const fn scheme(&self) -> &SchemeKind {
        &self.scheme
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Render-scoped alias table.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    /// Definitions keyed by alias.
    sources: BTreeMap<String, SourceDefinition>,
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
        }
    }

    /// Builds a registry from definitions.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Config`] on the first duplicate alias.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = SourceDefinition>,
    ) -> Result<Self, ResolveError> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// Registers a definition.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Config`] when the alias is empty or already
    /// registered.
    pub fn register(&mut self, definition: SourceDefinition) -> Result<(), ResolveError> {
        if definition.alias.trim().is_empty() {
            return Err(ResolveError::Config("datasource alias must not be empty".to_string()));
        }
        if self.sources.contains_key(&definition.alias) {
            return Err(ResolveError::Config(format!(
                "datasource alias already registered: {}",
                definition.alias
            )));
        }
        self.sources.insert(definition.alias.clone(), definition);
        Ok(())
    }

    /// Returns the definition for `alias`.
    #[must_use]
    pub fn get(&self, alias: &str) -> Option<&SourceDefinition> {
        self.sources.get(alias)
    }

    /// Returns true when `alias` is registered.
    #[must_use]
    pub fn contains(&self, alias: &str) -> bool {
        self.sources.contains_key(alias)
    }

    /// Returns registered aliases in sorted order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Returns the number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
