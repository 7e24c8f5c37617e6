// crates/datasource-config/src/config.rs
// ============================================================================
// Module: Datasource Configuration
// Description: Configuration loading and validation for datasource renders.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: datasource-broker, serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every alias, URL, and header is validated before any broker is built, so a
//! render never starts with a table it cannot serve.
//! Invariants:
//! - Aliases are unique, non-empty, and free of whitespace.
//! - Every configured URL is absolute.
//! - Every header name and value is valid on the wire.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use datasource_broker::Broker;
use datasource_broker::BrokerBuilder;
use datasource_broker::FileSource;
use datasource_broker::HeaderSet;
use datasource_broker::HttpSource;
use datasource_broker::HttpSourceConfig;
use datasource_broker::RenderContext;
use datasource_broker::SchemeKind;
use datasource_broker::SourceDefinition;
use datasource_broker::SourceRegistry;
use datasource_broker::is_valid_header_name;
use datasource_broker::is_valid_header_value;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "datasources.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "DATASOURCE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Minimum HTTP timeout in milliseconds.
pub(crate) const MIN_HTTP_TIMEOUT_MS: u64 = 100;
/// Maximum HTTP timeout in milliseconds.
pub(crate) const MAX_HTTP_TIMEOUT_MS: u64 = 300_000;
/// Upper bound for `http.max_response_bytes`.
pub(crate) const MAX_RESPONSE_BYTES_LIMIT: usize = 256 * 1024 * 1024;
/// Upper bound for `http.error_excerpt_bytes`.
pub(crate) const MAX_ERROR_EXCERPT_BYTES: usize = 64 * 1024;
/// Maximum alias length.
pub(crate) const MAX_ALIAS_LENGTH: usize = 128;
/// Maximum number of configured sources.
pub(crate) const MAX_SOURCES: usize = 1024;
/// Maximum number of header entries in one header list.
pub(crate) const MAX_HEADER_ENTRIES: usize = 64;
/// Maximum number of values for one header entry.
pub(crate) const MAX_HEADER_VALUES: usize = 32;
/// User agent sent when `http.user_agent` is not configured.
pub const DEFAULT_USER_AGENT: &str = concat!("datasource-broker/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Datasource configuration for one render.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasourceConfig {
    /// HTTP backend configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// File backend configuration.
    #[serde(default)]
    pub file: FileConfig,
    /// Headers applied to every request that does not mention them.
    #[serde(default)]
    pub default_headers: Vec<HeaderConfig>,
    /// Aliased datasource definitions.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Per-URL headers layered over configured and default headers.
    #[serde(default)]
    pub extra_headers: Vec<ExtraHeadersConfig>,
}

impl DatasourceConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.http.validate()?;
        self.file.validate()?;
        validate_header_list("default_headers", &self.default_headers)?;
        if self.sources.len() > MAX_SOURCES {
            return Err(ConfigError::Invalid(format!(
                "sources exceeds max entries ({MAX_SOURCES})"
            )));
        }
        let mut aliases = BTreeSet::new();
        for source in &self.sources {
            source.validate()?;
            if !aliases.insert(source.alias.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate datasource alias: {}",
                    source.alias
                )));
            }
        }
        for extra in &self.extra_headers {
            extra.validate()?;
        }
        Ok(())
    }

    /// Returns the aliased definitions in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a source URL does not parse.
    pub fn source_definitions(&self) -> Result<Vec<SourceDefinition>, ConfigError> {
        self.sources.iter().map(SourceConfig::to_definition).collect()
    }

    /// Returns the alias table for a render.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a definition is invalid or an alias repeats.
    pub fn registry(&self) -> Result<SourceRegistry, ConfigError> {
        SourceRegistry::from_definitions(self.source_definitions()?)
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Returns the HTTP source limits.
    #[must_use]
    pub const fn http_source_config(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            timeout: Some(Duration::from_millis(self.http.timeout_ms)),
            max_response_bytes: self.http.max_response_bytes,
            error_excerpt_bytes: self.http.error_excerpt_bytes,
        }
    }

    /// Returns the default header layer.
    ///
    /// The configured user agent is prepended unless `default_headers` already
    /// names `User-Agent`. An empty `http.user_agent` sends none.
    #[must_use]
    pub fn default_headers(&self) -> HeaderSet {
        let mut headers = HeaderSet::new();
        let user_agent = self.http.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let configured = header_set(&self.default_headers);
        if !user_agent.is_empty() && !configured.contains("User-Agent") {
            headers.push("User-Agent", [user_agent]);
        }
        for entry in configured.entries() {
            headers.push(entry.name.clone(), entry.values.iter().cloned());
        }
        headers
    }

    /// Returns the per-URL extra header layers in declaration order.
    #[must_use]
    pub fn extra_headers(&self) -> Vec<(String, HeaderSet)> {
        self.extra_headers
            .iter()
            .map(|extra| (extra.url.clone(), header_set(&extra.headers)))
            .collect()
    }

    /// Installs the configured extra headers on a render context.
    #[must_use]
    pub fn apply_extra_headers(&self, mut ctx: RenderContext) -> RenderContext {
        for (url, headers) in self.extra_headers() {
            ctx = ctx.with_extra_headers(&url, headers);
        }
        ctx
    }

    /// Returns a fresh render context carrying the configured extra headers.
    #[must_use]
    pub fn render_context(&self) -> RenderContext {
        self.apply_extra_headers(RenderContext::new())
    }

    /// Returns a broker builder wired with the configured backends and tables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the registry is invalid or the HTTP client
    /// cannot be constructed.
    pub fn broker_builder(&self) -> Result<BrokerBuilder, ConfigError> {
        let http = HttpSource::with_config(self.http_source_config())
            .map_err(|err| ConfigError::Invalid(format!("http client: {err}")))?;
        let mut builder = Broker::builder()
            .source(SchemeKind::Http, http)
            .registry(self.registry()?)
            .default_headers(self.default_headers());
        if self.file.enabled {
            let file = self
                .file
                .root
                .as_ref()
                .map_or_else(FileSource::unrestricted, |root| FileSource::new(root.clone()));
            builder = builder.source(SchemeKind::File, file.with_max_bytes(self.file.max_bytes));
        }
        Ok(builder)
    }

    /// Builds a broker for one render.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] under the same conditions as
    /// [`Self::broker_builder`].
    pub fn build_broker(&self) -> Result<Broker, ConfigError> {
        self.broker_builder().map(BrokerBuilder::build)
    }
}

// ============================================================================
// SECTION: HTTP Configuration
// ============================================================================

/// HTTP backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
    /// User agent default header; empty disables it.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Maximum accepted response body size in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    /// Maximum bytes of an error body kept for diagnostics.
    #[serde(default = "default_error_excerpt_bytes")]
    pub error_excerpt_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
            user_agent: None,
            max_response_bytes: default_max_response_bytes(),
            error_excerpt_bytes: default_error_excerpt_bytes(),
        }
    }
}

impl HttpConfig {
    /// Validates HTTP limits.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_HTTP_TIMEOUT_MS..=MAX_HTTP_TIMEOUT_MS).contains(&self.timeout_ms) {
            return Err(ConfigError::Invalid(format!(
                "http.timeout_ms must be between {MIN_HTTP_TIMEOUT_MS} and {MAX_HTTP_TIMEOUT_MS}"
            )));
        }
        if self.max_response_bytes == 0 || self.max_response_bytes > MAX_RESPONSE_BYTES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "http.max_response_bytes must be between 1 and {MAX_RESPONSE_BYTES_LIMIT}"
            )));
        }
        if self.error_excerpt_bytes > MAX_ERROR_EXCERPT_BYTES {
            return Err(ConfigError::Invalid(format!(
                "http.error_excerpt_bytes must be at most {MAX_ERROR_EXCERPT_BYTES}"
            )));
        }
        if let Some(user_agent) = &self.user_agent
            && !user_agent.is_empty()
            && !is_valid_header_value(user_agent)
        {
            return Err(ConfigError::Invalid(
                "http.user_agent is not a valid header value".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: File Configuration
// ============================================================================

/// File backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    /// Registers the `file://` backend. Off unless set; without a `root` an
    /// enabled backend reads any file the process can open.
    #[serde(default = "default_file_enabled")]
    pub enabled: bool,
    /// Optional root directory; paths outside it are rejected.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Maximum accepted file size in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_bytes: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: default_file_enabled(),
            root: None,
            max_bytes: default_max_response_bytes(),
        }
    }
}

impl FileConfig {
    /// Validates file backend settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(root) = &self.root {
            validate_path_string("file.root", &root.to_string_lossy())?;
        }
        if self.max_bytes == 0 || self.max_bytes > MAX_RESPONSE_BYTES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "file.max_bytes must be between 1 and {MAX_RESPONSE_BYTES_LIMIT}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Header and Source Entries
// ============================================================================

/// One configured header. An empty `values` list suppresses a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeaderConfig {
    /// Header name.
    pub name: String,
    /// Header values in send order.
    #[serde(default)]
    pub values: Vec<String>,
}

impl HeaderConfig {
    /// Validates the header name and values.
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if !is_valid_header_name(&self.name) {
            return Err(ConfigError::Invalid(format!(
                "{field}: invalid header name: {:?}",
                self.name
            )));
        }
        if self.values.len() > MAX_HEADER_VALUES {
            return Err(ConfigError::Invalid(format!(
                "{field}: header {} exceeds max values ({MAX_HEADER_VALUES})",
                self.name
            )));
        }
        if self.values.iter().any(|value| !is_valid_header_value(value)) {
            return Err(ConfigError::Invalid(format!(
                "{field}: invalid value for header {}",
                self.name
            )));
        }
        Ok(())
    }
}

/// One aliased datasource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    /// Alias referenced by templates.
    pub alias: String,
    /// Absolute datasource URL.
    pub url: String,
    /// Headers configured for this source.
    #[serde(default)]
    pub headers: Vec<HeaderConfig>,
}

impl SourceConfig {
    /// Validates alias, URL, and headers.
    fn validate(&self) -> Result<(), ConfigError> {
        let alias = &self.alias;
        if alias.is_empty() {
            return Err(ConfigError::Invalid("sources.alias must be non-empty".to_string()));
        }
        if alias.len() > MAX_ALIAS_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "sources.alias exceeds max length ({MAX_ALIAS_LENGTH})"
            )));
        }
        if alias.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "sources.alias must not contain whitespace: {alias:?}"
            )));
        }
        parse_url(&format!("sources.{alias}.url"), &self.url)?;
        validate_header_list(&format!("sources.{alias}.headers"), &self.headers)
    }

    /// Converts the entry into a broker definition.
    fn to_definition(&self) -> Result<SourceDefinition, ConfigError> {
        let url = parse_url(&format!("sources.{}.url", self.alias), &self.url)?;
        Ok(SourceDefinition::new(self.alias.clone(), url).with_headers(header_set(&self.headers)))
    }
}

/// Headers layered onto every request for one URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtraHeadersConfig {
    /// Absolute URL the headers apply to.
    pub url: String,
    /// Headers added for the URL.
    #[serde(default)]
    pub headers: Vec<HeaderConfig>,
}

impl ExtraHeadersConfig {
    /// Validates the URL and headers.
    fn validate(&self) -> Result<(), ConfigError> {
        parse_url("extra_headers.url", &self.url)?;
        validate_header_list(&format!("extra_headers[{}]", self.url), &self.headers)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the caller or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a header list.
fn validate_header_list(field: &str, headers: &[HeaderConfig]) -> Result<(), ConfigError> {
    if headers.len() > MAX_HEADER_ENTRIES {
        return Err(ConfigError::Invalid(format!(
            "{field} exceeds max entries ({MAX_HEADER_ENTRIES})"
        )));
    }
    headers.iter().try_for_each(|header| header.validate(field))
}

/// Parses an absolute URL.
fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|err| ConfigError::Invalid(format!("{field}: invalid url: {err}")))
}

/// Converts configured headers into a header set, keeping empty lists.
fn header_set(headers: &[HeaderConfig]) -> HeaderSet {
    let mut set = HeaderSet::new();
    for header in headers {
        set.push(header.name.clone(), header.values.iter().cloned());
    }
    set
}

/// Default HTTP timeout in milliseconds.
const fn default_http_timeout_ms() -> u64 {
    30_000
}

/// Default response size cap in bytes.
const fn default_max_response_bytes() -> usize {
    datasource_broker::DEFAULT_MAX_SOURCE_BYTES
}

/// Default error excerpt size in bytes.
const fn default_error_excerpt_bytes() -> usize {
    256
}

/// File backend is registered only when enabled explicitly.
const fn default_file_enabled() -> bool {
    false
}
