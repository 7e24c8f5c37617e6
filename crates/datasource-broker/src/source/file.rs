// crates/datasource-broker/src/source/file.rs
// ============================================================================
// Module: Datasource File Source
// Description: File-backed source for datasource resolution.
// Purpose: Read datasource bytes from local files.
// Dependencies: tokio, url
// ============================================================================

//! ## Overview
//! `FileSource` resolves `file://` URIs into payload bytes. A root directory can
//! be configured to fail closed on path traversal. The content type is
//! inferred from the file extension so structured files decode without a
//! `?type=` hint.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use url::Url;

use crate::source::DEFAULT_MAX_SOURCE_BYTES;
use crate::source::FetchRequest;
use crate::source::Source;
use crate::source::SourceError;
use crate::source::SourcePayload;
use crate::source::enforce_max_bytes;

// ============================================================================
// SECTION: File Source
// ============================================================================

/// File-backed datasource source.
#[derive(Debug, Clone)]
pub struct FileSource {
    /// Optional root directory for path traversal protection.
    root: Option<PathBuf>,
    /// Maximum accepted file size.
    max_bytes: usize,
}

impl FileSource {
    /// Creates a file source rooted at the provided directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            max_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }

    /// Creates a file source with no root restrictions.
    #[must_use]
    pub const fn unrestricted() -> Self {
        Self {
            root: None,
            max_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }

    /// Overrides the maximum accepted file size.
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Resolves a file URI into a local path.
    async fn resolve_path(&self, url: &Url) -> Result<PathBuf, SourceError> {
        if url.scheme() != "file" {
            return Err(SourceError::UnsupportedScheme(url.scheme().to_string()));
        }
        let path = url
            .to_file_path()
            .map_err(|()| SourceError::InvalidUri("failed to map file url to path".to_string()))?;

        if let Some(root) = &self.root {
            let root = tokio::fs::canonicalize(root).await.map_err(io_error)?;
            let resolved = tokio::fs::canonicalize(&path).await.map_err(io_error)?;
            if !resolved.starts_with(&root) {
                return Err(SourceError::InvalidUri(
                    "file path escapes configured root".to_string(),
                ));
            }
            return Ok(resolved);
        }

        Ok(path)
    }

    /// Reads a file, rejecting it when it exceeds the size cap.
    async fn read_with_limit(&self, path: &Path) -> Result<Vec<u8>, SourceError> {
        let metadata = tokio::fs::metadata(path).await.map_err(io_error)?;
        if !metadata.is_file() {
            return Err(SourceError::NotFound(format!("not a file: {}", path.display())));
        }
        let declared = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        enforce_max_bytes(declared, self.max_bytes)?;
        let bytes = tokio::fs::read(path).await.map_err(io_error)?;
        enforce_max_bytes(bytes.len(), self.max_bytes)?;
        Ok(bytes)
    }

    /// Resolves and reads the file behind `url`.
    async fn load(&self, url: &Url) -> Result<SourcePayload, SourceError> {
        let path = self.resolve_path(url).await?;
        let bytes = self.read_with_limit(&path).await?;
        Ok(SourcePayload {
            bytes,
            content_type: content_type_for_path(&path).map(str::to_string),
        })
    }
}

#[async_trait]
impl Source for FileSource {
    async fn fetch(&self, request: &FetchRequest<'_>) -> Result<SourcePayload, SourceError> {
        let cancel = request.context.cancellation();
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        tokio::select! {
            biased;
            result = self.load(request.uri) => result,
            () = cancel.cancelled() => Err(SourceError::Cancelled),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps filesystem errors to source errors.
fn io_error(err: io::Error) -> SourceError {
    if err.kind() == ErrorKind::NotFound {
        SourceError::NotFound(err.to_string())
    } else {
        SourceError::Io(err.to_string())
    }
}

/// Infers a content type from a file extension.
fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "json" => Some("application/json"),
        "yaml" | "yml" => Some("application/yaml"),
        "toml" => Some("application/toml"),
        "csv" => Some("text/csv"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}
