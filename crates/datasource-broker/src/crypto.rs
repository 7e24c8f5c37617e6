// crates/datasource-broker/src/crypto.rs
// ============================================================================
// Module: Datasource Crypto Helper
// Description: Base64 blob framing around an external key service.
// Purpose: Encrypt and decrypt template values through a pluggable service.
// Dependencies: async-trait, base64, thiserror
// ============================================================================

//! ## Overview
//! The [`CryptoHelper`] never performs cryptography itself. It hands bytes to a
//! [`KeyService`] (a cloud KMS in production, a mock in tests) and frames the
//! opaque ciphertext as standard-alphabet, padded base64 text so it can live in
//! templates and configuration files.
//! Invariants:
//! - `decode_blob(&encode_blob(x)) == x` for every byte string.
//! - Non-canonical base64 (bad padding, stray trailing bits) is rejected.
//! - Key service failures are wrapped, never retried.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

// ============================================================================
// SECTION: Key Service
// ============================================================================

/// Errors reported by an external key service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyServiceError {
    /// The referenced key does not exist.
    #[error("key not found: {0}")]
    KeyNotFound(String),
    /// The caller may not use the key.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The service could not be reached or failed internally.
    #[error("key service unavailable: {0}")]
    Unavailable(String),
}

/// External encrypt/decrypt capability.
///
/// Ciphertext produced by [`KeyService::encrypt`] is self-describing: the
/// service identifies the key again during [`KeyService::decrypt`].
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Encrypts `plaintext` under `key_id`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyServiceError`] when the service rejects the request.
    async fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, KeyServiceError>;

    /// Decrypts `ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyServiceError`] when the service rejects the request.
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyServiceError>;
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by the crypto helper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Blob was not canonical base64, or plaintext was not UTF-8.
    #[error("decode failure: {0}")]
    Decode(String),
    /// Key service failed to encrypt.
    #[error("encryption with key {key_id} failed: {cause}")]
    EncryptionFailed {
        /// Key identifier that was requested.
        key_id: String,
        /// Key service failure.
        #[source]
        cause: KeyServiceError,
    },
    /// Key service failed to decrypt.
    #[error("decryption failed: {0}")]
    DecryptionFailed(#[source] KeyServiceError),
}

// ============================================================================
// SECTION: Blob Encoding
// ============================================================================

/// Encodes ciphertext as a standard, padded base64 blob.
#[must_use]
pub fn encode_blob(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes a standard, padded base64 blob.
///
/// # Errors
///
/// Returns [`CryptoError::Decode`] on an invalid alphabet, missing or extra
/// padding, or non-canonical trailing bits.
pub fn decode_blob(blob: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD.decode(blob.as_bytes()).map_err(|err| CryptoError::Decode(err.to_string()))
}

// ============================================================================
// SECTION: Crypto Helper
// ============================================================================

/// Encrypts and decrypts template values through a [`KeyService`].
#[derive(Clone)]
pub struct CryptoHelper {
    /// External key service.
    service: Arc<dyn KeyService>,
}

impl CryptoHelper {
    /// Creates a helper backed by `service`.
    #[must_use]
    pub fn new(service: impl KeyService + 'static) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    /// Creates a helper from a shared service handle.
    #[must_use]
    pub fn from_shared(service: Arc<dyn KeyService>) -> Self {
        Self {
            service,
        }
    }

    /// Encrypts text and returns the ciphertext as a base64 blob.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] when the key service fails.
    pub async fn encrypt(&self, key_id: &str, plaintext: &str) -> Result<String, CryptoError> {
        self.encrypt_bytes(key_id, plaintext.as_bytes()).await
    }

    /// Encrypts bytes and returns the ciphertext as a base64 blob.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] when the key service fails.
    pub async fn encrypt_bytes(
        &self,
        key_id: &str,
        plaintext: &[u8],
    ) -> Result<String, CryptoError> {
        let ciphertext = self.service.encrypt(key_id, plaintext).await.map_err(|cause| {
            CryptoError::EncryptionFailed {
                key_id: key_id.to_string(),
                cause,
            }
        })?;
        Ok(encode_blob(&ciphertext))
    }

    /// Decrypts a base64 blob into UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Decode`] for malformed blobs or non-UTF-8
    /// plaintext, and [`CryptoError::DecryptionFailed`] when the key service
    /// fails.
    pub async fn decrypt(&self, blob: &str) -> Result<String, CryptoError> {
        let plaintext = self.decrypt_bytes(blob).await?;
        String::from_utf8(plaintext).map_err(|err| CryptoError::Decode(err.to_string()))
    }

    /// Decrypts a base64 blob into raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Decode`] for malformed blobs and
    /// [`CryptoError::DecryptionFailed`] when the key service fails.
    pub async fn decrypt_bytes(&self, blob: &str) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = decode_blob(blob)?;
        self.service.decrypt(&ciphertext).await.map_err(CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for CryptoHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoHelper").finish_non_exhaustive()
    }
}
