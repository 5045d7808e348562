//! Media encryption using AES-256-GCM
//!
//! Media is encrypted on the sending device with a fresh key per item. Only
//! ciphertext and [`EncryptionMetadata`] leave the device; the key travels to
//! the recipient through a separate channel.

#[cfg(feature = "crypto")]
mod aes;
mod key;

#[cfg(feature = "crypto")]
pub use aes::AesGcmCipher;
pub use key::EncryptionKey;

use crate::encoding::{base64_to_bytes, bytes_to_base64};
use crate::{ImmoError, Result};
use immo_types::{AuthTag, EncryptionMetadata, Iv};
use std::sync::Arc;

/// Payloads larger than this are encrypted on the blocking pool
pub const OFFLOAD_THRESHOLD: usize = 256 * 1024;

/// Authenticated encryption of opaque media payloads
pub trait MediaCipher: Send + Sync {
    /// Generate a fresh 256-bit key
    fn generate_key(&self) -> Result<EncryptionKey>;

    /// Generate a fresh 96-bit IV
    fn generate_iv(&self) -> Result<Iv>;

    /// Encrypt `plaintext` under `key`, or under a newly generated key when
    /// `None`. A new IV is generated for every call.
    fn encrypt(&self, plaintext: &[u8], key: Option<EncryptionKey>) -> Result<EncryptedMedia>;

    /// Decrypt and authenticate. Lengths are checked before any cryptographic
    /// work; every authentication failure yields [`ImmoError::DecryptionFailed`].
    fn decrypt(&self, ciphertext: &[u8], iv: &[u8], key: &[u8], auth_tag: &[u8])
        -> Result<Vec<u8>>;

    /// Decrypt using persisted metadata and a key received from the sender
    fn decrypt_with_metadata(
        &self,
        ciphertext: &[u8],
        metadata: &EncryptionMetadata,
        key: &EncryptionKey,
    ) -> Result<Vec<u8>> {
        let iv = base64_to_bytes(&metadata.iv)?;
        let auth_tag = base64_to_bytes(&metadata.auth_tag)?;

        if ciphertext.len() as u64 != metadata.original_size {
            return Err(ImmoError::DecryptionFailed);
        }

        self.decrypt(ciphertext, &iv, key.as_bytes(), &auth_tag)
    }
}

/// Full result of an encryption, including the key.
///
/// Use [`EncryptedMedia::into_parts`] to separate the key from the
/// persistable [`SealedMedia`] before anything is stored or sent.
pub struct EncryptedMedia {
    pub ciphertext: Vec<u8>,
    pub iv: Iv,
    pub auth_tag: AuthTag,
    key: EncryptionKey,
}

impl EncryptedMedia {
    pub(crate) fn new(ciphertext: Vec<u8>, iv: Iv, auth_tag: AuthTag, key: EncryptionKey) -> Self {
        Self {
            ciphertext,
            iv,
            auth_tag,
            key,
        }
    }

    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    pub fn metadata(&self, mime_type: impl Into<String>, duration: Option<f64>) -> EncryptionMetadata {
        build_metadata(&self.ciphertext, &self.iv, &self.auth_tag, mime_type.into(), duration)
    }

    pub fn into_parts(self) -> (EncryptionKey, SealedMedia) {
        let sealed = SealedMedia {
            ciphertext: self.ciphertext,
            iv: self.iv,
            auth_tag: self.auth_tag,
        };
        (self.key, sealed)
    }
}

impl std::fmt::Debug for EncryptedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedMedia")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("iv", &bytes_to_base64(&self.iv))
            .field("auth_tag", &bytes_to_base64(&self.auth_tag))
            .field("key", &self.key)
            .finish()
    }
}

/// Ciphertext plus the non-secret values needed to open it
#[derive(Debug, Clone)]
pub struct SealedMedia {
    pub ciphertext: Vec<u8>,
    pub iv: Iv,
    pub auth_tag: AuthTag,
}

impl SealedMedia {
    pub fn metadata(&self, mime_type: impl Into<String>, duration: Option<f64>) -> EncryptionMetadata {
        build_metadata(&self.ciphertext, &self.iv, &self.auth_tag, mime_type.into(), duration)
    }
}

fn build_metadata(
    ciphertext: &[u8],
    iv: &Iv,
    auth_tag: &AuthTag,
    mime_type: String,
    duration: Option<f64>,
) -> EncryptionMetadata {
    // GCM adds no padding, so the ciphertext length is the plaintext length
    EncryptionMetadata {
        iv: bytes_to_base64(iv),
        auth_tag: bytes_to_base64(auth_tag),
        original_size: ciphertext.len() as u64,
        mime_type,
        duration,
    }
}

/// Encrypt, moving large payloads off the async executor.
pub async fn encrypt_offloaded(
    cipher: Arc<dyn MediaCipher>,
    plaintext: Vec<u8>,
    key: Option<EncryptionKey>,
) -> Result<EncryptedMedia> {
    if plaintext.len() <= OFFLOAD_THRESHOLD {
        return cipher.encrypt(&plaintext, key);
    }

    tokio::task::spawn_blocking(move || cipher.encrypt(&plaintext, key))
        .await
        .map_err(|e| ImmoError::CryptoUnavailable(format!("cipher task failed: {}", e)))?
}

/// Decrypt, moving large payloads off the async executor.
pub async fn decrypt_offloaded(
    cipher: Arc<dyn MediaCipher>,
    ciphertext: Vec<u8>,
    iv: Iv,
    key: EncryptionKey,
    auth_tag: AuthTag,
) -> Result<Vec<u8>> {
    if ciphertext.len() <= OFFLOAD_THRESHOLD {
        return cipher.decrypt(&ciphertext, &iv, key.as_bytes(), &auth_tag);
    }

    tokio::task::spawn_blocking(move || cipher.decrypt(&ciphertext, &iv, key.as_bytes(), &auth_tag))
        .await
        .map_err(|e| ImmoError::CryptoUnavailable(format!("cipher task failed: {}", e)))?
}
