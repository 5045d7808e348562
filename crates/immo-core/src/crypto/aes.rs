//! AES-256-GCM media cipher

use super::{EncryptedMedia, EncryptionKey, MediaCipher};
use crate::{ImmoError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use immo_types::{AuthTag, Iv, AUTH_TAG_LENGTH, IV_LENGTH, KEY_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;

/// AES-256-GCM with a 96-bit IV and 128-bit tag
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

impl AesGcmCipher {
    pub fn new() -> Self {
        Self
    }
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| ImmoError::CryptoUnavailable(format!("secure random source failed: {}", e)))
}

fn check_length(field: &'static str, value: &[u8], expected: usize) -> Result<()> {
    if value.len() != expected {
        return Err(ImmoError::InvalidInputLength {
            field,
            expected,
            got: value.len(),
        });
    }
    Ok(())
}

/// Encrypt with an explicit IV. Only `encrypt` and test fixtures call this,
/// so every production IV comes from `generate_iv`.
fn seal(key: &EncryptionKey, iv: &Iv, plaintext: &[u8]) -> Result<(Vec<u8>, AuthTag)> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| ImmoError::CryptoUnavailable(e.to_string()))?;

    let mut combined = cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| ImmoError::CryptoUnavailable("AES-GCM encryption failed".to_string()))?;

    // Output is ciphertext || tag
    let tag_start = combined.len() - AUTH_TAG_LENGTH;
    let mut auth_tag = [0u8; AUTH_TAG_LENGTH];
    auth_tag.copy_from_slice(&combined[tag_start..]);
    combined.truncate(tag_start);

    Ok((combined, auth_tag))
}

impl MediaCipher for AesGcmCipher {
    fn generate_key(&self) -> Result<EncryptionKey> {
        let mut key = [0u8; KEY_LENGTH];
        fill_random(&mut key)?;
        Ok(EncryptionKey::from_bytes(key))
    }

    fn generate_iv(&self) -> Result<Iv> {
        let mut iv = [0u8; IV_LENGTH];
        fill_random(&mut iv)?;
        Ok(iv)
    }

    fn encrypt(&self, plaintext: &[u8], key: Option<EncryptionKey>) -> Result<EncryptedMedia> {
        let key = match key {
            Some(key) => key,
            None => self.generate_key()?,
        };
        let iv = self.generate_iv()?;

        let (ciphertext, auth_tag) = seal(&key, &iv, plaintext)?;
        Ok(EncryptedMedia::new(ciphertext, iv, auth_tag, key))
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        key: &[u8],
        auth_tag: &[u8],
    ) -> Result<Vec<u8>> {
        check_length("iv", iv, IV_LENGTH)?;
        check_length("authTag", auth_tag, AUTH_TAG_LENGTH)?;
        check_length("key", key, KEY_LENGTH)?;

        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| ImmoError::DecryptionFailed)?;

        let mut combined = Vec::with_capacity(ciphertext.len() + AUTH_TAG_LENGTH);
        combined.extend_from_slice(ciphertext);
        combined.extend_from_slice(auth_tag);

        cipher
            .decrypt(Nonce::from_slice(iv), combined.as_slice())
            .map_err(|_| ImmoError::DecryptionFailed)
    }
}
