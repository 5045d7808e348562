//! Symmetric media key

use crate::encoding::{base64_to_bytes, bytes_to_base64};
use crate::{ImmoError, Result};
use immo_types::KEY_LENGTH;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 256-bit AES key for a single media item.
///
/// The key is wiped from memory on drop. It implements neither `Serialize`
/// nor a revealing `Debug`, so it cannot leak through a persistence or
/// logging path by accident; handing it to a peer requires an explicit
/// [`EncryptionKey::to_base64`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LENGTH]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LENGTH {
            return Err(ImmoError::InvalidInputLength {
                field: "key",
                expected: KEY_LENGTH,
                got: bytes.len(),
            });
        }

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Encode for the key exchange side channel.
    pub fn to_base64(&self) -> String {
        bytes_to_base64(&self.0)
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        let mut decoded = base64_to_bytes(text)?;
        let key = Self::from_slice(&decoded);
        decoded.zeroize();
        key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_round_trip() {
        let key = EncryptionKey::from_bytes([7u8; KEY_LENGTH]);
        let restored = EncryptionKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(restored.as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let short = bytes_to_base64(&[1u8; 16]);
        match EncryptionKey::from_base64(&short) {
            Err(ImmoError::InvalidInputLength {
                field,
                expected,
                got,
            }) => {
                assert_eq!(field, "key");
                assert_eq!(expected, 32);
                assert_eq!(got, 16);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_from_slice_and_malformed_base64() {
        tokio_test::assert_ok!(EncryptionKey::from_slice(&[0u8; KEY_LENGTH]));
        tokio_test::assert_err!(EncryptionKey::from_slice(&[0u8; KEY_LENGTH + 1]));

        let err = tokio_test::assert_err!(EncryptionKey::from_base64("not base64!"));
        assert!(matches!(err, ImmoError::Encoding(_)));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = EncryptionKey::from_bytes([0xAB; KEY_LENGTH]);
        let rendered = format!("{:?}", key);
        assert_eq!(rendered, "EncryptionKey(<redacted>)");
    }
}
