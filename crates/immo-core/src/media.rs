//! Encrypt-then-upload and download-then-decrypt for media attachments

use crate::crypto::{decrypt_offloaded, encrypt_offloaded, EncryptionKey, MediaCipher};
use crate::encoding::base64_to_bytes;
use crate::ports::MediaStore;
use crate::{ImmoError, Result};
use immo_types::{AuthTag, EncryptionMetadata, Iv};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of sealing and storing one media item
#[derive(Debug)]
pub struct StoredMedia {
    pub locator: String,
    pub metadata: EncryptionMetadata,
    /// Must be handed to the recipient out of band, never stored
    pub key: EncryptionKey,
}

pub struct MediaPipeline {
    cipher: Arc<dyn MediaCipher>,
    store: Arc<dyn MediaStore>,
}

impl MediaPipeline {
    pub fn new(cipher: Arc<dyn MediaCipher>, store: Arc<dyn MediaStore>) -> Self {
        Self { cipher, store }
    }

    /// Encrypt `plaintext` under a fresh key and upload ciphertext plus metadata
    pub async fn seal_and_store(
        &self,
        object_key: &str,
        plaintext: Vec<u8>,
        mime_type: &str,
        duration: Option<f64>,
    ) -> Result<StoredMedia> {
        let encrypted = encrypt_offloaded(self.cipher.clone(), plaintext, None).await?;
        let metadata = encrypted.metadata(mime_type, duration);
        let (key, sealed) = encrypted.into_parts();

        let locator = self
            .store
            .put(object_key, &sealed.ciphertext, &metadata)
            .await?;
        debug!(
            "Stored {} bytes of {} ciphertext at {}",
            metadata.original_size, metadata.mime_type, locator
        );

        Ok(StoredMedia {
            locator,
            metadata,
            key,
        })
    }

    /// Download ciphertext and decrypt it with a key received from the sender
    pub async fn fetch_and_open(&self, locator: &str, key: &EncryptionKey) -> Result<Vec<u8>> {
        let (ciphertext, metadata) = self.store.get(locator).await?;

        if ciphertext.len() as u64 != metadata.original_size {
            warn!("Media at {} is unavailable: size mismatch", locator);
            return Err(ImmoError::DecryptionFailed);
        }

        let iv: Iv = decode_fixed("iv", &metadata.iv)?;
        let auth_tag: AuthTag = decode_fixed("authTag", &metadata.auth_tag)?;

        decrypt_offloaded(self.cipher.clone(), ciphertext, iv, key.clone(), auth_tag)
            .await
            .map_err(|e| {
                if matches!(e, ImmoError::DecryptionFailed) {
                    warn!("Media at {} is unavailable: authentication failed", locator);
                }
                e
            })
    }
}

fn decode_fixed<const N: usize>(field: &'static str, text: &str) -> Result<[u8; N]> {
    let bytes = base64_to_bytes(text)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| ImmoError::InvalidInputLength {
        field,
        expected: N,
        got: bytes.len(),
    })
}

#[cfg(all(test, feature = "crypto"))]
mod tests {
    use super::*;
    use crate::crypto::AesGcmCipher;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct MemoryStore {
        objects: RwLock<HashMap<String, (Vec<u8>, EncryptionMetadata)>>,
    }

    #[async_trait]
    impl MediaStore for MemoryStore {
        async fn put(
            &self,
            object_key: &str,
            ciphertext: &[u8],
            metadata: &EncryptionMetadata,
        ) -> Result<String> {
            self.objects
                .write()
                .await
                .insert(object_key.to_string(), (ciphertext.to_vec(), metadata.clone()));
            Ok(object_key.to_string())
        }

        async fn get(&self, locator: &str) -> Result<(Vec<u8>, EncryptionMetadata)> {
            self.objects
                .read()
                .await
                .get(locator)
                .cloned()
                .ok_or_else(|| ImmoError::Storage(format!("object not found: {}", locator)))
        }
    }

    fn pipeline(store: Arc<MemoryStore>) -> MediaPipeline {
        MediaPipeline::new(Arc::new(AesGcmCipher::new()), store)
    }

    #[tokio::test]
    async fn test_seal_store_fetch_open() {
        let store = Arc::new(MemoryStore::default());
        let pipeline = pipeline(store.clone());
        let photo = b"\x89PNG fake listing photo".to_vec();

        let stored = pipeline
            .seal_and_store("listings/12/photo-1", photo.clone(), "image/png", None)
            .await
            .unwrap();

        assert_eq!(stored.locator, "listings/12/photo-1");
        assert_eq!(stored.metadata.original_size, photo.len() as u64);

        // The store only ever sees ciphertext
        let (ciphertext, _) = store.get(&stored.locator).await.unwrap();
        assert_ne!(ciphertext, photo);

        let opened = pipeline
            .fetch_and_open(&stored.locator, &stored.key)
            .await
            .unwrap();
        assert_eq!(opened, photo);
    }

    #[tokio::test]
    async fn test_wrong_key_is_media_unavailable() {
        let store = Arc::new(MemoryStore::default());
        let pipeline = pipeline(store);

        let stored = pipeline
            .seal_and_store("voice/1", b"audio bytes".to_vec(), "audio/m4a", Some(1.2))
            .await
            .unwrap();
        let wrong = AesGcmCipher::new().generate_key().unwrap();

        let result = pipeline.fetch_and_open(&stored.locator, &wrong).await;
        assert!(matches!(result, Err(ImmoError::DecryptionFailed)));
    }

    #[tokio::test]
    async fn test_corrupted_object_is_rejected() {
        let store = Arc::new(MemoryStore::default());
        let pipeline = pipeline(store.clone());

        let stored = pipeline
            .seal_and_store("docs/contract", b"signed contract".to_vec(), "application/pdf", None)
            .await
            .unwrap();

        {
            let mut objects = store.objects.write().await;
            let entry = objects.get_mut("docs/contract").unwrap();
            entry.0[0] ^= 0xFF;
        }

        let result = pipeline.fetch_and_open(&stored.locator, &stored.key).await;
        assert!(matches!(result, Err(ImmoError::DecryptionFailed)));
    }
}
