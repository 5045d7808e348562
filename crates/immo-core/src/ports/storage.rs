//! Storage trait for encrypted media

use crate::Result;
use async_trait::async_trait;
use immo_types::EncryptionMetadata;

/// Object storage for ciphertext. Never receives key material.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store ciphertext and its metadata, returning a locator for retrieval
    async fn put(
        &self,
        object_key: &str,
        ciphertext: &[u8],
        metadata: &EncryptionMetadata,
    ) -> Result<String>;

    async fn get(&self, locator: &str) -> Result<(Vec<u8>, EncryptionMetadata)>;
}
