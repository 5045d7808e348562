//! Local filesystem media store
//!
//! Each object is a pair of files: `<key>.bin` with the ciphertext and
//! `<key>.meta.json` with its [`EncryptionMetadata`].

use async_trait::async_trait;
use immo_core::ports::MediaStore;
use immo_core::{EncryptionMetadata, ImmoError, Result};
use std::path::PathBuf;
use tracing::debug;

pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn paths(&self, object_key: &str) -> Result<(PathBuf, PathBuf)> {
        validate_object_key(object_key)?;
        Ok((
            self.root.join(format!("{}.bin", object_key)),
            self.root.join(format!("{}.meta.json", object_key)),
        ))
    }
}

fn validate_object_key(object_key: &str) -> Result<()> {
    let invalid = object_key.is_empty()
        || object_key == "."
        || object_key == ".."
        || object_key.contains(['/', '\\', '\0']);

    if invalid {
        return Err(ImmoError::Storage(format!(
            "invalid object key: {:?}",
            object_key
        )));
    }
    Ok(())
}

fn not_found(locator: &str, e: std::io::Error) -> ImmoError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ImmoError::Storage(format!("media not found: {}", locator))
    } else {
        ImmoError::Io(e)
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn put(
        &self,
        object_key: &str,
        ciphertext: &[u8],
        metadata: &EncryptionMetadata,
    ) -> Result<String> {
        let (data_path, meta_path) = self.paths(object_key)?;

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&data_path, ciphertext).await?;
        tokio::fs::write(&meta_path, serde_json::to_vec_pretty(metadata)?).await?;

        debug!("Wrote {} ciphertext bytes to {:?}", ciphertext.len(), data_path);
        Ok(object_key.to_string())
    }

    async fn get(&self, locator: &str) -> Result<(Vec<u8>, EncryptionMetadata)> {
        let (data_path, meta_path) = self.paths(locator)?;

        let ciphertext = tokio::fs::read(&data_path)
            .await
            .map_err(|e| not_found(locator, e))?;
        let meta = tokio::fs::read(&meta_path)
            .await
            .map_err(|e| not_found(locator, e))?;

        Ok((ciphertext, serde_json::from_slice(&meta)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(size: u64) -> EncryptionMetadata {
        EncryptionMetadata {
            iv: "AAAAAAAAAAAAAAAA".to_string(),
            auth_tag: "AAAAAAAAAAAAAAAAAAAAAA==".to_string(),
            original_size: size,
            mime_type: "image/jpeg".to_string(),
            duration: None,
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("media");
        let store = FsMediaStore::new(&root);

        let locator = store
            .put("photo-1", &[1, 2, 3, 4], &metadata(4))
            .await
            .unwrap();
        assert_eq!(locator, "photo-1");
        assert!(root.join("photo-1.bin").exists());

        let raw = std::fs::read_to_string(root.join("photo-1.meta.json")).unwrap();
        assert!(raw.contains("\"authTag\""));
        assert!(raw.contains("\"originalSize\": 4"));

        let (ciphertext, meta) = store.get(&locator).await.unwrap();
        assert_eq!(ciphertext, vec![1, 2, 3, 4]);
        assert_eq!(meta, metadata(4));
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path());

        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, ImmoError::Storage(ref m) if m.contains("nope")));
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path());

        for key in ["", ".", "..", "../escape", "a/b", "a\\b"] {
            let result = store.put(key, b"x", &metadata(1)).await;
            assert!(
                matches!(result, Err(ImmoError::Storage(_))),
                "key {:?} accepted",
                key
            );
        }
    }
}
