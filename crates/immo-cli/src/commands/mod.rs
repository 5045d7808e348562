pub mod auth;
pub mod config;
pub mod decrypt;
pub mod encrypt;
pub mod listen;

use crate::config::SettingsManager;
use crate::store::FsMediaStore;
use anyhow::Result;
use immo_core::{AesGcmCipher, MediaPipeline, Settings};
use std::sync::Arc;

/// Pipeline backed by the local media directory
fn local_pipeline(settings: &Settings) -> Result<MediaPipeline> {
    let store = FsMediaStore::new(SettingsManager::media_dir(settings)?);
    Ok(MediaPipeline::new(
        Arc::new(AesGcmCipher::new()),
        Arc::new(store),
    ))
}
