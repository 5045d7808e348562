//! Decrypt command - open media from the store with a shared key

use crate::config::SettingsManager;
use anyhow::{Context, Result};
use colored::Colorize;
use immo_core::{EncryptionKey, ImmoError};
use std::path::Path;

pub async fn run(locator: &str, key: &str, output: &Path) -> Result<()> {
    let settings = SettingsManager::load().context("Failed to load settings")?;
    let pipeline = super::local_pipeline(&settings)?;

    let key = EncryptionKey::from_base64(key).context("Invalid key")?;

    let plaintext = match pipeline.fetch_and_open(locator, &key).await {
        Ok(plaintext) => plaintext,
        Err(ImmoError::DecryptionFailed) => anyhow::bail!("Media unavailable"),
        Err(e) => return Err(e).context("Failed to load media"),
    };

    tokio::fs::write(output, &plaintext)
        .await
        .with_context(|| format!("Failed to write {:?}", output))?;

    println!(
        "{} Decrypted {} bytes to {}",
        "✓".green(),
        plaintext.len(),
        output.display().to_string().cyan()
    );

    Ok(())
}
