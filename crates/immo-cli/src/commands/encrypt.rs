//! Encrypt command - seal a local file into the media store

use crate::config::SettingsManager;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

pub async fn run(file: &Path, mime: Option<String>, duration: Option<f64>) -> Result<()> {
    let settings = SettingsManager::load().context("Failed to load settings")?;
    let pipeline = super::local_pipeline(&settings)?;

    let plaintext = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;
    let mime_type = mime.unwrap_or_else(|| guess_mime(file).to_string());
    let object_key = uuid::Uuid::new_v4().simple().to_string();

    let stored = pipeline
        .seal_and_store(&object_key, plaintext, &mime_type, duration)
        .await
        .context("Failed to encrypt media")?;

    println!("{} Encrypted {}", "✓".green(), file.display().to_string().cyan());
    println!("  Locator: {}", stored.locator.cyan());
    println!("  Type:    {}", stored.metadata.mime_type);
    println!("  Size:    {} bytes", stored.metadata.original_size);
    if let Some(secs) = stored.metadata.duration {
        println!("  Length:  {:.1}s", secs);
    }
    println!();
    println!("  Key:     {}", stored.key.to_base64().yellow());
    println!(
        "{}",
        "  Share this key with the recipient directly. It is not stored anywhere."
            .dimmed()
    );

    Ok(())
}

/// MIME type from the file extension, for media kinds the app sends
fn guess_mime(file: &Path) -> &'static str {
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("m4a") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        Some("aac") => "audio/aac",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}
