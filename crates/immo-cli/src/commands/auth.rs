//! Authentication commands

use crate::config::SettingsManager;
use anyhow::{Context, Result};
use colored::Colorize;

/// Store an API token issued by the backend
pub async fn login(token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("Token must not be empty");
    }

    let mut settings = SettingsManager::load().context("Failed to load settings")?;
    settings.access_token = Some(token.to_string());
    SettingsManager::save(&settings).context("Failed to save settings")?;

    println!("{}", "✅ Token saved".green().bold());
    println!("   API: {}", settings.api_url.dimmed());

    Ok(())
}

pub async fn logout() -> Result<()> {
    let mut settings = SettingsManager::load().context("Failed to load settings")?;

    if settings.access_token.take().is_none() {
        println!("{}", "Not logged in.".yellow());
        return Ok(());
    }

    SettingsManager::save(&settings).context("Failed to save settings")?;
    println!("{} Logged out.", "✓".green());

    Ok(())
}
