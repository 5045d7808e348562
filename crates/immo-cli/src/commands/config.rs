//! Config command - Manage CLI configuration

use crate::config::SettingsManager;
use anyhow::{Context, Result};
use colored::Colorize;
use immo_core::Settings;

/// Set the backend API root
pub async fn set_api(url: &str) -> Result<()> {
    let mut settings = SettingsManager::load().context("Failed to load settings")?;

    // Validate URL format
    let url = url.trim().trim_end_matches('/');
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!(
            "Invalid URL: {}. URL must start with http:// or https://",
            url
        );
    }

    settings.api_url = url.to_string();
    SettingsManager::save(&settings).context("Failed to save settings")?;

    println!("{} API URL set to: {}", "✓".green(), url.cyan());
    println!(
        "  Broadcasting config: {}",
        format!("{}/broadcasting/config", url).dimmed()
    );

    Ok(())
}

/// Show current configuration
pub async fn show() -> Result<()> {
    let settings = SettingsManager::load().context("Failed to load settings")?;

    println!("{}", "ImmoGuinée Configuration".bold().underline());
    println!();

    println!("{}", "Server Settings:".cyan().bold());
    println!("  API URL: {}", settings.api_url);
    println!();

    println!("{}", "Session:".cyan().bold());
    if settings.access_token.is_some() {
        println!("  {}", "Logged in".green());
    } else {
        println!("  {}", "Not logged in".yellow());
    }
    println!();

    let reconnect = &settings.reconnect;
    println!("{}", "Reconnect Policy:".cyan().bold());
    println!("  Base delay:   {} ms", reconnect.base_delay_ms);
    println!("  Max attempts: {}", reconnect.max_attempts);
    println!("  Max delay:    {} ms", reconnect.max_delay_ms);
    println!();

    println!("{}", "Files:".cyan().bold());
    println!(
        "  Settings: {}",
        SettingsManager::settings_path()?.display().to_string().dimmed()
    );
    println!(
        "  Media:    {}",
        SettingsManager::media_dir(&settings)?
            .display()
            .to_string()
            .dimmed()
    );

    Ok(())
}

/// Reset configuration to defaults
pub async fn reset(yes: bool) -> Result<()> {
    use dialoguer::Confirm;

    if !yes {
        let confirm = Confirm::new()
            .with_prompt("Reset all configuration? This will log you out.")
            .default(false)
            .interact()?;

        if !confirm {
            println!("{}", "Reset cancelled.".yellow());
            return Ok(());
        }
    }

    SettingsManager::save(&Settings::default()).context("Failed to save default settings")?;

    println!("{} Configuration reset to defaults.", "✓".green());
    println!("{}", "  You will need to login again.".dimmed());

    Ok(())
}
