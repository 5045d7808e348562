//! ImmoGuinée CLI
//!
//! End-to-end encrypted media and realtime conversation tooling for the
//! ImmoGuinée marketplace.

mod api;
mod commands;
mod config;
mod store;
mod transport;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "immo")]
#[command(author, version, about = "ImmoGuinée - encrypted media and realtime conversations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file into the local media store
    Encrypt {
        /// File to encrypt
        file: PathBuf,

        /// MIME type (guessed from the extension if omitted)
        #[arg(short, long)]
        mime: Option<String>,

        /// Duration in seconds for audio and video
        #[arg(short, long)]
        duration: Option<f64>,
    },

    /// Decrypt media from the local store
    Decrypt {
        /// Locator printed by `immo encrypt`
        locator: String,

        /// Base64 key shared by the sender
        #[arg(short, long)]
        key: String,

        /// Where to write the decrypted file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Follow a conversation in realtime
    Listen {
        /// Conversation id
        conversation_id: String,

        /// Announce typing as this user id once subscribed
        #[arg(long, value_name = "USER_ID")]
        typing: Option<u64>,
    },

    /// Authentication management
    #[command(name = "auth")]
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Store an API token
    Login {
        /// Bearer token issued by the backend
        #[arg(short, long, env = "IMMO_TOKEN")]
        token: String,
    },
    /// Forget the stored token
    Logout,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set the backend API URL
    SetApi {
        /// API root (e.g., https://api.immoguinee.com/api)
        url: String,
    },
    /// Reset to default configuration
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "immo_cli=debug,immo_core=debug"
        } else {
            "immo_cli=info"
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    info!("Starting ImmoGuinée CLI");

    let result = match cli.command {
        Commands::Encrypt {
            file,
            mime,
            duration,
        } => commands::encrypt::run(&file, mime, duration).await,
        Commands::Decrypt {
            locator,
            key,
            output,
        } => commands::decrypt::run(&locator, &key, &output).await,
        Commands::Listen {
            conversation_id,
            typing,
        } => commands::listen::run(&conversation_id, typing).await,
        Commands::Auth { action } => match action {
            AuthAction::Login { token } => commands::auth::login(&token).await,
            AuthAction::Logout => commands::auth::logout().await,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show().await,
            ConfigAction::SetApi { url } => commands::config::set_api(&url).await,
            ConfigAction::Reset { yes } => commands::config::reset(yes).await,
        },
    };

    if let Err(ref e) = result {
        error!("Command failed: {}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    result
}
