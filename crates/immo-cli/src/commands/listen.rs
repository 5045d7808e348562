//! Listen command - follow a conversation in realtime

use crate::api::ApiClient;
use crate::config::SettingsManager;
use crate::transport::PusherTransport;
use anyhow::{Context, Result};
use colored::Colorize;
use immo_core::realtime::{ChannelCallbacks, ConnectOutcome, ConnectionManager};
use immo_core::{AppLifecycle, ConnectionState, MessagePayload, TypingPayload};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub async fn run(conversation_id: &str, typing_as: Option<u64>) -> Result<()> {
    let settings = SettingsManager::load().context("Failed to load settings")?;
    let max_attempts = settings.reconnect.max_attempts;

    let api = Arc::new(ApiClient::from_settings(&settings));
    let transport = Arc::new(PusherTransport::new(api.clone()));
    let manager = ConnectionManager::new(transport, api.clone(), api, settings.reconnect.into());

    // Enter on stdin plays the role of the app returning to the foreground
    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(4);
    manager.attach_lifecycle(lifecycle_rx).await;
    std::thread::spawn(move || {
        let mut line = String::new();
        while matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
            line.clear();
            if lifecycle_tx.blocking_send(AppLifecycle::Foreground).is_err() {
                break;
            }
        }
    });

    let mut states = manager.watch_state();
    match manager.initialize().await {
        Ok(ConnectOutcome::MissingCredentials) => {
            manager.stop().await;
            anyhow::bail!(
                "Not logged in or realtime is not configured. Run `immo auth login --token <token>` first."
            );
        }
        Ok(outcome) => debug!("Initial connection outcome: {:?}", outcome),
        Err(e) => {
            manager.stop().await;
            return Err(e).context("Failed to start realtime connection");
        }
    }

    println!(
        "{} conversation {} {}",
        "Listening to".bold(),
        conversation_id.cyan(),
        "(Ctrl-C to quit, Enter to reconnect now)".dimmed()
    );
    print_state(&manager, manager.state(), max_attempts).await;

    let mut subscription = None;
    loop {
        if subscription.is_none() && manager.state() == ConnectionState::Connected {
            match manager.subscribe(conversation_id, printing_callbacks()).await {
                Ok(handle) => {
                    println!("{} Subscribed", "✓".green());
                    subscription = Some(handle);
                    if let Some(user_id) = typing_as {
                        announce_typing(&manager, conversation_id, user_id).await;
                    }
                }
                Err(e) => warn!("Subscribe failed, will retry once connected: {}", e),
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                print_state(&manager, state, max_attempts).await;
            }
        }
    }

    if let Some(handle) = subscription {
        handle.unsubscribe(&manager).await;
    }
    manager.stop().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn announce_typing(manager: &ConnectionManager, conversation_id: &str, user_id: u64) {
    let payload = TypingPayload {
        user_id,
        user_name: None,
        is_typing: true,
    };
    if let Err(e) = manager.send_typing_indicator(conversation_id, &payload).await {
        warn!("Typing indicator not sent: {}", e);
    }
}

async fn print_state(manager: &ConnectionManager, state: ConnectionState, max_attempts: u32) {
    match state {
        ConnectionState::Connected => println!("{} {}", "●".green(), "connected".green()),
        ConnectionState::Connecting => println!("{} {}", "●".yellow(), "connecting".yellow()),
        ConnectionState::Disconnected | ConnectionState::Error => {
            let status = manager.reconnect_status().await;
            let detail = if status.exhausted {
                "giving up, press Enter to retry".to_string()
            } else if let Some(delay) = status.last_delay.filter(|_| status.scheduled_at.is_some()) {
                format!(
                    "retrying in {:.1}s (attempt {}/{})",
                    delay.as_secs_f64(),
                    status.attempt_count,
                    max_attempts
                )
            } else {
                "waiting".to_string()
            };
            println!("{} {} {}", "●".red(), state.to_string().red(), detail.dimmed());
        }
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

fn describe_message(message: &MessagePayload) -> String {
    match (&message.body, &message.media) {
        (Some(body), _) if !body.is_empty() => body.clone(),
        (_, Some(media)) => match &media.encryption {
            Some(meta) => format!("[encrypted {} {} bytes]", meta.mime_type, meta.original_size),
            None => format!("[media {}]", media.url),
        },
        _ => format!("[{:?}]", message.kind).to_lowercase(),
    }
}

fn printing_callbacks() -> ChannelCallbacks {
    ChannelCallbacks::new()
        .on_message(|message| {
            println!(
                "{} {} {}",
                timestamp().dimmed(),
                format!("#{} from {}:", message.id, message.sender_id).cyan(),
                describe_message(&message)
            );
        })
        .on_typing(|typing| {
            let who = typing
                .user_name
                .clone()
                .unwrap_or_else(|| format!("user {}", typing.user_id));
            if typing.is_typing {
                println!("{} {}", timestamp().dimmed(), format!("{} is typing…", who).italic());
            }
        })
        .on_read(|receipt| {
            println!(
                "{} {}",
                timestamp().dimmed(),
                format!("read by {}: {:?}", receipt.reader_id, receipt.message_ids).dimmed()
            );
        })
        .on_delivered(|receipt| {
            println!(
                "{} {}",
                timestamp().dimmed(),
                format!("#{} delivered to {}", receipt.message_id, receipt.recipient_id).dimmed()
            );
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use immo_core::{EncryptionMetadata, MediaAttachment, MessageKind};

    fn message(body: Option<&str>, media: Option<MediaAttachment>) -> MessagePayload {
        MessagePayload {
            id: 1,
            conversation_id: 7,
            sender_id: 2,
            kind: MessageKind::Image,
            body: body.map(String::from),
            media,
            created_at: None,
        }
    }

    #[test]
    fn test_describe_text_and_media() {
        assert_eq!(describe_message(&message(Some("Bonjour"), None)), "Bonjour");

        let media = MediaAttachment {
            url: "listings/12/photo-1".to_string(),
            encryption: Some(EncryptionMetadata {
                iv: String::new(),
                auth_tag: String::new(),
                original_size: 2048,
                mime_type: "image/jpeg".to_string(),
                duration: None,
            }),
        };
        assert_eq!(
            describe_message(&message(None, Some(media))),
            "[encrypted image/jpeg 2048 bytes]"
        );
        assert_eq!(describe_message(&message(Some(""), None)), "[image]");
    }
}
