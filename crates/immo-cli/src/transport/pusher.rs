//! WebSocket transport speaking the Pusher protocol (Reverb)

use super::protocol::{
    client_event_frame, decode_frame, logical_channel, ping_frame, pong_frame, socket_url,
    subscribe_frame, unsubscribe_frame, wire_channel, ServerFrame,
};
use super::ChannelAuthorizer;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use immo_core::ports::{PubSubTransport, TransportEvent};
use immo_core::{ImmoError, Result, TransportConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 256;

/// Subscribe frames awaiting the server's answer, by wire channel name
type PendingSubscriptions = Arc<StdMutex<HashMap<String, oneshot::Sender<Result<()>>>>>;

fn lock_pending(
    pending: &PendingSubscriptions,
) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Result<()>>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
struct Session {
    socket_id: String,
    token: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingSubscriptions,
}

struct Connection {
    session: Session,
    reader: JoinHandle<()>,
}

/// One socket shared by every private channel of the session
pub struct PusherTransport {
    authorizer: Arc<dyn ChannelAuthorizer>,
    events: broadcast::Sender<TransportEvent>,
    connection: Mutex<Option<Connection>>,
}

impl PusherTransport {
    pub fn new(authorizer: Arc<dyn ChannelAuthorizer>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            authorizer,
            events,
            connection: Mutex::new(None),
        }
    }

    async fn session(&self) -> Result<Session> {
        let connection = self.connection.lock().await;
        let connection = connection.as_ref().ok_or(ImmoError::NotConnected)?;
        Ok(connection.session.clone())
    }

    /// Close quietly: the reader is stopped first so no `Disconnected` is emitted
    async fn close_connection(&self) -> bool {
        let Some(connection) = self.connection.lock().await.take() else {
            return false;
        };

        connection.reader.abort();
        let _ = connection.session.outgoing.send(Message::Close(None));
        true
    }
}

#[async_trait]
impl PubSubTransport for PusherTransport {
    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn connect(&self, config: &TransportConfig, token: &str) -> Result<()> {
        self.close_connection().await;
        let _ = self.events.send(TransportEvent::Connecting);

        info!("Connecting to WebSocket {}:{}", config.host, config.port);
        let (ws_stream, _) = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            tokio_tungstenite::connect_async(socket_url(config)),
        )
        .await
        .map_err(|_| ImmoError::Transport("WebSocket handshake timed out".into()))?
        .map_err(|e| ImmoError::Transport(format!("WebSocket connection failed: {}", e)))?;

        let (sink, mut stream) = ws_stream.split();

        let (socket_id, activity_timeout) =
            tokio::time::timeout(HANDSHAKE_TIMEOUT, await_established(&mut stream))
                .await
                .map_err(|_| ImmoError::Transport("No connection_established from server".into()))??;

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let pending = PendingSubscriptions::default();
        tokio::spawn(run_writer(sink, outgoing_rx));
        let reader = tokio::spawn(run_reader(
            stream,
            outgoing.clone(),
            self.events.clone(),
            pending.clone(),
            Duration::from_secs(activity_timeout),
        ));

        *self.connection.lock().await = Some(Connection {
            session: Session {
                socket_id: socket_id.clone(),
                token: token.to_string(),
                outgoing,
                pending,
            },
            reader,
        });

        info!("WebSocket connected with socket id {}", socket_id);
        let _ = self.events.send(TransportEvent::Connected { socket_id });
        Ok(())
    }

    async fn disconnect(&self) {
        if self.close_connection().await {
            info!("WebSocket closed");
        }
    }

    /// Resolves once the server confirms or refuses the subscription
    async fn subscribe_private(&self, channel: &str) -> Result<()> {
        let session = self.session().await?;
        let wire = wire_channel(channel);

        let auth = self
            .authorizer
            .authorize(&session.token, &session.socket_id, &wire)
            .await?;

        let (answer_tx, answer) = oneshot::channel();
        lock_pending(&session.pending).insert(wire.clone(), answer_tx);
        if let Err(e) = send_text(&session.outgoing, subscribe_frame(&wire, &auth)) {
            lock_pending(&session.pending).remove(&wire);
            return Err(e);
        }

        match tokio::time::timeout(SUBSCRIBE_TIMEOUT, answer).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ImmoError::Transport(format!(
                "Connection closed before {} was confirmed",
                channel
            ))),
            Err(_) => {
                lock_pending(&session.pending).remove(&wire);
                Err(ImmoError::Transport(format!(
                    "No subscription confirmation for {}",
                    channel
                )))
            }
        }
    }

    async fn leave(&self, channel: &str) {
        if let Ok(session) = self.session().await {
            let _ = send_text(&session.outgoing, unsubscribe_frame(&wire_channel(channel)));
        }
    }

    async fn whisper(&self, channel: &str, event: &str, payload: serde_json::Value) -> Result<()> {
        let session = self.session().await?;
        send_text(
            &session.outgoing,
            client_event_frame(&wire_channel(channel), event, payload),
        )
    }
}

fn send_text(outgoing: &mpsc::UnboundedSender<Message>, text: String) -> Result<()> {
    outgoing
        .send(Message::Text(text))
        .map_err(|_| ImmoError::Transport("WebSocket is closed".into()))
}

/// Wait for `pusher:connection_established`, returning the socket id and
/// activity timeout in seconds
async fn await_established<S>(stream: &mut S) -> Result<(String, u64)>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match decode_frame(&text)? {
                ServerFrame::ConnectionEstablished {
                    socket_id,
                    activity_timeout,
                } => return Ok((socket_id, activity_timeout)),
                ServerFrame::Error { code, message } => {
                    return Err(ImmoError::Transport(format!(
                        "Server rejected connection ({}): {}",
                        code.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                        message
                    )));
                }
                other => debug!("Ignoring {:?} before connection_established", other),
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(ImmoError::Transport(
                    "Connection closed during handshake".into(),
                ));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ImmoError::Transport(e.to_string())),
        }
    }
}

async fn run_writer<S>(mut sink: S, mut outgoing: mpsc::UnboundedReceiver<Message>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = outgoing.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("WebSocket write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
}

async fn run_reader<S>(
    mut stream: S,
    outgoing: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<TransportEvent>,
    pending: PendingSubscriptions,
    activity_timeout: Duration,
) where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    let mut last_seen = Instant::now();
    let mut ping_sent = false;
    let mut ticker = tokio::time::interval_at(Instant::now() + activity_timeout, activity_timeout);

    let reason = loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    ping_sent = false;
                    handle_text(&text, &outgoing, &events, &pending);
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                }
                Some(Ok(_)) => {
                    last_seen = Instant::now();
                }
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            },
            _ = ticker.tick() => {
                if last_seen.elapsed() < activity_timeout {
                    continue;
                }
                if ping_sent {
                    warn!("No pong within {:?}, dropping connection", activity_timeout);
                    let _ = events.send(TransportEvent::Error("ping timeout".into()));
                    lock_pending(&pending).clear();
                    return;
                }
                debug!("Connection idle, sending ping");
                let _ = send_text(&outgoing, ping_frame());
                ping_sent = true;
            }
        }
    };

    // Waiting subscribers learn the socket is gone
    lock_pending(&pending).clear();
    let _ = events.send(TransportEvent::Disconnected { reason });
}

fn resolve_subscription(pending: &PendingSubscriptions, wire_channel: &str, result: Result<()>) {
    if let Some(waiter) = lock_pending(pending).remove(wire_channel) {
        let _ = waiter.send(result);
    }
}

fn handle_text(
    text: &str,
    outgoing: &mpsc::UnboundedSender<Message>,
    events: &broadcast::Sender<TransportEvent>,
    pending: &PendingSubscriptions,
) {
    match decode_frame(text) {
        Ok(ServerFrame::Ping) => {
            let _ = send_text(outgoing, pong_frame());
        }
        Ok(ServerFrame::Pong) => {}
        Ok(ServerFrame::Error { code, message }) => {
            warn!("Server error {:?}: {}", code, message);
            let _ = events.send(TransportEvent::Error(message));
        }
        Ok(ServerFrame::SubscriptionSucceeded { channel }) => {
            debug!("Subscribed to {}", channel);
            resolve_subscription(pending, &channel, Ok(()));
        }
        Ok(ServerFrame::SubscriptionError { channel, message }) => {
            warn!("Subscription to {} rejected: {}", channel, message);
            let error = ImmoError::AuthenticationFailed(format!(
                "{}: {}",
                logical_channel(&channel),
                message
            ));
            resolve_subscription(pending, &channel, Err(error));
        }
        Ok(ServerFrame::ChannelEvent {
            channel,
            event,
            data,
        }) => {
            let _ = events.send(TransportEvent::Message {
                channel: logical_channel(&channel).to_string(),
                event,
                data,
            });
        }
        Ok(other) => debug!("Ignoring frame {:?}", other),
        Err(e) => warn!("Ignoring undecodable frame: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn text_stream(
        frames: Vec<&str>,
    ) -> impl Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin {
        futures::stream::iter(
            frames
                .into_iter()
                .map(|f| Ok::<_, tungstenite::Error>(Message::Text(f.to_string())))
                .collect::<Vec<_>>(),
        )
    }

    fn sent_text(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let Message::Text(text) = message {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_handshake_returns_socket_id() {
        let mut stream = text_stream(vec![
            r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"77.88\",\"activity_timeout\":60}"}"#,
        ]);

        let (socket_id, timeout) = await_established(&mut stream).await.unwrap();
        assert_eq!(socket_id, "77.88");
        assert_eq!(timeout, 60);
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let mut stream = text_stream(vec![
            r#"{"event":"pusher:error","data":{"code":4001,"message":"App key immo not in this cluster"}}"#,
        ]);

        let err = await_established(&mut stream).await.unwrap_err();
        assert!(matches!(err, ImmoError::Transport(ref m) if m.contains("4001")));
    }

    #[tokio::test]
    async fn test_handshake_closed_early() {
        let mut stream = text_stream(vec![]);
        assert!(matches!(
            await_established(&mut stream).await,
            Err(ImmoError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_reader_routes_frames_and_reports_close() {
        let stream = text_stream(vec![
            r#"{"event":"pusher:ping","data":{}}"#,
            r#"{"event":"pusher_internal:subscription_succeeded","channel":"private-conversation.7"}"#,
            r#"{"event":"message.sent","channel":"private-conversation.7","data":"{\"message\":{\"id\":5}}"}"#,
        ]);
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel();
        let (events, mut events_rx) = broadcast::channel(16);

        run_reader(
            stream,
            outgoing,
            events,
            PendingSubscriptions::default(),
            Duration::from_secs(30),
        )
        .await;

        let sent = sent_text(&mut outgoing_rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["event"], "pusher:pong");

        match events_rx.recv().await.unwrap() {
            TransportEvent::Message {
                channel,
                event,
                data,
            } => {
                assert_eq!(channel, "conversation.7");
                assert_eq!(event, "message.sent");
                assert_eq!(data["message"]["id"], 5);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            events_rx.recv().await.unwrap(),
            TransportEvent::Disconnected { reason: None }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_pings_when_idle_then_times_out() {
        let stream = futures::stream::pending::<std::result::Result<Message, tungstenite::Error>>();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel();
        let (events, mut events_rx) = broadcast::channel(16);

        let reader = tokio::spawn(run_reader(
            stream,
            outgoing,
            events,
            PendingSubscriptions::default(),
            Duration::from_secs(30),
        ));

        tokio::time::sleep(Duration::from_secs(31)).await;
        let sent = sent_text(&mut outgoing_rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["event"], "pusher:ping");
        assert!(events_rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            events_rx.recv().await.unwrap(),
            TransportEvent::Error("ping timeout".to_string())
        );
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_stops_after_close() {
        let (sink, mut written) = futures::channel::mpsc::unbounded::<Message>();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        outgoing.send(Message::Text(ping_frame())).unwrap();
        outgoing.send(Message::Close(None)).unwrap();
        outgoing.send(Message::Text(pong_frame())).unwrap();
        run_writer(sink, outgoing_rx).await;

        assert!(matches!(written.next().await, Some(Message::Text(_))));
        assert!(matches!(written.next().await, Some(Message::Close(None))));
        // Sink dropped after the close frame
        assert!(written.next().await.is_none());
    }

    struct StaticAuthorizer;

    #[async_trait]
    impl ChannelAuthorizer for StaticAuthorizer {
        async fn authorize(&self, _token: &str, socket_id: &str, channel: &str) -> Result<String> {
            Ok(format!("key:{}:{}", socket_id, channel))
        }
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let transport = PusherTransport::new(Arc::new(StaticAuthorizer));

        assert!(matches!(
            transport.subscribe_private("conversation.7").await,
            Err(ImmoError::NotConnected)
        ));
        assert!(matches!(
            transport
                .whisper("conversation.7", "typing", serde_json::json!({}))
                .await,
            Err(ImmoError::NotConnected)
        ));
        // No-ops when closed
        transport.leave("conversation.7").await;
        transport.disconnect().await;
    }

    fn subscription_reply(wire_channel: &str, accept: bool) -> String {
        if accept {
            format!(
                r#"{{"event":"pusher_internal:subscription_succeeded","channel":"{}"}}"#,
                wire_channel
            )
        } else {
            format!(
                r#"{{"event":"pusher:subscription_error","channel":"{}","data":{{"type":"AuthError","error":"Forbidden","status":403}}}}"#,
                wire_channel
            )
        }
    }

    #[tokio::test]
    async fn test_subscribe_reports_server_answer() {
        let transport = PusherTransport::new(Arc::new(StaticAuthorizer));
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel();
        let pending = PendingSubscriptions::default();
        *transport.connection.lock().await = Some(Connection {
            session: Session {
                socket_id: "1234.5678".to_string(),
                token: "42|abcdef".to_string(),
                outgoing,
                pending: pending.clone(),
            },
            reader: tokio::spawn(async {}),
        });

        // Accepts conversation.7, refuses everything else
        let server = tokio::spawn(async move {
            let (replies, _) = mpsc::unbounded_channel();
            let (events, _) = broadcast::channel(4);
            while let Some(Message::Text(text)) = outgoing_rx.recv().await {
                let frame: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(frame["event"], "pusher:subscribe");
                let channel = frame["data"]["channel"].as_str().unwrap().to_string();
                let reply = subscription_reply(&channel, channel == "private-conversation.7");
                handle_text(&reply, &replies, &events, &pending);
            }
        });

        tokio_test::assert_ok!(transport.subscribe_private("conversation.7").await);
        match transport.subscribe_private("conversation.8").await {
            Err(ImmoError::AuthenticationFailed(message)) => {
                assert!(message.contains("conversation.8"));
                assert!(message.contains("Forbidden"));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        transport.disconnect().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_pending_subscription_fails_when_socket_closes() {
        let pending = PendingSubscriptions::default();
        let (waiter, answer) = oneshot::channel();
        lock_pending(&pending).insert("private-conversation.7".to_string(), waiter);
        let (outgoing, _outgoing_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(4);

        run_reader(
            text_stream(vec![]),
            outgoing,
            events,
            pending.clone(),
            Duration::from_secs(30),
        )
        .await;

        assert!(answer.await.is_err());
        assert!(lock_pending(&pending).is_empty());
    }
}
