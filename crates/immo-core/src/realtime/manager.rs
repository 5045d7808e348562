//! Shared realtime connection with automatic reconnection
//!
//! One [`ConnectionManager`] owns the process-wide transport. It drives the
//! `disconnected → connecting → connected` state machine, retries with
//! exponential backoff after transport failures, and multiplexes
//! conversation subscriptions over the single socket.

use super::backoff::{ReconnectPolicy, ReconnectState};
use super::channel::{
    conversation_channel, conversation_id_from_channel, parse_event, ChannelCallbacks,
    WHISPER_TYPING,
};
use crate::ports::{ConfigSource, PubSubTransport, TokenSource, TransportEvent};
use crate::{ImmoError, Result};
use immo_types::{AppLifecycle, ConnectionState, TransportConfig, TypingPayload};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// No token or no broadcasting config; the manager stays disconnected
    MissingCredentials,
    /// The transport failed; recovery continues per the backoff policy
    Recovering,
    /// Another attempt was already running and this one was folded into it
    InFlight,
    Stopped,
}

/// Snapshot of the reconnect bookkeeping, for UI affordances
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectStatus {
    pub attempt_count: u32,
    pub scheduled_at: Option<Instant>,
    pub last_delay: Option<Duration>,
    /// Automatic retries have stopped; a foreground transition or manual
    /// retry is needed
    pub exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptTrigger {
    Initial,
    Backoff,
    Foreground,
}

const NO_SESSION: u64 = 0;

/// Holds a session id in an atomic slot and releases it on drop, so an
/// aborted task or a dropped future cannot leave the slot occupied.
struct SessionSlot<'a> {
    slot: &'a AtomicU64,
    session: u64,
}

impl<'a> SessionSlot<'a> {
    /// Take the slot unless this session or a newer one already holds it
    fn claim(slot: &'a AtomicU64, session: u64) -> Option<Self> {
        let mut holder = slot.load(Ordering::SeqCst);
        loop {
            if holder >= session {
                return None;
            }
            match slot.compare_exchange(holder, session, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Some(Self { slot, session }),
                Err(actual) => holder = actual,
            }
        }
    }

    fn set(slot: &'a AtomicU64, session: u64) -> Self {
        slot.store(session, Ordering::SeqCst);
        Self { slot, session }
    }

    /// Leave the slot set; someone else clears it
    fn keep(self) {
        std::mem::forget(self);
    }
}

impl Drop for SessionSlot<'_> {
    fn drop(&mut self) {
        let _ = self.slot.compare_exchange(
            self.session,
            NO_SESSION,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

struct ChannelEntry {
    id: u64,
    callbacks: ChannelCallbacks,
}

/// Returned by [`ConnectionManager::subscribe`]
#[derive(Debug)]
pub struct SubscriptionHandle {
    conversation_id: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Release this subscription. A newer subscription to the same
    /// conversation is left untouched.
    pub async fn unsubscribe(self, manager: &ConnectionManager) -> bool {
        manager
            .inner
            .remove_subscription(&self.conversation_id, Some(self.id))
            .await
    }
}

struct Inner {
    transport: Arc<dyn PubSubTransport>,
    tokens: Arc<dyn TokenSource>,
    configs: Arc<dyn ConfigSource>,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    reconnect: Mutex<ReconnectState>,
    config_cache: RwLock<Option<TransportConfig>>,
    channels: RwLock<HashMap<String, ChannelEntry>>,
    retry_timer: Mutex<Option<JoinHandle<()>>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    /// Bumped by `stop`; work started under an older value is discarded
    session: AtomicU64,
    /// Session of the attempt currently running, or `NO_SESSION`
    attempt_session: AtomicU64,
    /// Session whose `connect` is awaiting its `Connected` event
    handshake_session: AtomicU64,
    running: AtomicBool,
    backgrounded: AtomicBool,
    next_subscription_id: AtomicU64,
}

/// Process-wide realtime connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn PubSubTransport>,
        tokens: Arc<dyn TokenSource>,
        configs: Arc<dyn ConfigSource>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                transport,
                tokens,
                configs,
                policy,
                state_tx,
                reconnect: Mutex::new(ReconnectState::default()),
                config_cache: RwLock::new(None),
                channels: RwLock::new(HashMap::new()),
                retry_timer: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                session: AtomicU64::new(1),
                attempt_session: AtomicU64::new(NO_SESSION),
                handshake_session: AtomicU64::new(NO_SESSION),
                running: AtomicBool::new(false),
                backgrounded: AtomicBool::new(false),
                next_subscription_id: AtomicU64::new(1),
            }),
        }
    }

    /// Start listening to transport events. Idempotent.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let session = self.inner.current_session();
        let events = self.inner.transport.events();
        let handle = tokio::spawn(run_event_pump(
            Arc::downgrade(&self.inner),
            events,
            session,
        ));
        self.inner.listeners.lock().await.push(handle);
        debug!("Realtime event pump started");
    }

    /// Start (if needed) and connect.
    ///
    /// Missing credentials are not an error: the manager stays
    /// `Disconnected` and returns [`ConnectOutcome::MissingCredentials`].
    /// A failing config endpoint is surfaced as `ConfigUnavailable`.
    pub async fn initialize(&self) -> Result<ConnectOutcome> {
        self.start().await;
        let session = self.inner.current_session();
        self.inner.attempt_connect(session, AttemptTrigger::Initial).await
    }

    /// Tear down for logout: cancels timers and listeners, closes the
    /// transport, forgets cached config and all subscriptions. An attempt
    /// still running finishes as [`ConnectOutcome::Stopped`] without
    /// touching state or cache.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.session.fetch_add(1, Ordering::SeqCst);
        inner.running.store(false, Ordering::SeqCst);
        inner.attempt_session.store(NO_SESSION, Ordering::SeqCst);
        inner.handshake_session.store(NO_SESSION, Ordering::SeqCst);

        if let Some(timer) = inner.retry_timer.lock().await.take() {
            timer.abort();
        }
        for listener in inner.listeners.lock().await.drain(..) {
            listener.abort();
        }

        inner.channels.write().await.clear();
        inner.transport.disconnect().await;
        *inner.config_cache.write().await = None;
        inner.reconnect.lock().await.reset();
        inner.backgrounded.store(false, Ordering::SeqCst);
        inner.reset_state();

        info!("Realtime connection stopped");
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub async fn reconnect_status(&self) -> ReconnectStatus {
        let reconnect = self.inner.reconnect.lock().await;
        ReconnectStatus {
            attempt_count: reconnect.attempt_count(),
            scheduled_at: reconnect.scheduled_at(),
            last_delay: reconnect.last_delay(),
            exhausted: reconnect.is_exhausted(&self.inner.policy),
        }
    }

    /// React to the application moving between foreground and background
    pub async fn handle_lifecycle(&self, lifecycle: AppLifecycle) {
        self.inner.handle_lifecycle(lifecycle).await
    }

    /// Feed lifecycle transitions from `rx` until it closes or `stop` runs
    pub async fn attach_lifecycle(&self, mut rx: mpsc::Receiver<AppLifecycle>) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(lifecycle) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_lifecycle(lifecycle).await;
            }
        });
        self.inner.listeners.lock().await.push(handle);
    }

    /// Listen to a conversation's private channel. Requires an established
    /// connection; replaces any existing subscription for the conversation.
    pub async fn subscribe(
        &self,
        conversation_id: &str,
        callbacks: ChannelCallbacks,
    ) -> Result<SubscriptionHandle> {
        if self.state() != ConnectionState::Connected {
            return Err(ImmoError::NotConnected);
        }

        let inner = &self.inner;
        let id = inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let previous = inner
            .channels
            .write()
            .await
            .insert(conversation_id.to_string(), ChannelEntry { id, callbacks });
        if previous.is_some() {
            debug!("Replacing subscription for conversation {}", conversation_id);
        }

        let channel = conversation_channel(conversation_id);
        if let Err(e) = inner.transport.subscribe_private(&channel).await {
            inner.remove_subscription(conversation_id, Some(id)).await;
            return Err(e);
        }

        info!("Subscribed to {}", channel);
        Ok(SubscriptionHandle {
            conversation_id: conversation_id.to_string(),
            id,
        })
    }

    /// Stop delivering events for a conversation. Safe at any time; no
    /// callback for it runs after this returns.
    pub async fn unsubscribe(&self, conversation_id: &str) -> bool {
        self.inner.remove_subscription(conversation_id, None).await
    }

    /// Best-effort typing whisper. Fails only when not connected.
    pub async fn send_typing_indicator(
        &self,
        conversation_id: &str,
        payload: &TypingPayload,
    ) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(ImmoError::NotConnected);
        }

        let channel = conversation_channel(conversation_id);
        let data = serde_json::to_value(payload)?;
        if let Err(e) = self
            .inner
            .transport
            .whisper(&channel, WHISPER_TYPING, data)
            .await
        {
            debug!("Typing indicator on {} dropped: {}", channel, e);
        }
        Ok(())
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn current_session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    /// Running, and not stopped since `session` began
    fn is_current(&self, session: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.current_session() == session
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Publish `state` on behalf of `session`. The session check runs under
    /// the watch lock, so once `stop` has reset the state nothing from an
    /// older session overwrites it.
    fn set_state(&self, session: u64, state: ConnectionState) {
        let mut previous = state;
        let changed = self.state_tx.send_if_modified(|current| {
            if !self.is_current(session) || *current == state {
                return false;
            }
            previous = std::mem::replace(current, state);
            true
        });
        if changed {
            debug!("Connection state {} -> {}", previous, state);
        }
    }

    fn reset_state(&self) {
        let previous = self.state_tx.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            debug!("Connection state {} -> {}", previous, ConnectionState::Disconnected);
        }
    }

    async fn attempt_connect(
        self: &Arc<Self>,
        session: u64,
        trigger: AttemptTrigger,
    ) -> Result<ConnectOutcome> {
        if !self.is_current(session) {
            return Ok(ConnectOutcome::Stopped);
        }
        if self.state() == ConnectionState::Connected {
            return Ok(ConnectOutcome::Connected);
        }
        let Some(_attempt) = SessionSlot::claim(&self.attempt_session, session) else {
            debug!("Connection attempt already in flight ({:?} coalesced)", trigger);
            return Ok(ConnectOutcome::InFlight);
        };

        if trigger == AttemptTrigger::Foreground {
            // Manual retry restarts the backoff cycle
            self.cancel_retry().await;
            self.reconnect.lock().await.reset();
        }

        self.connect_once(session, trigger).await
    }

    async fn connect_once(
        self: &Arc<Self>,
        session: u64,
        trigger: AttemptTrigger,
    ) -> Result<ConnectOutcome> {
        // Fresh token on every attempt: the failure may have been an expiry
        let token = match self.tokens.bearer_token().await {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                info!("No auth token available, staying disconnected");
                self.set_state(session, ConnectionState::Disconnected);
                return Ok(ConnectOutcome::MissingCredentials);
            }
            Err(e) => return self.on_setup_failure(session, trigger, e).await,
        };

        let config = match self.config(session, &token).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                info!("Broadcasting is not configured, staying disconnected");
                self.set_state(session, ConnectionState::Disconnected);
                return Ok(ConnectOutcome::MissingCredentials);
            }
            Err(e) => return self.on_setup_failure(session, trigger, e).await,
        };

        if !self.is_current(session) {
            debug!("Stopped while preparing the connection");
            return Ok(ConnectOutcome::Stopped);
        }

        info!(
            "Connecting to realtime server {}:{} ({:?})",
            config.host, config.port, trigger
        );
        self.set_state(session, ConnectionState::Connecting);

        let handshake = SessionSlot::set(&self.handshake_session, session);
        let connected = self.transport.connect(&config, &token).await;

        if !self.is_current(session) {
            if connected.is_ok() && !self.is_running() {
                // Stopped while the handshake was in progress
                self.transport.disconnect().await;
            }
            return Ok(ConnectOutcome::Stopped);
        }

        match connected {
            Ok(()) => {
                // Cleared by the event pump once it reaches our `Connected`
                handshake.keep();
                self.on_connected(session, true).await;
                Ok(ConnectOutcome::Connected)
            }
            Err(e) => {
                drop(handshake);
                warn!("Realtime connection attempt failed: {}", e);
                self.set_state(session, ConnectionState::Error);
                self.schedule_reconnect(session).await;
                Ok(ConnectOutcome::Recovering)
            }
        }
    }

    async fn config(&self, session: u64, token: &str) -> Result<Option<TransportConfig>> {
        if let Some(config) = self.config_cache.read().await.clone() {
            return Ok(Some(config));
        }

        let fetched = self.configs.fetch_config(token).await.map_err(|e| match e {
            ImmoError::ConfigUnavailable(_) => e,
            other => ImmoError::ConfigUnavailable(other.to_string()),
        })?;

        if let Some(config) = &fetched {
            let mut cache = self.config_cache.write().await;
            // After a stop the cache stays empty until the next session
            if self.is_current(session) {
                *cache = Some(config.clone());
            }
        }
        Ok(fetched)
    }

    async fn on_setup_failure(
        self: &Arc<Self>,
        session: u64,
        trigger: AttemptTrigger,
        error: ImmoError,
    ) -> Result<ConnectOutcome> {
        if !self.is_current(session) {
            debug!("Ignoring setup failure after stop: {}", error);
            return Ok(ConnectOutcome::Stopped);
        }

        warn!("Cannot prepare realtime connection: {}", error);
        if trigger == AttemptTrigger::Initial {
            // Surfaced to the caller, who decides when to try again
            self.set_state(session, ConnectionState::Disconnected);
        } else {
            self.set_state(session, ConnectionState::Error);
            self.schedule_reconnect(session).await;
        }
        Err(error)
    }

    /// `from_attempt` marks the direct path after `connect` returned; it only
    /// upgrades `Connecting`, so a failure on the new socket that the pump
    /// already handled wins.
    async fn on_connected(self: &Arc<Self>, session: u64, from_attempt: bool) {
        let changed = self.state_tx.send_if_modified(|state| {
            let allowed = self.is_current(session)
                && if from_attempt {
                    *state == ConnectionState::Connecting
                } else {
                    *state != ConnectionState::Connected
                };
            if allowed {
                *state = ConnectionState::Connected;
            }
            allowed
        });
        if !changed {
            return;
        }

        if let Some(timer) = self.retry_timer.lock().await.take() {
            timer.abort();
        }
        self.reconnect.lock().await.reset();
        info!("Realtime connection established");

        self.resubscribe_all().await;
    }

    async fn schedule_reconnect(self: &Arc<Self>, session: u64) {
        if !self.is_current(session) {
            return;
        }
        if self.backgrounded.load(Ordering::SeqCst) {
            debug!("In background, not scheduling reconnect");
            return;
        }

        let mut timer = self.retry_timer.lock().await;
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Reconnect already scheduled");
            return;
        }

        let (delay, attempt) = {
            let mut reconnect = self.reconnect.lock().await;
            match reconnect.schedule_next(&self.policy, Instant::now()) {
                Some(delay) => (delay, reconnect.attempt_count()),
                None => {
                    warn!(
                        "Giving up automatic reconnects after {} attempts",
                        reconnect.attempt_count()
                    );
                    return;
                }
            }
        };

        info!(
            "Reconnect attempt {}/{} in {:?}",
            attempt, self.policy.max_attempts, delay
        );
        *timer = Some(spawn_retry(Arc::downgrade(self), session, delay));
    }

    async fn cancel_retry(&self) {
        if let Some(timer) = self.retry_timer.lock().await.take() {
            timer.abort();
        }
        self.reconnect.lock().await.clear_schedule();
    }

    async fn handle_lifecycle(self: &Arc<Self>, lifecycle: AppLifecycle) {
        match lifecycle {
            AppLifecycle::Background => {
                self.backgrounded.store(true, Ordering::SeqCst);
                self.cancel_retry().await;
                debug!("App moved to background");
            }
            AppLifecycle::Foreground => {
                self.backgrounded.store(false, Ordering::SeqCst);
                let session = self.current_session();
                if !self.is_current(session) || self.state() == ConnectionState::Connected {
                    return;
                }

                info!("App returned to foreground, reconnecting now");
                if let Err(e) = self
                    .attempt_connect(session, AttemptTrigger::Foreground)
                    .await
                {
                    warn!("Foreground reconnect failed: {}", e);
                }
            }
        }
    }

    /// Failures reported while our `connect` is still waiting for its
    /// `Connected` event belong to the socket being replaced
    fn is_superseded_failure(&self, session: u64) -> bool {
        self.handshake_session.load(Ordering::SeqCst) == session
    }

    async fn handle_event(self: &Arc<Self>, session: u64, event: TransportEvent) {
        if !self.is_current(session) {
            return;
        }

        match event {
            TransportEvent::Connecting => {
                if self.state() != ConnectionState::Connected {
                    self.set_state(session, ConnectionState::Connecting);
                }
            }
            TransportEvent::Connected { socket_id } => {
                debug!("Transport connected with socket id {}", socket_id);
                let _ = self.handshake_session.compare_exchange(
                    session,
                    NO_SESSION,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                self.on_connected(session, false).await;
            }
            TransportEvent::Disconnected { reason } => {
                let reason = reason.as_deref().unwrap_or("closed");
                if self.is_superseded_failure(session) {
                    debug!("Ignoring disconnect of replaced socket: {}", reason);
                    return;
                }
                info!("Realtime connection lost: {}", reason);
                self.set_state(session, ConnectionState::Disconnected);
                self.schedule_reconnect(session).await;
            }
            TransportEvent::Error(message) => {
                if self.is_superseded_failure(session) {
                    debug!("Ignoring error of replaced socket: {}", message);
                    return;
                }
                warn!("Realtime transport error: {}", message);
                self.set_state(session, ConnectionState::Error);
                self.schedule_reconnect(session).await;
            }
            TransportEvent::Message {
                channel,
                event,
                data,
            } => self.dispatch(&channel, &event, data).await,
        }
    }

    async fn dispatch(&self, channel: &str, event: &str, data: serde_json::Value) {
        let Some(conversation_id) = conversation_id_from_channel(channel) else {
            debug!("Ignoring {} on unrelated channel {}", event, channel);
            return;
        };

        let parsed = match parse_event(event, data) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                debug!("Ignoring unknown event {} on {}", event, channel);
                return;
            }
            Err(e) => {
                warn!("Dropping malformed {} on {}: {}", event, channel, e);
                return;
            }
        };

        // Held across the callback so `unsubscribe` waits for in-progress delivery
        let channels = self.channels.read().await;
        match channels.get(conversation_id) {
            Some(entry) => entry.callbacks.dispatch(parsed),
            None => debug!("No subscriber for {}, dropping {}", channel, parsed.kind()),
        }
    }

    async fn remove_subscription(&self, conversation_id: &str, id: Option<u64>) -> bool {
        let removed = {
            let mut channels = self.channels.write().await;
            let matches = channels
                .get(conversation_id)
                .is_some_and(|entry| id.map_or(true, |id| id == entry.id));
            if matches {
                channels.remove(conversation_id);
            }
            matches
        };

        if removed {
            let channel = conversation_channel(conversation_id);
            self.transport.leave(&channel).await;
            info!("Left {}", channel);
        }
        removed
    }

    async fn resubscribe_all(&self) {
        let conversation_ids: Vec<String> = self.channels.read().await.keys().cloned().collect();

        for conversation_id in conversation_ids {
            let channel = conversation_channel(&conversation_id);
            if let Err(e) = self.transport.subscribe_private(&channel).await {
                warn!("Failed to resubscribe to {}: {}", channel, e);
                continue;
            }

            // Unsubscribed while we were re-joining
            if !self.channels.read().await.contains_key(&conversation_id) {
                self.transport.leave(&channel).await;
            }
        }
    }
}

/// Spawned through a boxed future so the retry task's type does not depend
/// on `attempt_connect`, which itself schedules retries.
fn spawn_retry(weak: Weak<Inner>, session: u64, delay: Duration) -> JoinHandle<()> {
    let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
        tokio::time::sleep(delay).await;

        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.is_current(session) {
            return;
        }
        // From here on this task is the in-flight attempt, not a pending timer
        drop(inner.retry_timer.lock().await.take());
        inner.reconnect.lock().await.clear_schedule();

        if let Err(e) = inner.attempt_connect(session, AttemptTrigger::Backoff).await {
            debug!("Scheduled reconnect did not complete: {}", e);
        }
    });
    tokio::spawn(task)
}

async fn run_event_pump(
    weak: Weak<Inner>,
    mut events: broadcast::Receiver<TransportEvent>,
    session: u64,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_event(session, event).await;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Realtime event pump lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Transport event stream closed");
                break;
            }
        }
    }
}
