/*
[INPUT]:  StreamConfig, caller subscribe/unsubscribe calls, server frames
[OUTPUT]: Decoded PriceUpdates and connection changes fanned out to handlers
[POS]:    WebSocket layer - single-connection client with reconnect and resubscribe
[UPDATE]: When changing connection lifecycle, reconnect scheduling, or dispatch
*/

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handlers::{HandlerRegistration, HandlerRegistry};
use super::message::{ClientCommand, InboundFrame, PriceUpdate, decode_frame, truncate_for_log};
use super::reconnect::{ConnectionState, ReconnectTracker, RetryDecision};
use super::subscription::{SubscriptionSet, normalize_symbols};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};

const RAW_LOG_MAX_BYTES: usize = 512;
const IDLE_TICK: Duration = Duration::from_secs(3600);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingAttempt = Shared<BoxFuture<'static, Result<()>>>;

/// Real-time price stream client.
///
/// Owns at most one WebSocket connection, keeps the subscription set across
/// reconnects, and fans decoded updates out to registered handlers. Clones
/// share the same connection and state.
#[derive(Clone)]
pub struct PriceStreamClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: StreamConfig,
    handlers: HandlerRegistry,
    state: Mutex<SessionState>,
}

struct SessionState {
    phase: ConnectionState,
    connection: Option<LiveConnection>,
    subscriptions: SubscriptionSet,
    reconnect: ReconnectTracker,
    pending_attempt: Option<PendingAttempt>,
    pending_retry: Option<CancellationToken>,
    session: CancellationToken,
    next_connection_id: u64,
}

struct LiveConnection {
    id: u64,
    outbound: mpsc::UnboundedSender<ClientCommand>,
}

/// Retry decided under the state lock, spawned once the lock is released.
struct ScheduledRetry {
    attempt: u32,
    delay: Duration,
    token: CancellationToken,
}

#[derive(Debug)]
enum CloseReason {
    Requested,
    Remote(Option<String>),
    Transport(String),
    StreamEnded,
    HeartbeatTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => write!(f, "closed by client"),
            CloseReason::Remote(Some(reason)) => write!(f, "server closed: {reason}"),
            CloseReason::Remote(None) => write!(f, "server closed"),
            CloseReason::Transport(err) => write!(f, "transport error: {err}"),
            CloseReason::StreamEnded => write!(f, "stream ended"),
            CloseReason::HeartbeatTimeout => write!(f, "heartbeat timeout"),
        }
    }
}

impl PriceStreamClient {
    /// Create a client; nothing connects until [`connect`](Self::connect).
    pub fn new(config: StreamConfig) -> Self {
        let state = SessionState {
            phase: ConnectionState::Idle,
            connection: None,
            subscriptions: SubscriptionSet::new(),
            reconnect: ReconnectTracker::new(config.reconnect),
            pending_attempt: None,
            pending_retry: None,
            session: CancellationToken::new(),
            next_connection_id: 0,
        };

        Self {
            inner: Arc::new(ClientInner {
                config,
                handlers: HandlerRegistry::new(),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Open the connection.
    ///
    /// Resolves immediately when already open and joins an attempt that is
    /// already in flight instead of starting a second one. A failed attempt
    /// with a usable URL counts as a close event and feeds the backoff loop;
    /// an invalid URL does not.
    pub async fn connect(&self) -> Result<()> {
        let attempt = {
            let mut state = self.inner.state.lock();
            if state.connection.is_some() {
                return Ok(());
            }
            if state.phase.is_at_rest() {
                state.reconnect.reset();
            }
            self.join_or_start_attempt(&mut state)
        };
        attempt.await
    }

    /// Add symbols to the subscription set, sending them now if connected.
    pub fn subscribe<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = normalize_symbols(symbols);
        if symbols.is_empty() {
            return;
        }

        let mut state = self.inner.state.lock();
        state.subscriptions.extend(&symbols);

        match &state.connection {
            Some(connection) => {
                debug!(connection_id = connection.id, ?symbols, "subscribing");
                let _ = connection
                    .outbound
                    .send(ClientCommand::Subscribe { symbols });
            }
            None => debug!(?symbols, "not connected; symbols queued for next open"),
        }
    }

    /// Remove symbols from the subscription set; unknown symbols are ignored.
    pub fn unsubscribe<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = normalize_symbols(symbols);
        let mut state = self.inner.state.lock();
        let removed = state.subscriptions.remove(&symbols);
        if removed.is_empty() {
            return;
        }

        if let Some(connection) = &state.connection {
            debug!(connection_id = connection.id, symbols = ?removed, "unsubscribing");
            let _ = connection
                .outbound
                .send(ClientCommand::Unsubscribe { symbols: removed });
        }
    }

    /// Register a handler for every decoded price update.
    pub fn on_message<F>(&self, handler: F) -> HandlerRegistration
    where
        F: Fn(PriceUpdate) + Send + Sync + 'static,
    {
        self.inner.handlers.add_message_handler(handler)
    }

    /// Register a handler for connection open (`true`) / close (`false`).
    pub fn on_connection_change<F>(&self, handler: F) -> HandlerRegistration
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.handlers.add_connection_handler(handler)
    }

    /// Close the connection and reset the session.
    ///
    /// Cancels any in-flight attempt and pending retry, clears the
    /// subscription set and both handler registries.
    pub fn disconnect(&self) {
        let was_connected = {
            let mut state = self.inner.state.lock();
            state.session.cancel();
            state.session = CancellationToken::new();
            state.pending_attempt = None;
            state.pending_retry = None;
            state.subscriptions.clear();
            state.reconnect.reset();
            state.phase = ConnectionState::Disconnected;
            state.connection.take().is_some()
        };

        if was_connected {
            self.inner.handlers.dispatch_connection(false);
        }
        self.inner.handlers.clear();
        info!(was_connected, "price stream client disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connection.is_some()
    }

    /// Sorted snapshot of the subscription set
    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.inner.state.lock().subscriptions.to_vec()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().phase
    }

    /// Consecutive close events since the last successful open
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.state.lock().reconnect.attempt()
    }

    fn downgrade(&self) -> Weak<ClientInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(inner: &Weak<ClientInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    async fn retry(&self) -> Result<()> {
        let attempt = {
            let mut state = self.inner.state.lock();
            if state.connection.is_some() {
                return Ok(());
            }
            self.join_or_start_attempt(&mut state)
        };
        attempt.await
    }

    fn join_or_start_attempt(&self, state: &mut SessionState) -> PendingAttempt {
        if let Some(pending) = &state.pending_attempt {
            return pending.clone();
        }

        state.phase = ConnectionState::Connecting;
        let task = tokio::spawn(self.clone().open_connection(state.session.clone()));
        let attempt = async move {
            task.await
                .unwrap_or_else(|err| Err(StreamError::Internal(err.to_string())))
        }
        .boxed()
        .shared();

        state.pending_attempt = Some(attempt.clone());
        attempt
    }

    async fn open_connection(self, session: CancellationToken) -> Result<()> {
        let url = match self.inner.config.stream_url() {
            Ok(url) => url,
            Err(err) => {
                self.abandon_attempt(&session, &err);
                return Err(err);
            }
        };

        info!(url = %url, "connecting to price stream");
        let connect_timeout = self.inner.config.connect_timeout();
        let outcome = tokio::select! {
            _ = session.cancelled() => return Err(StreamError::Disconnected),
            result = tokio::time::timeout(connect_timeout, connect_async(url.as_str())) => match result {
                Ok(Ok((stream, _response))) => Ok(stream),
                Ok(Err(err)) => Err(StreamError::from(err)),
                Err(_) => Err(StreamError::Timeout {
                    duration_ms: self.inner.config.connect_timeout_ms,
                }),
            },
        };

        match outcome {
            Ok(stream) => self.on_open(stream, session),
            Err(err @ StreamError::InvalidUrl(_)) => {
                self.abandon_attempt(&session, &err);
                Err(err)
            }
            Err(err) => {
                self.on_attempt_failed(&session, &err);
                Err(err)
            }
        }
    }

    /// URL was never usable: report it without entering the retry loop.
    fn abandon_attempt(&self, session: &CancellationToken, err: &StreamError) {
        error!(url = %self.inner.config.url, error = %err, "price stream URL rejected");
        let mut state = self.inner.state.lock();
        if session.is_cancelled() {
            return;
        }
        state.pending_attempt = None;
        state.phase = ConnectionState::Idle;
    }

    fn on_attempt_failed(&self, session: &CancellationToken, err: &StreamError) {
        let retry = {
            let mut state = self.inner.state.lock();
            if session.is_cancelled() {
                return;
            }
            state.pending_attempt = None;
            warn!(url = %self.inner.config.url, error = %err, "price stream connection attempt failed");
            self.schedule_reconnect(&mut state)
        };
        if let Some(retry) = retry {
            self.spawn_retry(retry);
        }
    }

    fn on_open(&self, stream: WsStream, session: CancellationToken) -> Result<()> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let (connection_id, resubscribed) = {
            let mut state = self.inner.state.lock();
            if session.is_cancelled() {
                drop(stream);
                return Err(StreamError::Disconnected);
            }

            state.next_connection_id += 1;
            let id = state.next_connection_id;
            state.connection = Some(LiveConnection {
                id,
                outbound: outbound_tx.clone(),
            });
            state.pending_attempt = None;
            state.phase = ConnectionState::Open;
            state.reconnect.reset();
            if let Some(retry) = state.pending_retry.take() {
                retry.cancel();
            }

            // Queued before the reader starts, so no update precedes it.
            let symbols = state.subscriptions.to_vec();
            let count = symbols.len();
            if !symbols.is_empty() {
                let _ = outbound_tx.send(ClientCommand::Subscribe { symbols });
            }
            (id, count)
        };

        info!(connection_id, resubscribed, "price stream connected");
        self.inner.handlers.dispatch_connection(true);

        tokio::spawn(run_connection(
            self.downgrade(),
            connection_id,
            stream,
            outbound_rx,
            session.child_token(),
            self.inner.config.heartbeat.map(|h| (h.ping_interval(), h.timeout())),
        ));
        Ok(())
    }

    fn handle_frame(&self, connection_id: u64, text: &str) -> Option<ClientCommand> {
        match decode_frame(text) {
            Ok(InboundFrame::PriceUpdate(update)) => {
                self.inner.handlers.dispatch_update(&update);
                None
            }
            Ok(InboundFrame::Connected { message }) => {
                info!(connection_id, message = message.as_deref().unwrap_or(""), "price stream server greeting");
                None
            }
            Ok(InboundFrame::Error { message }) => {
                warn!(connection_id, message = message.as_deref().unwrap_or(""), "price stream server reported an error");
                None
            }
            Ok(InboundFrame::Ping) => Some(ClientCommand::Pong),
            Ok(InboundFrame::Pong) => None,
            Ok(InboundFrame::Unknown { kind }) => {
                debug!(connection_id, %kind, "ignoring unhandled frame type");
                None
            }
            Err(err) => {
                let preview = truncate_for_log(text, RAW_LOG_MAX_BYTES);
                warn!(connection_id, error = %err, frame = %preview, "dropping malformed price stream frame");
                None
            }
        }
    }

    fn on_connection_closed(&self, connection_id: u64, reason: CloseReason) {
        if matches!(reason, CloseReason::Requested) {
            debug!(connection_id, "price stream connection closed on request");
            return;
        }

        let retry = {
            let mut state = self.inner.state.lock();
            match &state.connection {
                Some(connection) if connection.id == connection_id => {}
                _ => return,
            }
            state.connection = None;
            warn!(connection_id, %reason, "price stream connection closed");
            self.schedule_reconnect(&mut state)
        };

        // The retry timer starts only after `false` is out, so a fast
        // reconnect can never report `true` ahead of it.
        self.inner.handlers.dispatch_connection(false);
        if let Some(retry) = retry {
            self.spawn_retry(retry);
        }
    }

    /// Single entry point for backoff; every close event lands here.
    fn schedule_reconnect(&self, state: &mut SessionState) -> Option<ScheduledRetry> {
        if let Some(previous) = state.pending_retry.take() {
            previous.cancel();
        }

        match state.reconnect.on_close() {
            RetryDecision::Retry { attempt, delay } => {
                state.phase = ConnectionState::Reconnecting { attempt, delay };
                let token = state.session.child_token();
                state.pending_retry = Some(token.clone());
                info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling price stream reconnect");
                Some(ScheduledRetry { attempt, delay, token })
            }
            RetryDecision::GiveUp { attempts } => {
                state.phase = ConnectionState::Closed;
                error!(
                    attempts,
                    url = %self.inner.config.url,
                    "price stream reconnect attempts exhausted; giving up"
                );
                None
            }
        }
    }

    fn spawn_retry(&self, retry: ScheduledRetry) {
        let ScheduledRetry { attempt, delay, token } = retry;
        let client = self.downgrade();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let Some(client) = Self::upgrade(&client) else {
                        return;
                    };
                    if let Err(err) = client.retry().await {
                        debug!(attempt, error = %err, "price stream reconnect attempt failed");
                    }
                }
            }
        });
    }
}

impl fmt::Debug for PriceStreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PriceStreamClient")
            .field("url", &self.inner.config.url)
            .field("phase", &state.phase)
            .field("subscriptions", &state.subscriptions.len())
            .field("reconnect_attempt", &state.reconnect.attempt())
            .finish()
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.state.get_mut().session.cancel();
    }
}

/// Connection task: owns both halves of the socket until it closes.
async fn run_connection(
    client: Weak<ClientInner>,
    connection_id: u64,
    stream: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientCommand>,
    shutdown: CancellationToken,
    heartbeat: Option<(Duration, Duration)>,
) {
    let (mut write, mut read) = stream.split();

    let ping_every = heartbeat.map(|(interval, _)| interval).unwrap_or(IDLE_TICK);
    let mut ping_tick = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    let reason = loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = write.send(WsMessage::Close(None)).await;
                break CloseReason::Requested;
            }
            command = outbound_rx.recv() => {
                let Some(command) = command else {
                    let _ = write.send(WsMessage::Close(None)).await;
                    break CloseReason::Requested;
                };
                if let Err(err) = send_command(&mut write, &command).await {
                    break CloseReason::Transport(err.to_string());
                }
            }
            incoming = read.next() => {
                let Some(handle) = PriceStreamClient::upgrade(&client) else {
                    break CloseReason::Requested;
                };
                let reply = match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_seen = Instant::now();
                        handle.handle_frame(connection_id, text.as_str())
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        last_seen = Instant::now();
                        match std::str::from_utf8(&bytes) {
                            Ok(text) => handle.handle_frame(connection_id, text),
                            Err(_) => {
                                warn!(connection_id, bytes = bytes.len(), "dropping non-UTF-8 binary frame");
                                None
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        break CloseReason::Remote(frame.map(|frame| {
                            format!("{} ({})", frame.reason.as_str(), u16::from(frame.code))
                        }));
                    }
                    Some(Ok(_)) => {
                        last_seen = Instant::now();
                        None
                    }
                    Some(Err(err)) => break CloseReason::Transport(err.to_string()),
                    None => break CloseReason::StreamEnded,
                };
                if let Some(reply) = reply
                    && let Err(err) = send_command(&mut write, &reply).await
                {
                    break CloseReason::Transport(err.to_string());
                }
            }
            _ = ping_tick.tick(), if heartbeat.is_some() => {
                if let Some((_, timeout)) = heartbeat
                    && last_seen.elapsed() >= timeout
                {
                    break CloseReason::HeartbeatTimeout;
                }
                if let Err(err) = send_command(&mut write, &ClientCommand::Ping).await {
                    break CloseReason::Transport(err.to_string());
                }
            }
        }
    };

    if let Some(handle) = PriceStreamClient::upgrade(&client) {
        handle.on_connection_closed(connection_id, reason);
    }
}

async fn send_command<S>(write: &mut S, command: &ClientCommand) -> Result<()>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let payload = command.encode()?;
    write.send(WsMessage::Text(payload.into())).await?;
    debug!(action = command.name(), "price stream command sent");
    Ok(())
}
