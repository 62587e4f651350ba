/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities: local WebSocket push server, fixtures, wait helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for price-stream-client tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use price_stream_client::StreamConfig;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub const MSFT_FRAME: &str = r#"{"type":"price_update","data":{"symbol":"MSFT","price":310.5,"change":-2.1,"change_percent":-0.67,"volume":500000,"timestamp":"2024-01-01T00:00:00Z","high":313,"low":309,"open":312,"previous_close":312.6}}"#;

/// What the mock server observed
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected(usize),
    Received(usize, Value),
    Closed(usize),
}

enum ServerAction {
    Send(String),
    Close,
}

/// Local WebSocket push endpoint recording every text frame it receives.
pub struct MockStreamServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    connections: Arc<Mutex<Vec<mpsc::UnboundedSender<ServerAction>>>>,
    task: JoinHandle<()>,
}

impl MockStreamServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let connections: Arc<Mutex<Vec<mpsc::UnboundedSender<ServerAction>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let (events_tx, events) = mpsc::unbounded_channel();

        let task = {
            let accepted = accepted.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((tcp, _peer)) = listener.accept().await else {
                        break;
                    };
                    let Ok(ws) = accept_async(tcp).await else {
                        continue;
                    };

                    let id = accepted.fetch_add(1, Ordering::SeqCst);
                    let (action_tx, action_rx) = mpsc::unbounded_channel();
                    connections.lock().unwrap().push(action_tx);
                    let _ = events_tx.send(ServerEvent::Connected(id));

                    tokio::spawn(serve_connection(id, ws, action_rx, events_tx.clone()));
                }
            })
        };

        Self {
            addr,
            accepted,
            events,
            connections,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws/prices", self.addr)
    }

    /// Connections that completed the WebSocket handshake
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn send(&self, connection: usize, text: &str) {
        let connections = self.connections.lock().unwrap();
        let _ = connections[connection].send(ServerAction::Send(text.to_string()));
    }

    /// Close one connection from the server side
    pub fn close(&self, connection: usize) {
        let connections = self.connections.lock().unwrap();
        let _ = connections[connection].send(ServerAction::Close);
    }

    pub async fn next_event(&mut self) -> ServerEvent {
        timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for server event")
            .expect("mock server stopped")
    }

    pub async fn expect_connected(&mut self) -> usize {
        loop {
            if let ServerEvent::Connected(id) = self.next_event().await {
                return id;
            }
        }
    }

    pub async fn expect_closed(&mut self) -> usize {
        loop {
            if let ServerEvent::Closed(id) = self.next_event().await {
                return id;
            }
        }
    }

    /// Next JSON frame the client sent, skipping heartbeat pings
    pub async fn next_command(&mut self) -> (usize, Value) {
        loop {
            if let ServerEvent::Received(id, value) = self.next_event().await {
                if value["action"] == "ping" {
                    continue;
                }
                return (id, value);
            }
        }
    }

    /// Collect every command received within `window`
    pub async fn commands_within(&mut self, window: Duration) -> Vec<(usize, Value)> {
        let deadline = Instant::now() + window;
        let mut commands = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            if let ServerEvent::Received(id, value) = event {
                commands.push((id, value));
            }
        }
        commands
    }
}

impl Drop for MockStreamServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    id: usize,
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut actions: mpsc::UnboundedReceiver<ServerAction>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            action = actions.recv() => match action {
                Some(ServerAction::Send(text)) => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(ServerAction::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        let _ = events.send(ServerEvent::Received(id, value));
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = events.send(ServerEvent::Closed(id));
}

/// Fast-retry config with the heartbeat disabled
pub fn test_config(url: &str) -> StreamConfig {
    let mut config = StreamConfig::new(url);
    config.reconnect.base_delay_ms = 20;
    config.reconnect.max_attempts = 5;
    config.connect_timeout_ms = 2_000;
    config.heartbeat = None;
    config
}

/// URL of a local port with nothing listening on it
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws/prices")
}

/// Poll `condition` until it holds or the event timeout expires
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met before timeout");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn symbols_of(command: &Value) -> Vec<String> {
    let mut symbols: Vec<String> = command["symbols"]
        .as_array()
        .expect("command has symbols")
        .iter()
        .map(|symbol| symbol.as_str().unwrap().to_string())
        .collect();
    symbols.sort();
    symbols
}
