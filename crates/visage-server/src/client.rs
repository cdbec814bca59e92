use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;
use visage_core::ids::TaskId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Unique observer identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected WebSocket observer.
pub struct Client {
    pub id: ClientId,
    /// Task the observer joined via `join_task_room`. Recorded for the
    /// join acknowledgement and status introspection; event delivery
    /// itself is broadcast-to-all.
    pub watched_task: Option<TaskId>,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_pong: std::sync::atomic::AtomicU64,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        let now = now_secs();
        Self {
            id,
            watched_task: None,
            tx,
            connected: AtomicBool::new(true),
            last_pong: std::sync::atomic::AtomicU64::new(now),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn set_watched_task(&mut self, task_id: TaskId) {
        self.watched_task = Some(task_id);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected WebSocket observers. Synchronized
/// independently of the task registry; no lock is ever held across both.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Mutex<Client>>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client and return its ID + receiver for its queue.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let client = Arc::new(Mutex::new(Client::new(id.clone(), tx)));
        self.clients.insert(id.clone(), client);
        (id, rx)
    }

    /// Remove a client by ID.
    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            if let Ok(c) = client.try_lock() {
                c.connected.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Record which task a client joined.
    pub async fn watch_task(&self, client_id: &ClientId, task_id: TaskId) {
        if let Some(client) = self.clients.get(client_id) {
            client.lock().await.set_watched_task(task_id);
        }
    }

    /// Task a client joined, if any.
    pub async fn watched_task(&self, client_id: &ClientId) -> Option<TaskId> {
        match self.clients.get(client_id) {
            Some(client) => client.lock().await.watched_task.clone(),
            None => None,
        }
    }

    /// Send a message to a specific client. Drops the message with a
    /// warning if its queue is full.
    pub async fn send_to(&self, client_id: &ClientId, message: String) -> bool {
        if let Some(client) = self.clients.get(client_id) {
            let tx = client.lock().await.tx.clone();
            match tx.try_send(message) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(msg)) => {
                    tracing::warn!(
                        client_id = %client_id,
                        msg_len = msg.len(),
                        "send queue full, dropping message"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        } else {
            false
        }
    }

    /// Fan a message out to every connected client, fire-and-forget.
    pub fn broadcast_all(&self, message: &str) {
        for entry in self.clients.iter() {
            if let Ok(client) = entry.value().try_lock() {
                if client.is_connected() {
                    let _ = client.tx.try_send(message.to_string());
                }
            }
        }
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Remove clients that haven't responded to pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let mut removed = 0;
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter_map(|entry| {
                if let Ok(client) = entry.value().try_lock() {
                    if !client.is_alive() {
                        return Some(client.id.clone());
                    }
                }
                None
            })
            .collect();

        for id in dead {
            self.unregister(&id);
            removed += 1;
            tracing::info!(client_id = %id, "cleaned up dead client");
        }
        removed
    }
}

/// Handle a WebSocket connection: split into reader/writer, manage
/// lifecycle with a heartbeat.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: mpsc::Sender<(ClientId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward queued messages to the socket + periodic ping
    let writer_cid = client_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
            }
        }

        if let Some(client) = writer_registry.clients.get(&writer_cid) {
            if let Ok(c) = client.try_lock() {
                c.connected.store(false, Ordering::Relaxed);
            }
        }
    });

    // Reader task: forward incoming frames to the dispatcher, track pongs
    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_message.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.clients.get(&reader_cid) {
                        if let Ok(c) = client.try_lock() {
                            c.record_pong();
                        }
                    }
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum replies with pong automatically
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&client_id);
}

/// Start a background task that periodically cleans up dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed = removed, "dead client cleanup");
            }
        }
    })
}
