use axum::extract::ws::{CloseFrame, Message, WebSocket};
use fgsim_core::push::{encode_frame, DEFAULT_MAX_FRAME_BYTES};
use fgsim_core::{PushMsg, TaskStatus};
use futures_util::{SinkExt, StreamExt};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct PushConfig {
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub stale_seconds: u64,
    pub queue_capacity: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            write_timeout: Duration::from_secs(2),
            stale_seconds: 60,
            queue_capacity: 256,
        }
    }
}

struct Client {
    conn_id: String,
    remote: SocketAddr,
    sender: mpsc::Sender<Message>,
    last_seen: Arc<AsyncMutex<Instant>>,
}

impl Client {
    async fn touch(&self) {
        let mut last = self.last_seen.lock().await;
        *last = Instant::now();
    }

    async fn last_seen(&self) -> Instant {
        let last = self.last_seen.lock().await;
        *last
    }

    async fn send_text(&self, text: &str) -> bool {
        self.sender
            .send(Message::Text(text.to_string()))
            .await
            .is_ok()
    }

    async fn close(&self, reason: &str) {
        let _ = self
            .sender
            .send(Message::Close(Some(CloseFrame {
                code: 1000,
                reason: reason.to_string().into(),
            })))
            .await;
    }
}

/// Fan-out of push messages to every connected console session.
pub struct PushHub {
    config: PushConfig,
    conn_counter: AtomicU64,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    last_status: RwLock<TaskStatus>,
}

impl PushHub {
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            clients: RwLock::new(HashMap::new()),
            last_status: RwLock::new(TaskStatus::IDLE),
        }
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn register_client(&self, client: Arc<Client>) {
        self.clients
            .write()
            .await
            .insert(client.conn_id.clone(), client.clone());
        let clients = self.client_count().await;
        info!(
            event = "client_connected",
            conn_id = %client.conn_id,
            remote = %client.remote,
            clients = clients
        );
    }

    async fn remove_client(&self, client: &Client, reason: &str) {
        client.close(reason).await;
        let removed = self.clients.write().await.remove(&client.conn_id).is_some();
        if removed {
            info!(
                event = "client_disconnected",
                conn_id = %client.conn_id,
                remote = %client.remote,
                reason = reason
            );
        }
    }

    async fn snapshot_clients(&self) -> Vec<Arc<Client>> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Sends `msg` to every client. Status messages also become the snapshot
    /// that new connections receive first.
    pub async fn publish(&self, msg: &PushMsg) {
        let raw = match encode_frame(msg, DEFAULT_MAX_FRAME_BYTES) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(event = "push_encode_error", error = %err);
                return;
            }
        };
        let (kind, subtype) = msg.route();
        debug!(event = "push", r#type = kind, subtype = subtype);
        if let PushMsg::Console(fgsim_core::ConsoleMsg::Status { status }) = msg {
            // Held across the broadcast so a concurrent snapshot cannot overtake it.
            let mut last = self.last_status.write().await;
            *last = *status;
            self.broadcast(&raw).await;
        } else {
            self.broadcast(&raw).await;
        }
    }

    async fn broadcast(&self, raw: &str) {
        for client in self.snapshot_clients().await {
            if !client.send_text(raw).await {
                warn!(event = "send_error", conn_id = %client.conn_id);
                self.remove_client(&client, "send_error").await;
            }
        }
    }

    async fn send_snapshot(&self, client: &Client) {
        let last = self.last_status.read().await;
        let raw = match encode_frame(&PushMsg::status(*last), DEFAULT_MAX_FRAME_BYTES) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(event = "snapshot_encode_error", error = %err);
                return;
            }
        };
        if !client.send_text(&raw).await {
            warn!(event = "snapshot_error", conn_id = %client.conn_id);
            return;
        }
        info!(event = "snapshot_sent", conn_id = %client.conn_id);
    }

    pub fn start_stale_reaper(self: Arc<Self>) {
        if self.config.stale_seconds == 0 {
            return;
        }
        let stale_after = Duration::from_secs(self.config.stale_seconds);
        let interval = stale_after / 2;
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for client in hub.snapshot_clients().await {
                    let last_seen = client.last_seen().await;
                    if Instant::now().duration_since(last_seen) > stale_after {
                        warn!(event = "stale_close", conn_id = %client.conn_id);
                        hub.remove_client(&client, "stale").await;
                    }
                }
            }
        });
    }

    fn start_ping(self: Arc<Self>, client: Arc<Client>) {
        if self.config.ping_interval.is_zero() {
            return;
        }
        let interval = self.config.ping_interval;
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if client.sender.send(Message::Ping(Vec::new())).await.is_err() {
                    debug!(event = "ping_stopped", conn_id = %client.conn_id);
                    hub.remove_client(&client, "ping_failed").await;
                    return;
                }
            }
        });
    }

    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, remote: SocketAddr) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(self.config.queue_capacity.max(1));
        let write_timeout = self.config.write_timeout;

        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                let send = ws_sender.send(msg);
                if tokio::time::timeout(write_timeout, send).await.is_err() {
                    return;
                }
                if closing {
                    return;
                }
            }
        });

        let client = Arc::new(Client {
            conn_id: self.next_conn_id(),
            remote,
            sender: tx.clone(),
            last_seen: Arc::new(AsyncMutex::new(Instant::now())),
        });
        self.register_client(client.clone()).await;
        self.send_snapshot(&client).await;
        self.clone().start_ping(client.clone());

        while let Some(result) = ws_receiver.next().await {
            let msg = match result {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "read_error", conn_id = %client.conn_id, error = %err);
                    break;
                }
            };
            client.touch().await;
            match msg {
                Message::Close(_) => {
                    info!(event = "client_close", conn_id = %client.conn_id);
                    break;
                }
                Message::Text(text) => {
                    debug!(event = "inbound_ignored", conn_id = %client.conn_id, size = text.len());
                }
                Message::Binary(bytes) => {
                    debug!(event = "inbound_ignored", conn_id = %client.conn_id, size = bytes.len());
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }

        self.remove_client(&client, "disconnect").await;
        drop(client);
        drop(tx);
        let _ = write_task.await;
    }
}
