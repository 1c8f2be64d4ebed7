use arttic_core::types::{ConnId, Timestamp};
use axum::body::Bytes;
use axum::extract::ws::Message;
use indexmap::IndexMap;
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
    pub connected_at: Timestamp,
}

/// All active WebSocket connections, in the order they connected.
///
/// Delivery never fails: a connection whose channel has closed is dropped
/// from the registry on the next send that touches it. Thread-safe via
/// interior `RwLock`; designed to be wrapped in `Arc`.
pub struct ConnectionRegistry {
    connections: RwLock<IndexMap<ConnId, WsConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(IndexMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink. Re-adding an existing id
    /// replaces its channel.
    pub async fn add(&self, conn_id: ConnId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            sender: tx,
            connected_at: chrono::Utc::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub async fn remove(&self, conn_id: &str) -> bool {
        let Some(conn) = self.connections.write().await.shift_remove(conn_id) else {
            return false;
        };
        let connected_secs = (chrono::Utc::now() - conn.connected_at).num_seconds();
        tracing::debug!(conn_id, connected_secs, "Connection removed");
        true
    }

    /// Deliver `message` to one connection.
    ///
    /// Returns `false` if the connection is unknown or its channel has
    /// closed, in which case it is removed.
    pub async fn send_to(&self, conn_id: &str, message: Message) -> bool {
        let delivered = match self.connections.read().await.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => return false,
        };
        if !delivered {
            tracing::debug!(conn_id, "Pruning closed connection");
            self.remove(conn_id).await;
        }
        delivered
    }

    /// Deliver `message` to every connection.
    ///
    /// Each delivery is independent of the others. Returns the number of
    /// connections reached; closed ones are pruned.
    pub async fn broadcast(&self, message: Message) -> usize {
        let mut closed = Vec::new();
        let mut delivered = 0;
        {
            let conns = self.connections.read().await;
            for (id, conn) in conns.iter() {
                if conn.sender.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(id.clone());
                }
            }
        }
        if !closed.is_empty() {
            let mut conns = self.connections.write().await;
            for id in &closed {
                conns.shift_remove(id);
            }
            tracing::debug!(pruned = closed.len(), "Pruned closed connections during broadcast");
        }
        delivered
    }

    /// Ids of the registered connections, oldest first.
    pub async fn connection_ids(&self) -> Vec<ConnId> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the registry.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client, pruning closed ones.
    /// Returns the number of clients pinged.
    pub async fn ping_all(&self) -> usize {
        self.broadcast(Message::Ping(Bytes::new())).await
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
