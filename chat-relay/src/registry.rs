use std::{net::SocketAddr, sync::Arc};

use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::Connection;

/// Connections that currently receive broadcasts.
///
/// The lock is held only for the duration of each operation. `broadcast`
/// copies the list and performs the network sends outside the lock.
#[derive(Default)]
pub struct Registry {
    connections: Mutex<Vec<Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, connection: Arc<Connection>) {
        self.connections.lock().await.push(connection);
    }

    /// Removes by identity. Returns `false` when the connection was already gone.
    pub async fn remove(&self, connection: &Arc<Connection>) -> bool {
        let mut connections = self.connections.lock().await;
        let before = connections.len();
        connections.retain(|entry| !Arc::ptr_eq(entry, connection));
        connections.len() != before
    }

    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().await.clone()
    }

    /// Number of live connections, for logging and observation.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Sends `message` to every connection whose peer differs from `source`.
    ///
    /// A failed send is logged and skipped. Returns the number of peers that
    /// accepted the message.
    pub async fn broadcast(&self, message: &str, source: SocketAddr) -> usize {
        let targets = self.snapshot().await;
        let mut delivered = 0;

        for connection in targets.iter().filter(|c| c.peer() != source) {
            match connection.send(message).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    debug!(peer = %connection.peer(), ?error, "failed to deliver message to client");
                }
            }
        }

        delivered
    }

    /// Closes every registered connection and empties the registry.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.connections.lock().await.drain(..).collect();
        for connection in &drained {
            connection.close().await;
        }
        drained.len()
    }
}
