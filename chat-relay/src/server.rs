use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    net::{lookup_host, tcp::OwnedReadHalf, TcpListener, TcpSocket, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{connection::Connection, registry::Registry, wire::read_chunk};

/// Only one pending connection waits in the accept backlog.
const BACKLOG: u32 = 1;

/// Console input that stops the server.
pub const SHUTDOWN_COMMAND: &str = "q";

/// Resolves `host:port` and listens on the first address it yields.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    let addr = lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("no address found for {host}:{port}"))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    };
    let socket = socket.context("failed to create listening socket")?;

    socket
        .set_reuseaddr(true)
        .context("failed to enable address reuse")?;
    socket
        .bind(addr)
        .with_context(|| format!("failed to bind {addr}"))?;
    socket
        .listen(BACKLOG)
        .with_context(|| format!("failed to listen on {addr}"))
}

pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until `shutdown` resolves, then closes every
    /// registered connection.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, registry } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&registry).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry).await;
                }
            }
        }

        Ok(())
    }
}

/// Resolves when the console enters [`SHUTDOWN_COMMAND`] or Ctrl-C arrives.
pub async fn shutdown_signal() {
    let console = BufReader::new(tokio::io::stdin());
    select! {
        _ = wait_for_shutdown_command(console) => {}
        ctrl_c = tokio::signal::ctrl_c() => {
            if let Err(error) = ctrl_c {
                warn!(?error, "failed to install ctrl-c handler");
            }
        }
    }
}

/// Reads console lines until one equals [`SHUTDOWN_COMMAND`].
///
/// If the console closes first the command can never arrive, so this waits
/// forever and leaves the server running.
pub async fn wait_for_shutdown_command<R>(console: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = console.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim_end() == SHUTDOWN_COMMAND => return,
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(error) => {
                warn!(?error, "failed to read console command");
                break;
            }
        }
    }
    debug!("console closed; shutdown command disabled");
    std::future::pending::<()>().await
}

async fn handle_shutdown(registry: &Registry) {
    info!("closing all connections");
    let closed = registry.close_all().await;
    info!(closed, "shutting down the server");
}

async fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<Registry>,
) {
    match result {
        Ok((stream, peer)) => {
            info!(peer = %peer, "accepted a new connection");
            register_and_spawn(stream, peer, registry).await;
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

async fn register_and_spawn(stream: TcpStream, peer: SocketAddr, registry: &Arc<Registry>) {
    let (reader, writer) = stream.into_split();
    let connection = Arc::new(Connection::new(peer, writer));

    // Registered before the relay task starts so no broadcast can miss it.
    registry.add(Arc::clone(&connection)).await;
    info!(peer = %peer, "ready to receive messages");

    let registry = Arc::clone(registry);
    tokio::spawn(relay_messages(reader, connection, registry));
}

async fn relay_messages(
    mut reader: OwnedReadHalf,
    connection: Arc<Connection>,
    registry: Arc<Registry>,
) {
    let peer = connection.peer();

    loop {
        match read_chunk(&mut reader).await {
            Ok(Some(message)) => {
                info!(peer = %peer, message = ?message, "relaying message");
                registry.broadcast(&message, peer).await;
            }
            Ok(None) => {
                info!(peer = %peer, "client closed the connection");
                break;
            }
            Err(error) => {
                info!(peer = %peer, ?error, "connection dropped");
                break;
            }
        }
    }

    connection.close().await;
    registry.remove(&connection).await;
    let remaining = registry.len().await;
    info!(peer = %peer, "connection removed, {remaining} remaining");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn shutdown_command_requires_exact_match() {
        let (mut console_tx, console_rx) = tokio::io::duplex(256);
        let waiter = tokio::spawn(wait_for_shutdown_command(BufReader::new(console_rx)));

        crate::wire::write_text(&mut console_tx, "quit\nQ\n")
            .await
            .expect("write");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        crate::wire::write_text(&mut console_tx, "q\n")
            .await
            .expect("write");
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("shutdown command should be recognised")
            .expect("join");
    }

    #[tokio::test]
    async fn closed_console_never_triggers_shutdown() {
        let (console_tx, console_rx) = tokio::io::duplex(16);
        drop(console_tx);

        let waited = timeout(
            Duration::from_millis(100),
            wait_for_shutdown_command(BufReader::new(console_rx)),
        )
        .await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn bind_resolves_host_and_picks_ephemeral_port() {
        let listener = bind("127.0.0.1", 0).await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }
}
