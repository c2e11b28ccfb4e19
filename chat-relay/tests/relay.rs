use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chat_relay::{
    registry::Registry,
    server::{bind, Server},
    wire::{left_notice, read_chunk, write_text},
};
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

struct RunningServer {
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

async fn start_server() -> Result<RunningServer> {
    let listener = bind("127.0.0.1", 0).await?;
    let server = Server::new(listener);
    let addr = server.local_addr()?;
    let registry = server.registry();

    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async move {
        let _ = shutdown_rx.await;
    }));

    Ok(RunningServer {
        addr,
        registry,
        shutdown,
        task,
    })
}

async fn wait_for_registered(registry: &Registry, expected: usize) -> Result<()> {
    timeout(WAIT, async {
        while registry.len().await != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .with_context(|| format!("registry never reached {expected} connections"))
}

async fn connect_all(server: &RunningServer, count: usize) -> Result<Vec<TcpStream>> {
    let mut clients = Vec::with_capacity(count);
    for _ in 0..count {
        clients.push(TcpStream::connect(server.addr).await?);
        wait_for_registered(&server.registry, clients.len()).await?;
    }
    Ok(clients)
}

async fn expect_chunk(stream: &mut TcpStream) -> Result<Option<String>> {
    Ok(timeout(WAIT, read_chunk(stream))
        .await
        .context("timed out waiting for a message")??)
}

async fn expect_silence(stream: &mut TcpStream) {
    let waited = timeout(QUIET, read_chunk(stream)).await;
    assert!(waited.is_err(), "unexpected data: {waited:?}");
}

#[tokio::test]
async fn every_other_client_gets_exactly_one_copy() -> Result<()> {
    let server = start_server().await?;
    let mut clients = connect_all(&server, 4).await?;

    write_text(&mut clients[0], "alice: hello everyone").await?;

    for client in clients.iter_mut().skip(1) {
        let got = expect_chunk(client).await?;
        assert_eq!(got.as_deref(), Some("alice: hello everyone"));
    }
    for client in clients.iter_mut() {
        expect_silence(client).await;
    }

    let _ = server.shutdown.send(());
    server.task.await??;
    Ok(())
}

#[tokio::test]
async fn departed_client_is_deregistered_and_skipped() -> Result<()> {
    let server = start_server().await?;
    let mut clients = connect_all(&server, 2).await?;
    let mut bob = clients.pop().context("bob")?;
    let mut alice = clients.pop().context("alice")?;

    write_text(&mut alice, "alice: hello").await?;
    assert_eq!(expect_chunk(&mut bob).await?.as_deref(), Some("alice: hello"));
    expect_silence(&mut alice).await;

    write_text(&mut bob, &left_notice("bob")).await?;
    bob.shutdown().await?;

    assert_eq!(
        expect_chunk(&mut alice).await?.as_deref(),
        Some("Server: bob has left the chat.")
    );
    wait_for_registered(&server.registry, 1).await?;
    assert_eq!(expect_chunk(&mut bob).await?, None);

    let alice_addr = alice.local_addr()?;
    assert_eq!(server.registry.broadcast("alice: anyone?", alice_addr).await, 0);

    let _ = server.shutdown.send(());
    server.task.await??;
    Ok(())
}

#[tokio::test]
async fn shutdown_with_no_clients_is_clean() -> Result<()> {
    let server = start_server().await?;
    assert!(server.registry.is_empty().await);

    let _ = server.shutdown.send(());
    timeout(WAIT, server.task).await???;
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_every_connection() -> Result<()> {
    let server = start_server().await?;
    let mut clients = connect_all(&server, 3).await?;

    let _ = server.shutdown.send(());
    server.task.await??;

    assert!(server.registry.is_empty().await);
    for client in clients.iter_mut() {
        assert_eq!(expect_chunk(client).await?, None);
    }
    Ok(())
}
