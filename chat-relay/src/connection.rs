use std::{
    fmt, io,
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tracing::debug;

use crate::wire::write_text;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Closed,
}

/// Send side of one peer socket.
///
/// The write half sits behind its own lock so two broadcasts racing towards
/// the same peer never interleave their bytes on the wire.
pub struct Connection {
    peer: SocketAddr,
    writer: Mutex<BoxedWriter>,
    closed: AtomicBool,
}

impl Connection {
    pub fn new<W>(peer: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer,
            writer: Mutex::new(Box::new(writer)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn status(&self) -> Status {
        if self.closed.load(Ordering::Acquire) {
            Status::Closed
        } else {
            Status::Active
        }
    }

    pub async fn send(&self, text: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        if self.status() == Status::Closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            ));
        }
        write_text(&mut *writer, text).await
    }

    /// Shuts down the write side. Closing twice is a no-op.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(error) = writer.shutdown().await {
            debug!(peer = %self.peer, ?error, "failed to shut down connection cleanly");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("status", &self.status())
            .finish()
    }
}
