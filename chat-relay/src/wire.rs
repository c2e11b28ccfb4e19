use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the bytes taken by a single receive call.
pub const RECV_CHUNK: usize = 1024;

/// Input that ends a client session instead of being sent as chat text.
pub const QUIT: &str = "QUIT";

pub const DEFAULT_PORT: u16 = 1060;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

pub fn chat_line(name: &str, body: &str) -> String {
    format!("{name}: {body}")
}

pub fn joined_notice(name: &str) -> String {
    format!("Server: {name} has joined the chat. Say hi!")
}

pub fn left_notice(name: &str) -> String {
    format!("Server: {name} has left the chat.")
}

/// Strips the line terminator left by a console read.
pub fn trim_line(line: &str) -> &str {
    line.trim_end_matches(LINE_ENDINGS)
}

pub fn is_quit(line: &str) -> bool {
    trim_line(line) == QUIT
}

/// Performs one receive of at most [`RECV_CHUNK`] bytes.
///
/// There is no framing on the wire: whatever a single read returns is one
/// message. Returns `Ok(None)` once the peer has closed its side.
pub async fn read_chunk<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; RECV_CHUNK];
    let bytes = reader.read(&mut buf).await?;
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf[..bytes]).into_owned()))
}

/// Writes one message in a single write and flushes it to the peer.
pub async fn write_text<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}
