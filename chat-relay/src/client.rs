use std::{
    io::{self, Write},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tracing::{debug, warn};

use crate::{
    cli::ClientArgs,
    connection::Connection,
    wire::{self, chat_line, joined_notice, left_notice, read_chunk},
};

/// Where received chat text is shown.
pub trait DisplaySink: Send + Sync {
    fn show(&self, line: &str);

    /// Redraws the input prompt, if the sink has one.
    fn prompt(&self) {}
}

/// Terminal fallback used until a display sink is attached.
pub struct ConsoleSink {
    name: String,
}

impl ConsoleSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl DisplaySink for ConsoleSink {
    fn show(&self, line: &str) {
        print_console(&format!("\r{line}\n{}: ", self.name));
    }

    fn prompt(&self) {
        print_console(&format!("{}: ", self.name));
    }
}

fn print_console(text: &str) {
    let mut stdout = io::stdout().lock();
    if let Err(error) = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
        debug!(?error, "failed to write to console");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user entered the quit sentinel.
    Quit,
    /// The server closed the socket or the socket failed.
    ConnectionLost,
}

/// Invoked once when the session ends. The production hook never returns.
pub type ExitHook = Arc<dyn Fn(SessionEnd) + Send + Sync>;

/// Terminates the whole process, bypassing any other in-flight cleanup.
pub fn exit_process() -> ExitHook {
    Arc::new(|end: SessionEnd| {
        if end == SessionEnd::ConnectionLost {
            println!("\nOh no, we have lost connection to the server!");
        }
        println!("\nQuitting...");
        std::process::exit(0);
    })
}

enum Flow {
    Continue,
    Quit,
}

/// A client's paired send and receive tasks over one socket.
///
/// The display sink is bound late, after both tasks are running. Anything
/// received before [`Session::attach_sink`] goes to the console only.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionState>,
}

struct SessionState {
    name: String,
    connection: Connection,
    sink: OnceLock<Arc<dyn DisplaySink>>,
    console: Arc<dyn DisplaySink>,
    exit: ExitHook,
    ended: AtomicBool,
}

impl Session {
    pub fn new<W>(
        name: impl Into<String>,
        peer: SocketAddr,
        writer: W,
        console: Arc<dyn DisplaySink>,
        exit: ExitHook,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(SessionState {
                name: name.into(),
                connection: Connection::new(peer, writer),
                sink: OnceLock::new(),
                console,
                exit,
                ended: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Spawns the send and receive tasks, then announces the join.
    pub async fn start<R, I>(&self, reader: R, input: I) -> io::Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        I: AsyncBufRead + Send + Unpin + 'static,
    {
        tokio::spawn(send_loop(self.clone(), input));
        tokio::spawn(receive_loop(self.clone(), reader));
        self.inner.connection.send(&joined_notice(self.name())).await
    }

    /// Binds the display sink. Only the first call takes effect; later sinks
    /// are handed back.
    pub fn attach_sink(&self, sink: Arc<dyn DisplaySink>) -> Result<(), Arc<dyn DisplaySink>> {
        self.inner.sink.set(sink)
    }

    /// Send path for a UI: takes the entry text (leaving it empty), echoes it
    /// locally, then sends it or quits.
    pub async fn submit(&self, entry: &mut String) -> io::Result<()> {
        let text = std::mem::take(entry);
        let text = wire::trim_line(&text);
        self.display(&chat_line(self.name(), text));
        self.send_or_quit(text).await.map(|_| ())
    }

    async fn send_or_quit(&self, text: &str) -> io::Result<Flow> {
        if wire::is_quit(text) {
            self.quit().await;
            return Ok(Flow::Quit);
        }
        self.inner
            .connection
            .send(&chat_line(self.name(), text))
            .await?;
        Ok(Flow::Continue)
    }

    async fn quit(&self) {
        if let Err(error) = self.inner.connection.send(&left_notice(self.name())).await {
            debug!(?error, "failed to send farewell");
        }
        self.inner.connection.close().await;
        self.end(SessionEnd::Quit);
    }

    fn display(&self, line: &str) {
        match self.inner.sink.get() {
            Some(sink) => sink.show(line),
            None => self.inner.console.show(line),
        }
    }

    fn end(&self, reason: SessionEnd) {
        if !self.inner.ended.swap(true, Ordering::AcqRel) {
            (self.inner.exit)(reason);
        }
    }
}

async fn send_loop<I>(session: Session, mut input: I)
where
    I: AsyncBufRead + Unpin,
{
    let mut line = String::new();

    loop {
        session.inner.console.prompt();
        line.clear();
        match input.read_line(&mut line).await {
            Ok(0) => {
                debug!("input closed; leaving the chat");
                break;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(?error, "failed to read input; leaving the chat");
                break;
            }
        }

        match session.send_or_quit(wire::trim_line(&line)).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => return,
            Err(error) => {
                warn!(?error, "failed to send message");
                session.inner.connection.close().await;
                session.end(SessionEnd::ConnectionLost);
                return;
            }
        }
    }

    session.quit().await;
}

async fn receive_loop<R>(session: Session, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_chunk(&mut reader).await {
            Ok(Some(message)) => session.display(&message),
            Ok(None) => break,
            Err(error) => {
                debug!(?error, "receive failed");
                break;
            }
        }
    }

    session.inner.connection.close().await;
    session.end(SessionEnd::ConnectionLost);
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = establish_connection(&args.host, args.port).await?;
    let peer = stream.peer_addr().context("failed to read server address")?;
    let (reader, writer) = stream.into_split();

    let mut input = BufReader::new(tokio::io::stdin());
    let name = prompt_name(&mut input).await?;
    write_console(&format!(
        "\nWelcome, {name}! Getting ready to send and receive messages...\n"
    ))
    .await?;

    let console: Arc<dyn DisplaySink> = Arc::new(ConsoleSink::new(&name));
    let session = Session::new(name, peer, writer, console, exit_process());
    session
        .start(reader, input)
        .await
        .context("failed to announce join")?;
    write_console("\rAll set! Leave the chatroom anytime by typing 'QUIT'\n\n").await?;

    // The session tasks end the process; there is nothing left to do here.
    std::future::pending::<()>().await;
    Ok(())
}

async fn establish_connection(host: &str, port: u16) -> Result<TcpStream> {
    write_console(&format!("Trying to connect to {host}:{port}...\n")).await?;
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("failed to connect to {host}:{port}"))?;
    write_console(&format!("Successfully connected to {host}:{port}\n")).await?;
    Ok(stream)
}

async fn prompt_name<I>(input: &mut I) -> Result<String>
where
    I: AsyncBufRead + Unpin,
{
    write_console("\nYour name: ").await?;
    let mut name = String::new();
    let bytes = input
        .read_line(&mut name)
        .await
        .context("failed to read name")?;
    if bytes == 0 {
        anyhow::bail!("console closed before a name was entered");
    }
    Ok(wire::trim_line(&name).to_string())
}

async fn write_console(text: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await
}
