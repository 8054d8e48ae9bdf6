//! Game server chat client
//!
//! Async TCP connection management, the three-frame login handshake, and
//! outbound message framing. Inbound bytes are republished raw; nothing is
//! parsed or reassembled here.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{
    split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf,
};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Chat client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// An I/O operation was attempted before `open`.
    #[error("connection has not been opened")]
    NotConnected,

    #[error("connection is already open")]
    AlreadyConnected,

    #[error("a read loop is already running on this connection")]
    ReaderActive,

    #[error("address resolution failed: {0}")]
    AddressResolution(String),

    #[error("dial failed: {0}")]
    Dial(#[source] io::Error),

    /// Stable sentinel for failed message writes; the transport detail is
    /// deliberately hidden so callers can branch on one uniform signal.
    #[error("unable to write over the connection")]
    Write,

    #[error("text contains protocol control characters")]
    Framing,

    #[error("connection closed by remote host")]
    ConnectionClosed,

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unopened,
    Open,
    Closed,
}

/// Chat client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Read buffer size (the protocol delivers chunks of at most this size)
    pub read_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_buffer_size: 1024,
        }
    }
}

/// Chat client
///
/// Owns at most one bidirectional stream, split into read and write halves.
/// The write half stays with the client; the read half is handed to the
/// background read loop once `read` is called. Generic over the stream so
/// wrapped transports (and the tests) can attach anything that implements
/// `AsyncRead + AsyncWrite`.
pub struct Client<S = TcpStream> {
    config: ClientConfig,
    state: ConnectionState,
    writer: Option<WriteHalf<S>>,
    reader: Option<ReadHalf<S>>,
    /// Dropped on `close`; the read loop observes this and exits.
    stop_tx: Option<mpsc::Sender<()>>,
}

impl Client {
    /// Create a new client with no connection.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Unopened,
            writer: None,
            reader: None,
            stop_tx: None,
        }
    }

    /// Connect to the given `host:port`.
    ///
    /// A single attempt, no retry. A failed open leaves the client in its
    /// previous state. Opening an already open client is rejected instead of
    /// silently leaking the prior socket.
    pub async fn open(&mut self, host: &str) -> Result<(), ClientError> {
        if self.state == ConnectionState::Open {
            return Err(ClientError::AlreadyConnected);
        }
        info!("connecting to {host}");

        let mut addrs = lookup_host(host)
            .await
            .map_err(|e| ClientError::AddressResolution(e.to_string()))?;
        let addr = addrs
            .next()
            .ok_or_else(|| ClientError::AddressResolution(format!("no addresses for {host}")))?;
        debug!("resolved {host} to {addr}");

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                ClientError::Dial(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
            })?
            .map_err(ClientError::Dial)?;
        stream.set_nodelay(true).map_err(ClientError::Dial)?;

        let (reader, writer) = split(stream);
        self.reader = Some(reader);
        self.writer = Some(writer);
        self.state = ConnectionState::Open;
        info!("connected to {host}");

        Ok(())
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Client<S> {
    /// Get the connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Close the connection.
    ///
    /// Idempotent and infallible; underlying close errors are not
    /// observable. Dropping the stop sender terminates a running read loop,
    /// which is the only guaranteed way to stop it.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Open {
            return;
        }
        self.stop_tx.take();
        self.writer.take();
        self.reader.take();
        self.state = ConnectionState::Closed;
        info!("connection closed");
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Attach an already established stream. The client starts `Open`.
    pub fn from_stream(stream: S) -> Self {
        Self::from_stream_with_config(stream, ClientConfig::default())
    }

    pub fn from_stream_with_config(stream: S, config: ClientConfig) -> Self {
        let (reader, writer) = split(stream);
        Self {
            config,
            state: ConnectionState::Open,
            writer: Some(writer),
            reader: Some(reader),
            stop_tx: None,
        }
    }

    /// Perform the login handshake.
    ///
    /// Writes three frames in order: the protocol-required empty line, then
    /// the account, then the password. No server response is read; success
    /// means the transport accepted the bytes. Transport failures surface
    /// the raw error, and frames already written are not un-sent.
    pub async fn login(&mut self, account: &str, password: &str) -> Result<(), ClientError> {
        let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;

        writer.write_all(b"\r\n").await?;
        writer.write_all(format!("{account}\n\n").as_bytes()).await?;
        writer.write_all(format!("{password}\n\n").as_bytes()).await?;
        writer.flush().await?;

        debug!("login frames sent for account {account}");
        Ok(())
    }

    /// Write a framed message over the connection.
    pub async fn write(&mut self, message: &str) -> Result<(), ClientError> {
        let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
        check_framing(message)?;

        let frame = format!("{message}\n\n");
        writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|_| ClientError::Write)?;
        writer.flush().await.map_err(|_| ClientError::Write)?;

        debug!("sent {} bytes", frame.len());
        Ok(())
    }

    /// Whisper a message to a specific account.
    pub async fn whisper(&mut self, account: &str, message: &str) -> Result<(), ClientError> {
        let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
        check_framing(account)?;
        check_framing(message)?;

        let frame = format!("/msg {account} {message}\n\n");
        writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|_| ClientError::Write)?;
        writer.flush().await.map_err(|_| ClientError::Write)?;

        debug!("whispered {account}");
        Ok(())
    }

    /// Start the background read loop.
    ///
    /// Returns immediately after spawning; from then on every chunk pulled
    /// off the socket is published on `data_tx` exactly as received, and the
    /// first read failure (including clean remote close) is published once
    /// on `error_tx`, after which the loop stops permanently. Only one loop
    /// may run per connection.
    pub fn read(
        &mut self,
        data_tx: mpsc::Sender<Bytes>,
        error_tx: mpsc::Sender<ClientError>,
    ) -> Result<(), ClientError> {
        if self.state != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        let reader = self.reader.take().ok_or(ClientError::ReaderActive)?;

        let (stop_tx, stop_rx) = mpsc::channel(1);
        self.stop_tx = Some(stop_tx);
        tokio::spawn(read_loop(
            reader,
            data_tx,
            error_tx,
            stop_rx,
            self.config.read_buffer_size,
        ));

        Ok(())
    }
}

fn check_framing(text: &str) -> Result<(), ClientError> {
    if text.chars().any(|c| c == '\r' || c == '\n') {
        return Err(ClientError::Framing);
    }
    Ok(())
}

/// Drain the socket and republish chunks and the terminal error.
async fn read_loop<S>(
    mut reader: ReadHalf<S>,
    data_tx: mpsc::Sender<Bytes>,
    error_tx: mpsc::Sender<ClientError>,
    mut stop_rx: mpsc::Receiver<()>,
    buffer_size: usize,
) where
    S: AsyncRead + Send + 'static,
{
    let mut buffer = vec![0u8; buffer_size];
    loop {
        tokio::select! {
            result = reader.read(&mut buffer) => match result {
                Ok(0) => {
                    info!("remote host closed the connection");
                    let _ = error_tx.send(ClientError::ConnectionClosed).await;
                    break;
                }
                Ok(n) => {
                    if data_tx.send(Bytes::copy_from_slice(&buffer[..n])).await.is_err() {
                        warn!("data receiver dropped, stopping read loop");
                        break;
                    }
                }
                Err(e) => {
                    error!("read failed: {e}");
                    let _ = error_tx.send(ClientError::Transport(e)).await;
                    break;
                }
            },
            _ = stop_rx.recv() => {
                debug!("read loop stopped");
                break;
            }
        }
    }
}
