//! TCP implementation of [`ByteStream`] and the factory that creates it.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::{
    ByteReader, ByteStream, ByteWriter, CancelToken, StreamId, TransportError,
};

/// Counter for generating unique stream IDs.
static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Write timeout applied to every socket, matching the ten seconds the
/// game has always used.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Size of the scratch buffer used when probing the socket for data.
const READ_CHUNK: usize = 4096;

/// A connected TCP socket.
#[derive(Debug)]
pub struct TcpByteStream {
    id: StreamId,
    stream: TcpStream,
    write_timeout: Duration,
}

impl TcpByteStream {
    fn new(stream: TcpStream, write_timeout: Duration) -> Self {
        // Frames are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "could not disable Nagle's algorithm");
        }
        Self {
            id: StreamId::new(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed)),
            stream,
            write_timeout,
        }
    }

    /// Returns the address of the remote peer.
    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

impl ByteStream for TcpByteStream {
    type Reader = TcpReader;
    type Writer = TcpWriter;

    fn id(&self) -> StreamId {
        self.id
    }

    fn into_split(self) -> (TcpReader, TcpWriter) {
        let (read, write) = self.stream.into_split();
        (
            TcpReader {
                id: self.id,
                half: read,
                buffered: Vec::new(),
            },
            TcpWriter {
                id: self.id,
                half: write,
                timeout: self.write_timeout,
            },
        )
    }
}

/// Receiving half of a [`TcpByteStream`].
///
/// Probing for availability reads ahead into `buffered`, so a later
/// [`read`](ByteReader::read) is served from there first.
#[derive(Debug)]
pub struct TcpReader {
    id: StreamId,
    half: OwnedReadHalf,
    buffered: Vec<u8>,
}

impl TcpReader {
    fn fill(&mut self) -> Result<(), TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.half.try_read(&mut chunk) {
            Ok(0) => Err(TransportError::ConnectionClosed(format!(
                "{} closed by peer",
                self.id
            ))),
            Ok(n) => {
                self.buffered.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(TransportError::ReceiveFailed(e)),
        }
    }
}

impl ByteReader for TcpReader {
    fn data_available(&mut self) -> Result<bool, TransportError> {
        if self.buffered.is_empty() {
            self.fill()?;
        }
        Ok(!self.buffered.is_empty())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.buffered.is_empty() {
            self.fill()?;
        }
        let n = buf.len().min(self.buffered.len());
        buf[..n].copy_from_slice(&self.buffered[..n]);
        self.buffered.drain(..n);
        Ok(n)
    }
}

/// Sending half of a [`TcpByteStream`].
#[derive(Debug)]
pub struct TcpWriter {
    id: StreamId,
    half: OwnedWriteHalf,
    timeout: Duration,
}

impl ByteWriter for TcpWriter {
    async fn write(
        &mut self,
        buf: &[u8],
        cancel: &CancelToken,
    ) -> Result<(), TransportError> {
        let write = async {
            self.half.write_all(buf).await?;
            self.half.flush().await
        };
        match cancel.run(tokio::time::timeout(self.timeout, write)).await? {
            Ok(Ok(())) => {
                tracing::trace!(id = %self.id, len = buf.len(), "wrote bytes");
                Ok(())
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(TransportError::TimedOut(e))
            }
            Ok(Err(e)) => Err(TransportError::SendFailed(e)),
            Err(_) => Err(TransportError::TimedOut(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("write did not finish within {:?}", self.timeout),
            ))),
        }
    }
}

/// Creates [`TcpByteStream`]s, either as the listening side or as the
/// connecting side.
///
/// Both operations honor cancellation and leave no socket behind when they
/// fail: everything partially built is owned by a local and dropped on the
/// way out.
#[derive(Debug, Clone)]
pub struct StreamFactory {
    write_timeout: Duration,
}

impl StreamFactory {
    /// Creates a factory using [`DEFAULT_WRITE_TIMEOUT`].
    pub fn new() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Sets the write timeout applied to created streams.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Listens on `addr:port` and returns the first accepted connection.
    ///
    /// The listener is dropped before this returns, whether the accept
    /// succeeded, failed, or was cancelled.
    ///
    /// # Errors
    /// - [`TransportError::Cancelled`] if `cancel` fires first
    /// - [`TransportError::AcceptFailed`] for any bind or accept failure
    pub async fn listen_and_accept(
        &self,
        addr: IpAddr,
        port: u16,
        cancel: &CancelToken,
    ) -> Result<TcpByteStream, TransportError> {
        let listener = self.bind(addr, port, cancel).await?;
        self.accept(listener, cancel).await
    }

    /// Binds a listener without accepting yet.
    ///
    /// Useful when the caller needs the bound port (for example after
    /// binding port 0) before the peer connects.
    pub async fn bind(
        &self,
        addr: IpAddr,
        port: u16,
        cancel: &CancelToken,
    ) -> Result<TcpListener, TransportError> {
        let listener = cancel
            .run(TcpListener::bind(SocketAddr::new(addr, port)))
            .await?
            .map_err(TransportError::AcceptFailed)?;
        tracing::debug!(%addr, port, "listening for peer");
        Ok(listener)
    }

    /// Accepts the first connection on `listener`, consuming it.
    pub async fn accept(
        &self,
        listener: TcpListener,
        cancel: &CancelToken,
    ) -> Result<TcpByteStream, TransportError> {
        let (stream, peer) = cancel
            .run(listener.accept())
            .await?
            .map_err(TransportError::AcceptFailed)?;
        drop(listener);

        let stream = TcpByteStream::new(stream, self.write_timeout);
        tracing::debug!(id = %stream.id, %peer, "accepted peer");
        Ok(stream)
    }

    /// Connects to `addr:port`.
    ///
    /// # Errors
    /// - [`TransportError::Cancelled`] if `cancel` fires first
    /// - [`TransportError::ConnectFailed`] for any connect failure
    pub async fn connect(
        &self,
        addr: IpAddr,
        port: u16,
        cancel: &CancelToken,
    ) -> Result<TcpByteStream, TransportError> {
        let stream = cancel
            .run(TcpStream::connect(SocketAddr::new(addr, port)))
            .await?
            .map_err(TransportError::ConnectFailed)?;

        let stream = TcpByteStream::new(stream, self.write_timeout);
        tracing::debug!(id = %stream.id, %addr, port, "connected to peer");
        Ok(stream)
    }
}

impl Default for StreamFactory {
    fn default() -> Self {
        Self::new()
    }
}
