//! The minimal byte-stream capability the rest of Pairlink is written
//! against.
//!
//! It exists so the framer and the connection state machine can be tested
//! without sockets. A stream is split once into a reader and a writer so
//! the two directions can be driven by different tasks at the same time.

use std::future::Future;

use crate::{CancelToken, StreamId, TransportError};

/// A bidirectional byte stream that can be split into independent halves.
///
/// Dropping both halves releases the underlying resource.
pub trait ByteStream: Send + 'static {
    /// The receiving half.
    type Reader: ByteReader;
    /// The sending half.
    type Writer: ByteWriter;

    /// Identifier used in log output.
    fn id(&self) -> StreamId;

    /// Splits the stream into its receiving and sending halves.
    fn into_split(self) -> (Self::Reader, Self::Writer);
}

/// The receiving half of a [`ByteStream`].
///
/// Both methods are non-blocking: callers poll [`data_available`] and back
/// off on their own when nothing has arrived yet.
///
/// [`data_available`]: Self::data_available
pub trait ByteReader: Send + 'static {
    /// Returns `true` if at least one byte can be read right now.
    ///
    /// # Errors
    /// [`TransportError::ConnectionClosed`] once the peer has closed the
    /// stream and everything it sent has been consumed.
    fn data_available(&mut self) -> Result<bool, TransportError>;

    /// Reads whatever is available into `buf`, up to `buf.len()` bytes.
    ///
    /// Returns the number of bytes copied, which may be less than
    /// requested and is `0` if nothing is available.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// The sending half of a [`ByteStream`].
pub trait ByteWriter: Send + 'static {
    /// Writes all of `buf` and flushes it before returning.
    ///
    /// # Errors
    /// [`TransportError::Cancelled`] if `cancel` fires before the write
    /// completes; the stream may then hold a partial write.
    fn write(
        &mut self,
        buf: &[u8],
        cancel: &CancelToken,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
