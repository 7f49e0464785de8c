//! Byte-stream layer for Pairlink.
//!
//! Provides the [`ByteStream`] capability the framer is written against,
//! a TCP implementation with its [`StreamFactory`], an in-process
//! [`memory::pair`] for tests, and the [`CancelToken`] that every
//! suspension point in Pairlink accepts.
//!
//! # Feature Flags
//!
//! - `tcp` (default): TCP streams and the listen/connect factory

mod cancel;
mod error;
pub mod memory;
mod stream;
#[cfg(feature = "tcp")]
mod tcp;

pub use cancel::{CancelSource, CancelToken, Cancelled};
pub use error::TransportError;
pub use memory::MemoryStream;
pub use stream::{ByteReader, ByteStream, ByteWriter};
#[cfg(feature = "tcp")]
pub use tcp::{
    DEFAULT_WRITE_TIMEOUT, StreamFactory, TcpByteStream, TcpReader, TcpWriter,
};

use std::fmt;

/// Opaque identifier for a byte stream, used in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    /// Creates a new `StreamId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}
