//! In-process duplex stream.
//!
//! [`pair`] returns two connected [`MemoryStream`]s: bytes written to one
//! become readable on the other. Used by tests and demos that need two
//! peers without touching the network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    ByteReader, ByteStream, ByteWriter, CancelToken, StreamId, TransportError,
};

/// Memory stream IDs count down from the top so they never collide with
/// TCP stream IDs in logs.
static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(u64::MAX);

/// One direction of a duplex pair.
#[derive(Debug, Default)]
struct Pipe {
    bytes: Mutex<VecDeque<u8>>,
    writer_gone: AtomicBool,
    reader_gone: AtomicBool,
}

impl Pipe {
    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates two connected in-memory streams.
pub fn pair() -> (MemoryStream, MemoryStream) {
    let a_to_b = Arc::new(Pipe::default());
    let b_to_a = Arc::new(Pipe::default());
    let a = MemoryStream {
        id: next_id(),
        inbound: Arc::clone(&b_to_a),
        outbound: Arc::clone(&a_to_b),
    };
    let b = MemoryStream {
        id: next_id(),
        inbound: a_to_b,
        outbound: b_to_a,
    };
    (a, b)
}

fn next_id() -> StreamId {
    StreamId::new(NEXT_MEMORY_ID.fetch_sub(1, Ordering::Relaxed))
}

/// One end of an in-memory duplex pair.
#[derive(Debug)]
pub struct MemoryStream {
    id: StreamId,
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
}

impl ByteStream for MemoryStream {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn id(&self) -> StreamId {
        self.id
    }

    fn into_split(self) -> (MemoryReader, MemoryWriter) {
        (
            MemoryReader {
                id: self.id,
                pipe: self.inbound,
            },
            MemoryWriter {
                id: self.id,
                pipe: self.outbound,
            },
        )
    }
}

/// Receiving half of a [`MemoryStream`].
#[derive(Debug)]
pub struct MemoryReader {
    id: StreamId,
    pipe: Arc<Pipe>,
}

impl ByteReader for MemoryReader {
    fn data_available(&mut self) -> Result<bool, TransportError> {
        if !self.pipe.queue().is_empty() {
            return Ok(true);
        }
        if self.pipe.writer_gone.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed(format!(
                "{} closed by peer",
                self.id
            )));
        }
        Ok(false)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut queue = self.pipe.queue();
        let n = buf.len().min(queue.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Drop for MemoryReader {
    fn drop(&mut self) {
        self.pipe.reader_gone.store(true, Ordering::Release);
    }
}

/// Sending half of a [`MemoryStream`].
#[derive(Debug)]
pub struct MemoryWriter {
    id: StreamId,
    pipe: Arc<Pipe>,
}

impl ByteWriter for MemoryWriter {
    async fn write(
        &mut self,
        buf: &[u8],
        cancel: &CancelToken,
    ) -> Result<(), TransportError> {
        cancel.check()?;
        if self.pipe.reader_gone.load(Ordering::Acquire) {
            return Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("{} has no reader", self.id),
            )));
        }
        self.pipe.queue().extend(buf.iter().copied());
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.pipe.writer_gone.store(true, Ordering::Release);
    }
}
