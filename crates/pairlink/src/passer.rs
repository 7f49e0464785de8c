//! Framing: one [`Message`] per frame over a byte stream.
//!
//! ```text
//!  send:    Message ──encode──→ payload ──size check──→ header ──→ stream
//!  receive: stream ──5 bytes──→ header ──version/size──→ payload ──decode──→ Message
//! ```
//!
//! The [`Transport`] traits are what [`Connection`](crate::Connection) is
//! written against; [`MessagePasser`] is the implementation over any
//! [`ByteStream`].

use std::future::Future;

use pairlink_protocol::{Codec, FrameHeader, HEADER_LEN, JsonCodec, Message};
use pairlink_transport::{
    ByteReader, ByteStream, ByteWriter, CancelToken, StreamId,
};

use crate::{LinkError, PasserSettings};

// ---------------------------------------------------------------------------
// Transport traits
// ---------------------------------------------------------------------------

/// Something that moves whole messages in both directions.
///
/// Split once so that sending and receiving can run in different tasks,
/// each behind its own lock.
pub trait Transport: Send + 'static {
    type Sender: MessageSender;
    type Receiver: MessageReceiver;

    /// Identifier used in log output.
    fn id(&self) -> StreamId;

    fn into_split(self) -> (Self::Sender, Self::Receiver);
}

/// The sending half of a [`Transport`].
pub trait MessageSender: Send + 'static {
    /// Sends one message, returning once it has been written and flushed.
    ///
    /// # Errors
    /// [`LinkError::Cancelled`] if `cancel` fires; otherwise a categorized
    /// [`CommunicationError`](crate::CommunicationError).
    fn send(
        &mut self,
        message: &Message,
        cancel: &CancelToken,
    ) -> impl Future<Output = Result<(), LinkError>> + Send;
}

/// The receiving half of a [`Transport`].
pub trait MessageReceiver: Send + 'static {
    /// Waits for and returns the next message.
    ///
    /// # Errors
    /// [`LinkError::Cancelled`] if `cancel` fires; otherwise a categorized
    /// [`CommunicationError`](crate::CommunicationError).
    fn receive(
        &mut self,
        cancel: &CancelToken,
    ) -> impl Future<Output = Result<Message, LinkError>> + Send;
}

// ---------------------------------------------------------------------------
// MessagePasser
// ---------------------------------------------------------------------------

/// A [`Transport`] that frames messages over a [`ByteStream`].
///
/// Reads never block inside the stream: the receiver polls for available
/// bytes and sleeps [`PasserSettings::backoff_ms`] between polls.
#[derive(Debug)]
pub struct MessagePasser<S, C = JsonCodec> {
    stream: S,
    codec: C,
    settings: PasserSettings,
}

impl<S: ByteStream> MessagePasser<S> {
    /// Creates a passer speaking JSON.
    pub fn new(stream: S, settings: PasserSettings) -> Self {
        Self::with_codec(stream, JsonCodec, settings)
    }
}

impl<S: ByteStream, C: Codec + Clone> MessagePasser<S, C> {
    pub fn with_codec(stream: S, codec: C, settings: PasserSettings) -> Self {
        Self {
            stream,
            codec,
            settings,
        }
    }
}

impl<S: ByteStream, C: Codec + Clone> Transport for MessagePasser<S, C> {
    type Sender = PasserSender<S::Writer, C>;
    type Receiver = PasserReceiver<S::Reader, C>;

    fn id(&self) -> StreamId {
        self.stream.id()
    }

    fn into_split(self) -> (Self::Sender, Self::Receiver) {
        let id = self.stream.id();
        let (reader, writer) = self.stream.into_split();
        let sender = PasserSender {
            id,
            writer,
            codec: self.codec.clone(),
            settings: self.settings.clone(),
        };
        let receiver = PasserReceiver {
            id,
            reader,
            codec: self.codec,
            settings: self.settings,
        };
        (sender, receiver)
    }
}

/// Sending half of a [`MessagePasser`].
#[derive(Debug)]
pub struct PasserSender<W, C> {
    id: StreamId,
    writer: W,
    codec: C,
    settings: PasserSettings,
}

impl<W: ByteWriter, C: Codec + Clone> MessageSender for PasserSender<W, C> {
    async fn send(
        &mut self,
        message: &Message,
        cancel: &CancelToken,
    ) -> Result<(), LinkError> {
        let payload = self.codec.encode(message)?;
        // Checked before the first write so an oversized message leaves
        // the stream untouched.
        let header = FrameHeader::for_payload(
            payload.len(),
            self.settings.max_message_size.get(),
        )?;

        self.writer.write(&header.encode(), cancel).await?;
        cancel.check()?;
        self.writer.write(&payload, cancel).await?;

        tracing::trace!(
            stream = %self.id,
            kind = message.type_name(),
            bytes = payload.len(),
            "frame written"
        );
        Ok(())
    }
}

/// Receiving half of a [`MessagePasser`].
#[derive(Debug)]
pub struct PasserReceiver<R, C> {
    id: StreamId,
    reader: R,
    codec: C,
    settings: PasserSettings,
}

impl<R: ByteReader, C: Codec + Clone> PasserReceiver<R, C> {
    /// Fills `buf` completely, polling with backoff while the stream has
    /// nothing to offer. Never returns a short read.
    async fn read_exact(
        &mut self,
        buf: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<(), LinkError> {
        let mut filled = 0;
        while filled < buf.len() {
            cancel.check()?;
            if !self.reader.data_available()? {
                cancel.sleep(self.settings.backoff()).await?;
                continue;
            }
            filled += self.reader.read(&mut buf[filled..])?;
        }
        Ok(())
    }
}

impl<R: ByteReader, C: Codec + Clone> MessageReceiver for PasserReceiver<R, C> {
    async fn receive(
        &mut self,
        cancel: &CancelToken,
    ) -> Result<Message, LinkError> {
        let mut header = [0u8; HEADER_LEN];
        self.read_exact(&mut header, cancel).await?;
        let header =
            FrameHeader::decode(header, self.settings.max_message_size.get())?;

        let mut payload = vec![0u8; header.payload_len()];
        self.read_exact(&mut payload, cancel).await?;
        let message: Message = self.codec.decode(&payload)?;

        tracing::trace!(
            stream = %self.id,
            kind = message.type_name(),
            bytes = payload.len(),
            "frame read"
        );
        Ok(message)
    }
}
