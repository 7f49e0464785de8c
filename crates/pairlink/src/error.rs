//! Error taxonomy for the core.
//!
//! Every core operation returns [`LinkError`]. Cancellation is its own
//! variant and is never folded into a [`CommunicationError`], so callers
//! that only care about network trouble can match on one arm.

use pairlink_protocol::ProtocolError;
use pairlink_transport::{Cancelled, TransportError};

use crate::ConnectionState;

/// A categorized failure of the communication layer.
#[derive(Debug, thiserror::Error)]
pub enum CommunicationError {
    /// The operation is not allowed in the connection's current state.
    ///
    /// Not retried by the core: the state has to change first.
    #[error("cannot {operation} while the connection is {state}")]
    ConnectionState {
        state: ConnectionState,
        operation: &'static str,
    },

    /// Unsupported protocol version or a frame over the size limit.
    #[error("protocol violation: {0}")]
    Protocol(#[source] ProtocolError),

    /// The payload could not be decoded into a known message.
    #[error("malformed message: {0}")]
    MalformedMessage(#[source] ProtocolError),

    /// The byte stream reported a timeout of its own.
    #[error("timed out: {0}")]
    Timeout(#[source] TransportError),

    /// Anything else, wrapped with what was being attempted.
    #[error("{context}: {source}")]
    Unknown {
        context: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl CommunicationError {
    pub(crate) fn unknown(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unknown {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Returns `true` if sending the same message again may succeed once
    /// the connection has been repaired.
    ///
    /// A message that failed to encode fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Unknown { .. } => !self.is_encode_failure(),
            _ => false,
        }
    }

    /// Returns `true` if a send was refused because of the message itself:
    /// it could not be encoded, or its frame is over the size limit.
    ///
    /// Both are detected before the first byte is written, so the stream
    /// is still in step with the peer.
    pub fn rejects_message(&self) -> bool {
        self.is_encode_failure()
            || matches!(
                self,
                Self::Protocol(ProtocolError::MessageTooLarge { .. })
            )
    }

    fn is_encode_failure(&self) -> bool {
        match self {
            Self::Unknown { source, .. } => source.is::<ProtocolError>(),
            _ => false,
        }
    }
}

/// The error returned by every core operation.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The caller's token fired (explicit cancel or a derived timeout).
    #[error("operation cancelled")]
    Cancelled,

    /// A categorized communication failure.
    #[error(transparent)]
    Communication(#[from] CommunicationError),
}

impl LinkError {
    /// Returns `true` for the cancellation variant.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the categorized failure, if this is not a cancellation.
    pub fn communication(&self) -> Option<&CommunicationError> {
        match self {
            Self::Cancelled => None,
            Self::Communication(err) => Some(err),
        }
    }
}

impl From<Cancelled> for LinkError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<TransportError> for LinkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => Self::Cancelled,
            err if err.is_timeout() => {
                CommunicationError::Timeout(err).into()
            }
            err => CommunicationError::unknown("byte stream failed", err)
                .into(),
        }
    }
}

impl From<ProtocolError> for LinkError {
    fn from(err: ProtocolError) -> Self {
        let categorized = if err.is_violation() {
            CommunicationError::Protocol(err)
        } else if matches!(err, ProtocolError::Decode(_)) {
            CommunicationError::MalformedMessage(err)
        } else {
            CommunicationError::unknown("could not encode message", err)
        };
        categorized.into()
    }
}
