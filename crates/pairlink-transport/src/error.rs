/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the stream.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Writing to the stream failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading from the stream failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding a listener or accepting a connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Connecting to the remote peer failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// A read or write did not complete within the stream's timeout.
    #[error("timed out: {0}")]
    TimedOut(#[source] std::io::Error),

    /// The operation was cancelled through its [`CancelToken`].
    ///
    /// [`CancelToken`]: crate::CancelToken
    #[error("operation cancelled")]
    Cancelled,
}

impl TransportError {
    /// Returns `true` if the error reports an expired read or write timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::TimedOut(_) => true,
            Self::SendFailed(e) | Self::ReceiveFailed(e) => {
                e.kind() == std::io::ErrorKind::TimedOut
            }
            _ => false,
        }
    }
}

impl From<crate::Cancelled> for TransportError {
    fn from(_: crate::Cancelled) -> Self {
        Self::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_timeout_for_timed_out_variant() {
        let err = TransportError::TimedOut(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write",
        ));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_is_timeout_for_io_error_kind() {
        let err = TransportError::ReceiveFailed(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "read",
        ));
        assert!(err.is_timeout());

        let err = TransportError::ReceiveFailed(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_cancelled_converts_from_marker() {
        let err: TransportError = crate::Cancelled.into();
        assert!(matches!(err, TransportError::Cancelled));
        assert!(!err.is_timeout());
    }
}
