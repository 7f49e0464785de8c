//! Error types for the protocol layer.
//!
//! Each crate in Pairlink defines its own error enum. A `ProtocolError`
//! always means the bytes themselves were wrong (or could not be
//! produced), never that the network misbehaved.

/// Errors that can occur in the protocol layer.
///
/// `#[derive(thiserror::Error)]` auto-generates the `std::error::Error`
/// implementation, and each `#[error("...")]` is the text shown in logs.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a message into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a message).
    ///
    /// Common causes: an unknown type tag, missing required fields,
    /// wrong field types, or truncated input.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame header carries a version this build does not speak.
    ///
    /// Versions are not negotiated; a mismatch means the peers are
    /// incompatible.
    #[error(
        "unsupported protocol version: ours is {expected}, received {received}"
    )]
    UnsupportedVersion { expected: u8, received: u8 },

    /// A frame (header included, when sending) exceeds the configured
    /// maximum size.
    #[error("message of {size} bytes exceeds the maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// Returns `true` for size and version violations, the errors that
    /// indicate incompatible or misconfigured peers rather than bad
    /// payload bytes.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVersion { .. } | Self::MessageTooLarge { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_version_message_names_both_versions() {
        let err = ProtocolError::UnsupportedVersion {
            expected: 1,
            received: 2,
        };
        let text = err.to_string();
        assert!(text.contains("ours is 1"), "got: {text}");
        assert!(text.contains("received 2"), "got: {text}");
        assert!(err.is_violation());
    }

    #[test]
    fn test_too_large_message_names_limit() {
        let err = ProtocolError::MessageTooLarge {
            size: 20_000,
            max: 10_240,
        };
        assert!(err.to_string().contains("10240"));
        assert!(err.is_violation());
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_decode_is_not_a_violation() {
        let json_err =
            serde_json::from_str::<u32>("nope").expect_err("not a number");
        assert!(!ProtocolError::Decode(json_err).is_violation());
    }
}
