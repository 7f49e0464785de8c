//! Payload encodings.
//!
//! The framer only needs "message to bytes" and "bytes to message"; which
//! structured format sits in between is a [`Codec`] choice. The format
//! must be self-describing enough to carry the type tag, nested objects,
//! ordered sequences, and `null`.
//!
//! [`JsonCodec`] is the format both peers speak today.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to payload bytes and decodes them back.
///
/// `Send + Sync + 'static` because a codec lives inside a transport that
/// is moved into long-lived Tokio tasks.
///
/// `decode` requires `DeserializeOwned` (rather than `Deserialize<'de>`)
/// so the decoded message owns its data and the receive buffer can be
/// dropped right after decoding.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into payload bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented
    /// in this format.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes payload bytes into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// truncated, or carry an unknown type tag.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Readable in a packet capture, which matters more here than size: the
/// frame limit is 10 KiB and game messages are a few hundred bytes.
///
/// ## Example
///
/// ```rust
/// use pairlink_protocol::{Codec, JsonCodec, Message};
///
/// let codec = JsonCodec;
/// let msg = Message::Chat { text: "your turn".into() };
///
/// let bytes = codec.encode(&msg).unwrap();
/// let decoded: Message = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Message, ScoreEntry, TurnReport};

    #[test]
    fn test_json_codec_round_trips_nested_turn() {
        let codec = JsonCodec;
        let msg = Message::Turn(TurnReport {
            turn: 12,
            dice: vec![1, 2, 3, 4, 5],
            note: Some("straight".into()),
            score: Some(ScoreEntry {
                column: "free".into(),
                row: "straight".into(),
                points: 45,
            }),
        });

        let bytes = codec.encode(&msg).unwrap();
        let decoded: Message = codec.decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let result: Result<Message, _> = JsonCodec.decode(b"not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_rejects_truncated_payload() {
        let bytes = JsonCodec
            .encode(&Message::Chat {
                text: "hello".into(),
            })
            .unwrap();
        let truncated = &bytes[..bytes.len() - 3];

        let result: Result<Message, _> = JsonCodec.decode(truncated);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
