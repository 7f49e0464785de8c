//! The fixed 5-byte header in front of every payload.
//!
//! ```text
//!  0        1        2        3        4        5 ...
//! ┌────────┬────────┬────────┬────────┬────────┬──────────────┐
//! │        payload length (u32, BE)   │version │ payload ...  │
//! └────────┴────────┴────────┴────────┴────────┴──────────────┘
//! ```
//!
//! There is no handshake: the first bytes on a fresh stream are already a
//! header.

use crate::ProtocolError;

/// Length of the frame header in bytes.
pub const HEADER_LEN: usize = 5;

/// The only protocol version this build reads or writes.
pub const PROTOCOL_VERSION: u8 = 1;

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes, excluding the header.
    pub payload_len: u32,
    /// Protocol version byte.
    pub version: u8,
}

impl FrameHeader {
    /// Builds the header for an outgoing payload of `payload_len` bytes.
    ///
    /// Checks the complete frame (header plus payload) against
    /// `max_message_size` so nothing is written for an oversized message.
    ///
    /// # Errors
    /// [`ProtocolError::MessageTooLarge`] if the frame would not fit.
    pub fn for_payload(
        payload_len: usize,
        max_message_size: usize,
    ) -> Result<Self, ProtocolError> {
        let frame_len = payload_len.saturating_add(HEADER_LEN);
        let too_large = ProtocolError::MessageTooLarge {
            size: frame_len,
            max: max_message_size,
        };
        if frame_len > max_message_size {
            return Err(too_large);
        }
        let payload_len = u32::try_from(payload_len).map_err(|_| too_large)?;
        Ok(Self {
            payload_len,
            version: PROTOCOL_VERSION,
        })
    }

    /// Serializes the header into its wire form.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let [a, b, c, d] = self.payload_len.to_be_bytes();
        [a, b, c, d, self.version]
    }

    /// Parses a header and validates it for receiving.
    ///
    /// The version is checked first; the advertised length is then checked
    /// against `max_message_size` so the caller never reads an oversized
    /// payload.
    ///
    /// # Errors
    /// - [`ProtocolError::UnsupportedVersion`] for any version other than
    ///   [`PROTOCOL_VERSION`]
    /// - [`ProtocolError::MessageTooLarge`] if the payload length exceeds
    ///   `max_message_size`
    pub fn decode(
        bytes: [u8; HEADER_LEN],
        max_message_size: usize,
    ) -> Result<Self, ProtocolError> {
        let [a, b, c, d, version] = bytes;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                expected: PROTOCOL_VERSION,
                received: version,
            });
        }
        let payload_len = u32::from_be_bytes([a, b, c, d]);
        if payload_len as usize > max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: payload_len as usize,
                max: max_message_size,
            });
        }
        Ok(Self {
            payload_len,
            version,
        })
    }

    /// Payload length as a buffer size.
    pub fn payload_len(&self) -> usize {
        self.payload_len as usize
    }
}
