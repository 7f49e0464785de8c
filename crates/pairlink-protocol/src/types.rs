//! The messages two game instances exchange.
//!
//! Every message on the wire is one variant of [`Message`]. The set is
//! closed: decoding only succeeds for a tag listed in
//! [`Message::KNOWN_TYPES`], so adding a variant means adding it here and
//! nowhere else.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message: the polymorphic envelope
// ---------------------------------------------------------------------------

/// A single message exchanged between the two peers.
///
/// `#[serde(tag = "type")]` writes the variant name into the payload as an
/// explicit type tag, so the decoder matches on that tag instead of
/// guessing the shape:
///   `{ "type": "Chat", "text": "gg" }`
///
/// Only variants listed here can be decoded; an unknown tag fails with a
/// decode error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Keepalive. Sent when nothing else has been sent for a while so the
    /// peer knows we are still here. Carries no payload.
    Ping,

    /// Free-form text typed by a player.
    Chat { text: String },

    /// The outcome of one player's turn.
    Turn(TurnReport),

    /// The sending player gives up the match.
    Resign { reason: Option<String> },
}

impl Message {
    /// The type tags this build knows how to decode, one per variant.
    pub const KNOWN_TYPES: &'static [&'static str] =
        &["Ping", "Chat", "Turn", "Resign"];

    /// Returns the type tag written on the wire for this message.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::Chat { .. } => "Chat",
            Self::Turn(_) => "Turn",
            Self::Resign { .. } => "Resign",
        }
    }

    /// Returns `true` for the keepalive variant.
    pub fn is_ping(&self) -> bool {
        matches!(self, Self::Ping)
    }
}

// ---------------------------------------------------------------------------
// Turn payload
// ---------------------------------------------------------------------------

/// What happened during one turn.
///
/// Exercises every shape the encoding must carry: a scalar, an ordered
/// sequence, an optional string that may be `null`, and an optional nested
/// object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReport {
    /// Turn counter, starting at 1 for the first turn of the match.
    pub turn: u32,

    /// Dice values in the order they were rolled.
    pub dice: Vec<u8>,

    /// Optional remark shown to the opponent. `None` becomes `null`.
    pub note: Option<String>,

    /// Where the player scored this turn, if they scored at all.
    pub score: Option<ScoreEntry>,
}

/// A single cell filled on the score sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    /// Score sheet column, e.g. `"down"` or `"free"`.
    pub column: String,

    /// Score sheet row, e.g. `"sixes"` or `"poker"`.
    pub row: String,

    /// Points written into the cell.
    pub points: u32,
}

// =========================================================================
// Tests
// =========================================================================
