//! Wire protocol for Pairlink.
//!
//! This crate defines what travels between the two peers:
//!
//! - **Types** ([`Message`], [`TurnReport`], [`ScoreEntry`]): the closed
//!   set of messages and their fields.
//! - **Frame** ([`FrameHeader`]): the 5-byte header in front of every
//!   payload.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how a message becomes
//!   payload bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong with the bytes.
//!
//! It knows nothing about sockets or connection state; the `pairlink`
//! crate combines it with a byte stream.

mod codec;
mod error;
mod frame;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_LEN, PROTOCOL_VERSION};
pub use types::{Message, ScoreEntry, TurnReport};
