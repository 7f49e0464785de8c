//! The connection state machine, as pure transition functions.
//!
//! [`Connection`](crate::Connection) applies these to its state cell; they
//! live here so the table can be tested without any I/O.

use serde::{Deserialize, Serialize};

/// The lifecycle state of a connection.
///
/// ```text
///   Lost ──reopen──→ Open ──begin_closing──→ Closing
///     ↑                │                        │
///     └──mark_as_lost──┘                        │ mark_as_lost
///                                               ↓
///   Lost ──begin_closing──────────────────→ Closed
///   any ───terminate──────────────────────→ Closed
/// ```
///
/// - **Open**: a transport is installed and both directions work.
/// - **Lost**: no usable transport. Sends and receives wait for a reopen.
/// - **Closing**: sending is still allowed so the backlog can drain;
///   receiving has stopped.
/// - **Closed**: terminal. Nothing leaves it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
    Lost,
}

impl ConnectionState {
    /// Every state, for exhaustive table tests and diagnostics.
    pub const ALL: [Self; 4] =
        [Self::Open, Self::Closing, Self::Closed, Self::Lost];

    /// Returns `true` unless the connection is closed.
    ///
    /// Once this is `false` it stays `false`: only `Closed` answers no, and
    /// no transition leaves `Closed`.
    pub fn supports_sending(self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Returns `true` only for `Open` and `Lost`.
    ///
    /// Once this is `false` it stays `false`: `Closing` and `Closed` can
    /// only move to `Closed`.
    pub fn supports_receiving(self) -> bool {
        matches!(self, Self::Open | Self::Lost)
    }

    /// The state after the transport has failed.
    pub fn on_mark_as_lost(self) -> Self {
        match self {
            Self::Open => Self::Lost,
            Self::Closing => Self::Closed,
            Self::Lost | Self::Closed => self,
        }
    }

    /// The state after a graceful close was requested.
    pub fn on_begin_closing(self) -> Self {
        match self {
            Self::Open => Self::Closing,
            Self::Lost => Self::Closed,
            Self::Closing | Self::Closed => self,
        }
    }

    /// The state after an immediate shutdown.
    pub fn on_terminate(self) -> Self {
        Self::Closed
    }

    /// The state after a new transport was installed, or `None` if a
    /// reopen is not allowed from here.
    pub fn on_reopen(self) -> Option<Self> {
        match self {
            Self::Lost => Some(Self::Open),
            Self::Open | Self::Closing | Self::Closed => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
            Self::Lost => write!(f, "Lost"),
        }
    }
}
