//! # Pairlink
//!
//! Reliable point-to-point messaging between two running game instances.
//!
//! Pairlink moves typed [`Message`]s over a byte stream, survives network
//! loss by buffering and waiting for a reconnect, and detects a dead peer
//! through receive timeouts and keepalive pings.
//!
//! ## Layers
//!
//! - [`MessagePasser`] frames one message at a time over a
//!   [`ByteStream`](pairlink_transport::ByteStream).
//! - [`Connection`] is the state machine (`Open`, `Closing`, `Closed`,
//!   `Lost`) around a replaceable transport.
//! - [`Communicator`] runs the send and receive tasks, keeps bounded
//!   histories and notifies subscribers.
//!
//! Re-establishing a lost connection is left to the application: watch
//! [`Connection::watch_state`], dial a new stream with
//! [`StreamFactory`], and hand it to [`Connection::reopen`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::Ipv4Addr;
//!
//! use pairlink::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = StreamFactory::new()
//!     .connect(Ipv4Addr::LOCALHOST.into(), 7000, &CancelToken::never())
//!     .await?;
//!
//! let connection = TcpConnection::new();
//! connection
//!     .reopen(MessagePasser::new(stream, PasserSettings::default()))
//!     .await?;
//!
//! let communicator =
//!     Communicator::new(CommunicatorSettings::default(), connection);
//! communicator.queue_for_sending(Message::Chat { text: "hi".into() });
//! # Ok(())
//! # }
//! ```

mod communicator;
mod connection;
mod error;
mod history;
mod passer;
mod settings;
mod state;

pub use communicator::Communicator;
pub use connection::Connection;
pub use error::{CommunicationError, LinkError};
pub use passer::{
    MessagePasser, MessageReceiver, MessageSender, PasserReceiver,
    PasserSender, Transport,
};
pub use settings::{
    CommunicatorConfig, CommunicatorSettings, FixedValue, InMemoryValue,
    LiveValue, PasserConfig, PasserSettings,
};
pub use state::ConnectionState;

pub use pairlink_protocol::{Message, ScoreEntry, TurnReport};
pub use pairlink_transport::{
    CancelSource, CancelToken, StreamFactory, TcpByteStream, TransportError,
};

/// A [`MessagePasser`] over TCP.
pub type TcpMessagePasser = MessagePasser<TcpByteStream>;

/// A [`Connection`] carrying TCP transports.
pub type TcpConnection = Connection<TcpMessagePasser>;

/// A [`Communicator`] over TCP.
pub type TcpCommunicator = Communicator<TcpMessagePasser>;

/// Convenience re-exports for applications.
///
/// ```rust
/// use pairlink::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CancelSource, CancelToken, CommunicationError, Communicator,
        CommunicatorConfig, CommunicatorSettings, Connection, ConnectionState,
        InMemoryValue, LinkError, Message, MessagePasser, PasserConfig,
        PasserSettings, ScoreEntry, StreamFactory, TcpCommunicator,
        TcpConnection, TransportError, TurnReport,
    };
}
