//! The connection state machine around a replaceable transport.
//!
//! A [`Connection`] owns at most one transport, split into a send half and
//! a receive half, each behind its own async lock:
//!
//! ```text
//!                    ┌──────────── Connection ────────────┐
//!   send() ────────→ │ Mutex<Option<Sender>>              │
//!   receive() ─────→ │ Mutex<Option<Receiver>>            │
//!   reopen(t) ─────→ │ watch<ConnectionState> ──wakes──→ waiters
//!                    └────────────────────────────────────┘
//! ```
//!
//! State lives in a `watch` cell. Fast-path checks read a snapshot;
//! anything that acts on the snapshot re-reads it after taking the lock.
//! The change notification of the cell doubles as the "reopened" signal:
//! callers blocked while `Lost` wake on every transition and re-check.

use std::sync::Arc;
use std::time::Duration;

use pairlink_protocol::Message;
use pairlink_transport::CancelToken;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, watch};

use crate::{
    CommunicationError, ConnectionState, LinkError, MessageReceiver,
    MessageSender, Transport,
};

/// A cloneable handle to one connection.
///
/// Clones share the same state and transport, so one clone can sit in a
/// communicator while another is held by a reconnection policy.
pub struct Connection<T: Transport> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: Transport> {
    state: watch::Sender<ConnectionState>,
    sender: Mutex<Option<T::Sender>>,
    receiver: Mutex<Option<T::Receiver>>,
    /// Flipped to `true` once the transport has been dropped after
    /// reaching `Closed`.
    released: watch::Sender<bool>,
}

impl<T: Transport> Connection<T> {
    /// Creates a connection in the `Lost` state with no transport.
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Lost);
        let (released, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state,
                sender: Mutex::new(None),
                receiver: Mutex::new(None),
                released,
            }),
        }
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every state change.
    ///
    /// This is how a reconnection policy learns that the connection was
    /// lost.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn supports_sending(&self) -> bool {
        self.state().supports_sending()
    }

    pub fn supports_receiving(&self) -> bool {
        self.state().supports_receiving()
    }

    // -----------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------

    /// Records that the transport has failed. No-op if already `Lost` or
    /// `Closed`; a `Closing` connection becomes `Closed`.
    pub fn mark_as_lost(&self) -> ConnectionState {
        self.transition("mark_as_lost", ConnectionState::on_mark_as_lost)
    }

    /// Stops receiving and lets the send backlog drain. A `Lost`
    /// connection has nothing to drain and becomes `Closed`.
    pub fn begin_closing(&self) -> ConnectionState {
        self.transition("begin_closing", ConnectionState::on_begin_closing)
    }

    /// Moves to `Closed` unconditionally.
    ///
    /// The transport is released in a background task once no send or
    /// receive is using it; [`closed`](Self::closed) waits for that.
    pub fn terminate(&self) -> ConnectionState {
        self.transition("terminate", ConnectionState::on_terminate)
    }

    /// Installs a freshly established transport and moves to `Open`.
    ///
    /// Waits until no send or receive is mid-flight, drops any stale
    /// transport, then wakes every caller blocked on the `Lost` state.
    ///
    /// # Errors
    /// [`CommunicationError::ConnectionState`] unless the connection is
    /// `Lost`. The rejected transport is dropped.
    pub async fn reopen(&self, transport: T) -> Result<(), CommunicationError> {
        let state = self.state();
        if state.on_reopen().is_none() {
            return Err(CommunicationError::ConnectionState {
                state,
                operation: "reopen",
            });
        }

        let mut sender = self.inner.sender.lock().await;
        let mut receiver = self.inner.receiver.lock().await;

        let id = transport.id();
        let mut rejected = None;
        self.inner.state.send_if_modified(|state| match state.on_reopen() {
            Some(next) => {
                *state = next;
                true
            }
            None => {
                rejected = Some(*state);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(CommunicationError::ConnectionState {
                state,
                operation: "reopen",
            });
        }

        // Waiters woken by the state change queue up on the locks held
        // here, so they see the new halves.
        let (tx, rx) = transport.into_split();
        *sender = Some(tx);
        *receiver = Some(rx);
        tracing::info!(stream = %id, "connection reopened");
        Ok(())
    }

    /// Completes once the connection is `Closed` and its transport has
    /// been released.
    pub async fn closed(&self) {
        let mut released = self.inner.released.subscribe();
        // The sender lives in `inner`, so this only ends by matching.
        let _ = released.wait_for(|released| *released).await;
    }

    fn transition(
        &self,
        event: &'static str,
        next: fn(ConnectionState) -> ConnectionState,
    ) -> ConnectionState {
        let mut from = ConnectionState::Closed;
        let mut to = ConnectionState::Closed;
        self.inner.state.send_if_modified(|state| {
            from = *state;
            to = next(from);
            *state = to;
            from != to
        });

        if from != to {
            tracing::debug!(%from, %to, event, "connection state changed");
            if to == ConnectionState::Closed {
                self.schedule_release();
            }
        }
        to
    }

    /// Drops the transport once both locks are free. Runs at most once,
    /// since nothing leaves `Closed`.
    fn schedule_release(&self) {
        let inner = Arc::clone(&self.inner);
        let release = async move {
            let mut sender = inner.sender.lock().await;
            let mut receiver = inner.receiver.lock().await;
            let attached = sender.take().is_some();
            receiver.take();
            drop(receiver);
            drop(sender);
            inner.released.send_replace(true);
            tracing::debug!(attached, "transport released");
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(release);
            }
            Err(_) => {
                // Outside a runtime nothing can be mid-flight; the halves
                // are dropped with the last handle.
                self.inner.released.send_replace(true);
            }
        }
    }

    // -----------------------------------------------------------------
    // I/O
    // -----------------------------------------------------------------

    /// Sends one message, waiting through a `Lost` period for a reopen.
    ///
    /// # Errors
    /// - [`CommunicationError::ConnectionState`] if the connection is
    ///   `Closed`, checked before waiting and again after every wakeup
    /// - [`LinkError::Cancelled`] if `cancel` fires
    /// - a message the framer refuses (see
    ///   [`CommunicationError::rejects_message`]); the connection is left
    ///   as it was
    /// - whatever the transport reports; the connection is marked lost
    ///   first
    pub async fn send(
        &self,
        message: &Message,
        cancel: &CancelToken,
    ) -> Result<(), LinkError> {
        let mut sender = self
            .acquire(
                &self.inner.sender,
                ConnectionState::supports_sending,
                "send",
                cancel,
            )
            .await?;
        let result = sender.send(message, cancel).await;
        match &result {
            Err(LinkError::Communication(err)) if err.rejects_message() => {
                tracing::debug!(error = %err, "message refused before writing");
                result
            }
            _ => self.lost_on_error(result),
        }
    }

    /// Receives one message, waiting through a `Lost` period for a reopen.
    ///
    /// `timeout` bounds the wait for the connection and, separately, the
    /// read itself once it has started.
    ///
    /// # Errors
    /// - [`CommunicationError::ConnectionState`] if the connection is
    ///   `Closing` or `Closed`
    /// - [`LinkError::Cancelled`] if `cancel` fires or `timeout` expires
    /// - whatever the transport reports; the connection is marked lost
    ///   first
    pub async fn receive(
        &self,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> Result<Message, LinkError> {
        let mut receiver = self
            .acquire(
                &self.inner.receiver,
                ConnectionState::supports_receiving,
                "receive",
                &cancel.with_timeout(timeout),
            )
            .await?;
        let result = receiver.receive(&cancel.with_timeout(timeout)).await;
        self.lost_on_error(result)
    }

    /// Waits until the state allows `operation` and a transport half is
    /// installed, then returns that half locked.
    async fn acquire<'a, H>(
        &'a self,
        slot: &'a Mutex<Option<H>>,
        allowed: fn(ConnectionState) -> bool,
        operation: &'static str,
        cancel: &CancelToken,
    ) -> Result<MappedMutexGuard<'a, H>, LinkError> {
        let mut changes = self.inner.state.subscribe();
        loop {
            let state = *changes.borrow_and_update();
            if !allowed(state) {
                return Err(CommunicationError::ConnectionState {
                    state,
                    operation,
                }
                .into());
            }
            if state == ConnectionState::Lost {
                let _ = cancel.run(changes.changed()).await?;
                continue;
            }

            let guard = cancel.run(slot.lock()).await?;
            let state = self.state();
            if !allowed(state) || state == ConnectionState::Lost {
                continue;
            }
            match MutexGuard::try_map(guard, |half| half.as_mut()) {
                Ok(half) => return Ok(half),
                Err(_) => {
                    tracing::warn!(%state, "no transport installed");
                    self.mark_as_lost();
                }
            }
        }
    }

    fn lost_on_error<V>(
        &self,
        result: Result<V, LinkError>,
    ) -> Result<V, LinkError> {
        match &result {
            Ok(_) => {}
            // A cancelled read or write may leave half a frame behind, so
            // an open stream is no longer trusted. A closing connection
            // only drains sends and is left to finish.
            Err(LinkError::Cancelled) => {
                self.transition("cancelled", |state| match state {
                    ConnectionState::Open => ConnectionState::Lost,
                    other => other,
                });
            }
            Err(err) => {
                tracing::debug!(error = %err, "transport operation failed");
                self.mark_as_lost();
            }
        }
        result
    }
}

impl<T: Transport> Default for Connection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
