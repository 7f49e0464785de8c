//! The application-facing facade: a queue in, notifications out.
//!
//! A [`Communicator`] owns a [`Connection`] and runs two background tasks
//! against it:
//!
//! ```text
//!  queue_for_sending ──→ [ outbound queue ] ──→ sender task ──→ Connection
//!                                              (pings when idle)    │
//!  subscribe / received_messages ←── receiver task ←────────────────┘
//! ```
//!
//! Both tasks survive connection loss: they log, keep going, and resume as
//! soon as something calls [`Connection::reopen`] on the shared handle
//! returned by [`Communicator::connection`].

use std::sync::Arc;

use pairlink_protocol::Message;
use pairlink_transport::{CancelSource, CancelToken, Cancelled};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::history::History;
use crate::{
    CommunicatorSettings, Connection, ConnectionState, LinkError, Transport,
};

/// Buffered notifications per subscriber before the slowest one starts
/// missing messages.
const NOTIFY_CAPACITY: usize = 256;

/// State shared between the facade and its tasks.
struct Shared {
    sent: History,
    received: History,
    notify: broadcast::Sender<Message>,
}

/// Two-way message exchange with the peer on the other end of a
/// [`Connection`].
///
/// Must be created inside a Tokio runtime. Dropping it stops both tasks
/// and terminates the connection without waiting; call
/// [`close`](Self::close) or [`terminate`](Self::terminate) to wait.
pub struct Communicator<T: Transport> {
    connection: Connection<T>,
    settings: CommunicatorSettings,
    outbound: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    sender_stop: CancelSource,
    receiver_stop: CancelSource,
    sender_task: Option<JoinHandle<()>>,
    receiver_task: Option<JoinHandle<()>>,
}

impl<T: Transport> Communicator<T> {
    /// Starts the sender and receiver tasks over `connection`.
    ///
    /// The connection may still be `Lost`; both tasks wait for it to be
    /// reopened.
    pub fn new(
        settings: CommunicatorSettings,
        connection: Connection<T>,
    ) -> Self {
        let (outbound, queue) = mpsc::unbounded_channel();
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        let shared = Arc::new(Shared {
            sent: History::new(Arc::clone(&settings.history_depth)),
            received: History::new(Arc::clone(&settings.history_depth)),
            notify,
        });
        let sender_stop = CancelSource::new();
        let receiver_stop = CancelSource::new();

        let sender = SenderLoop {
            changes: connection.watch_state(),
            connection: connection.clone(),
            settings: settings.clone(),
            queue,
            shared: Arc::clone(&shared),
            stop: sender_stop.token(),
        };
        let receiver = ReceiverLoop {
            changes: connection.watch_state(),
            connection: connection.clone(),
            settings: settings.clone(),
            shared: Arc::clone(&shared),
            stop: receiver_stop.token(),
        };

        Self {
            connection,
            settings,
            outbound,
            shared,
            sender_stop,
            receiver_stop,
            sender_task: Some(tokio::spawn(sender.run())),
            receiver_task: Some(tokio::spawn(receiver.run())),
        }
    }

    /// Adds a message to the outbound queue. Never blocks.
    ///
    /// Messages queued after the sender has stopped are discarded.
    pub fn queue_for_sending(&self, message: Message) {
        if self.outbound.send(message).is_err() {
            tracing::debug!("sender stopped, message discarded");
        }
    }

    /// The most recently sent messages, oldest first.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.shared.sent.snapshot()
    }

    /// The most recently received messages, oldest first.
    pub fn received_messages(&self) -> Vec<Message> {
        self.shared.received.snapshot()
    }

    /// Subscribes to received messages.
    ///
    /// Each message is delivered to every subscriber, after it has been
    /// added to [`received_messages`](Self::received_messages).
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.shared.notify.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// The shared connection handle, for a reconnection policy.
    pub fn connection(&self) -> &Connection<T> {
        &self.connection
    }

    /// Closes gracefully.
    ///
    /// Stops receiving at once and gives the sender up to the configured
    /// grace period to drain the outbound queue, then terminates the
    /// connection and waits for the transport to be released.
    pub async fn close(&mut self) {
        tracing::info!("closing communicator");
        self.connection.begin_closing();
        self.sender_stop.cancel_after(self.settings.close_grace());
        self.receiver_stop.cancel();
        self.join_tasks().await;
        self.connection.terminate();
        self.connection.closed().await;
    }

    /// Stops both tasks immediately; queued messages are abandoned.
    pub async fn terminate(&mut self) {
        tracing::info!("terminating communicator");
        self.connection.terminate();
        self.sender_stop.cancel();
        self.receiver_stop.cancel();
        self.join_tasks().await;
        self.connection.closed().await;
    }

    /// Terminates and consumes the communicator.
    pub async fn shutdown(mut self) {
        self.terminate().await;
    }

    async fn join_tasks(&mut self) {
        let tasks = [
            ("receiver", self.receiver_task.take()),
            ("sender", self.sender_task.take()),
        ];
        for (name, task) in tasks {
            let Some(task) = task else { continue };
            if let Err(err) = task.await {
                tracing::error!(task = name, error = %err, "task failed");
            }
        }
    }
}

impl<T: Transport> Drop for Communicator<T> {
    fn drop(&mut self) {
        self.sender_stop.cancel();
        self.receiver_stop.cancel();
        self.connection.terminate();
    }
}

impl<T: Transport> std::fmt::Debug for Communicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Sender task
// ---------------------------------------------------------------------------

/// What the sender does after looking at the queue.
enum Next {
    Send(Message),
    /// Woken without a message; go round the loop again.
    Recheck,
    Stop,
}

struct SenderLoop<T: Transport> {
    connection: Connection<T>,
    changes: watch::Receiver<ConnectionState>,
    settings: CommunicatorSettings,
    queue: mpsc::UnboundedReceiver<Message>,
    shared: Arc<Shared>,
    stop: CancelToken,
}

impl<T: Transport> SenderLoop<T> {
    async fn run(mut self) {
        let mut last_sent = Instant::now();
        // A message whose send failed in a way worth retrying.
        let mut pending: Option<Message> = None;

        while !self.stop.is_cancelled() && self.connection.supports_sending()
        {
            self.check_backlog();

            let message = match pending.take() {
                Some(message) => message,
                None => match self.next(last_sent).await {
                    Next::Send(message) => message,
                    Next::Recheck => continue,
                    Next::Stop => break,
                },
            };

            match self.connection.send(&message, &self.stop).await {
                Ok(()) => {
                    last_sent = Instant::now();
                    self.shared.sent.push(message);
                }
                Err(LinkError::Cancelled) => {
                    tracing::info!(
                        kind = message.type_name(),
                        "send cancelled"
                    );
                    pending = Some(message);
                }
                Err(LinkError::Communication(err)) if err.is_retryable() => {
                    tracing::warn!(
                        kind = message.type_name(),
                        error = %err,
                        "send failed, will retry"
                    );
                    pending = Some(message);
                }
                Err(LinkError::Communication(err)) => {
                    tracing::warn!(
                        kind = message.type_name(),
                        error = %err,
                        "send failed, message dropped"
                    );
                }
            }
        }
        tracing::debug!("sender stopped");
    }

    /// Takes the next queued message, or a ping once the connection has
    /// been quiet for the ping interval.
    async fn next(&mut self, last_sent: Instant) -> Next {
        // Anything from here on wakes the idle wait below.
        let _ = self.changes.borrow_and_update();
        match self.queue.try_recv() {
            Ok(message) => return Next::Send(message),
            Err(mpsc::error::TryRecvError::Disconnected) => return Next::Stop,
            Err(mpsc::error::TryRecvError::Empty) => {}
        }
        if self.connection.state() == ConnectionState::Closing {
            tracing::debug!("outbound queue drained");
            return Next::Stop;
        }

        let remaining = self
            .settings
            .ping_interval()
            .saturating_sub(last_sent.elapsed());
        if remaining.is_zero() {
            return Next::Send(Message::Ping);
        }

        let idle = self.stop.with_timeout(remaining);
        tokio::select! {
            received = idle.run(self.queue.recv()) => match received {
                Ok(Some(message)) => Next::Send(message),
                Ok(None) => Next::Stop,
                Err(Cancelled) if self.stop.is_cancelled() => {
                    tracing::info!("sender cancelled while idle");
                    Next::Recheck
                }
                Err(Cancelled) => Next::Send(Message::Ping),
            },
            // A state change (for example to Closing) while the queue is
            // empty.
            _ = self.changes.changed() => Next::Recheck,
        }
    }

    fn check_backlog(&self) {
        let threshold = self.settings.queue_depth_for_timeout.get();
        let backlog = self.queue.len();
        if threshold == 0 || backlog <= threshold {
            return;
        }
        if self.connection.state() == ConnectionState::Open {
            tracing::warn!(
                backlog,
                threshold,
                "peer is not keeping up, marking connection lost"
            );
            self.connection.mark_as_lost();
        }
    }
}

// ---------------------------------------------------------------------------
// Receiver task
// ---------------------------------------------------------------------------

struct ReceiverLoop<T: Transport> {
    connection: Connection<T>,
    changes: watch::Receiver<ConnectionState>,
    settings: CommunicatorSettings,
    shared: Arc<Shared>,
    stop: CancelToken,
}

impl<T: Transport> ReceiverLoop<T> {
    async fn run(mut self) {
        let mut last_received = Instant::now();

        while !self.stop.is_cancelled()
            && self.connection.supports_receiving()
        {
            // Silence is only counted while the link is open, starting
            // from the moment it was last seen to open.
            let state = self.observe_state(&mut last_received);
            let timeout = self.settings.receive_timeout();
            if state == ConnectionState::Open
                && last_received.elapsed() > timeout
            {
                tracing::info!(?timeout, "peer silent, marking lost");
                self.connection.mark_as_lost();
            }

            match self.connection.receive(&self.stop, timeout).await {
                Ok(message) => {
                    last_received = Instant::now();
                    self.shared.received.push(message.clone());
                    // No subscribers is fine.
                    let _ = self.shared.notify.send(message);
                }
                Err(LinkError::Cancelled) => {
                    tracing::info!("receive cancelled or timed out");
                }
                Err(LinkError::Communication(err)) => {
                    tracing::warn!(error = %err, "receive failed");
                }
            }
        }
        tracing::debug!("receiver stopped");
    }

    /// Returns the current state, restarting the silence clock if the
    /// connection has changed state and is now open.
    fn observe_state(
        &mut self,
        last_received: &mut Instant,
    ) -> ConnectionState {
        let changed = self.changes.has_changed().unwrap_or(false);
        let state = *self.changes.borrow_and_update();
        if changed && state == ConnectionState::Open {
            *last_received = Instant::now();
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pairlink_protocol::{Codec, JsonCodec, ProtocolError};
    use pairlink_transport::memory::{self, MemoryStream};
    use serde::Serialize;
    use serde::de::DeserializeOwned;
    use serde::ser::Error as _;

    use super::*;
    use crate::{
        CommunicatorConfig, InMemoryValue, MessagePasser, PasserConfig,
    };

    type TestCommunicator = Communicator<MessagePasser<MemoryStream>>;

    fn passer(stream: MemoryStream) -> MessagePasser<MemoryStream> {
        MessagePasser::new(
            stream,
            PasserConfig {
                backoff_ms: 10,
                ..PasserConfig::default()
            }
            .into(),
        )
    }

    fn settings() -> CommunicatorSettings {
        CommunicatorConfig::default().into()
    }

    /// Two communicators whose connections are already open.
    async fn linked_pair(
        left: CommunicatorSettings,
        right: CommunicatorSettings,
    ) -> (TestCommunicator, TestCommunicator) {
        let (a, b) = memory::pair();
        let a_conn = Connection::new();
        let b_conn = Connection::new();
        a_conn.reopen(passer(a)).await.unwrap();
        b_conn.reopen(passer(b)).await.unwrap();
        (
            Communicator::new(left, a_conn),
            Communicator::new(right, b_conn),
        )
    }

    fn chat(text: &str) -> Message {
        Message::Chat { text: text.into() }
    }

    fn without_pings(messages: Vec<Message>) -> Vec<Message> {
        messages.into_iter().filter(|m| !m.is_ping()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_reaches_peer_and_both_histories() {
        let (alice, bob) = linked_pair(settings(), settings()).await;
        let mut inbox = bob.subscribe();

        alice.queue_for_sending(chat("roll"));

        let received = inbox.recv().await.unwrap();
        assert_eq!(received, chat("roll"));
        assert_eq!(bob.received_messages().last(), Some(&chat("roll")));
        assert_eq!(without_pings(alice.sent_messages()), vec![chat("roll")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sender_pings() {
        let (_alice, bob) = linked_pair(settings(), settings()).await;
        let mut inbox = bob.subscribe();

        let started = Instant::now();
        let received = inbox.recv().await.unwrap();

        assert!(received.is_ping());
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_traffic_postpones_ping() {
        let (alice, bob) = linked_pair(settings(), settings()).await;
        let mut inbox = bob.subscribe();

        for n in 0..4 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            alice.queue_for_sending(chat(&n.to_string()));
            assert_eq!(inbox.recv().await.unwrap(), chat(&n.to_string()));
        }
        assert!(alice.sent_messages().iter().all(|m| !m.is_ping()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_depth_is_live() {
        let depth = Arc::new(InMemoryValue::new(10usize));
        let left = CommunicatorSettings {
            history_depth: depth.clone(),
            ..settings()
        };
        let (alice, bob) = linked_pair(left, settings()).await;
        let mut inbox = bob.subscribe();

        depth.set(2);
        for n in 0..5 {
            alice.queue_for_sending(chat(&n.to_string()));
        }
        for _ in 0..5 {
            inbox.recv().await.unwrap();
        }

        assert_eq!(alice.sent_messages(), vec![chat("3"), chat("4")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_is_marked_lost() {
        let (a, _b) = memory::pair();
        let conn = Connection::new();
        conn.reopen(passer(a)).await.unwrap();
        let config = CommunicatorConfig {
            receive_timeout_secs: 2,
            ..CommunicatorConfig::default()
        };
        let alice: TestCommunicator = Communicator::new(config.into(), conn);

        let mut changes = alice.connection().watch_state();
        changes
            .wait_for(|state| *state == ConnectionState::Lost)
            .await
            .unwrap();
        assert_eq!(alice.state(), ConnectionState::Lost);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopened_link_gets_a_full_receive_timeout() {
        let config = CommunicatorConfig {
            receive_timeout_secs: 2,
            ..CommunicatorConfig::default()
        };
        let alice: TestCommunicator =
            Communicator::new(config.into(), Connection::new());

        // Several receive deadlines expire while nothing is attached.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let (a, _b) = memory::pair();
        alice.connection().reopen(passer(a)).await.unwrap();
        let reopened = Instant::now();

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(alice.state(), ConnectionState::Open);

        let mut changes = alice.connection().watch_state();
        changes
            .wait_for(|state| *state == ConnectionState::Lost)
            .await
            .unwrap();
        assert!(reopened.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_over_threshold_marks_lost() {
        let (a, _b) = memory::pair();
        let conn = Connection::new();
        conn.reopen(passer(a)).await.unwrap();
        let config = CommunicatorConfig {
            queue_depth_for_timeout: 3,
            ..CommunicatorConfig::default()
        };
        let alice: TestCommunicator = Communicator::new(config.into(), conn);
        // Park the sender on a lost connection so the queue builds up,
        // then reopen it.
        alice.connection().mark_as_lost();
        for n in 0..10 {
            alice.queue_for_sending(chat(&n.to_string()));
        }
        let (a, _b) = memory::pair();
        alice.connection().reopen(passer(a)).await.unwrap();

        let mut changes = alice.connection().watch_state();
        changes
            .wait_for(|state| *state == ConnectionState::Lost)
            .await
            .unwrap();
    }

    /// JSON, except that any chat mentioning "poison" fails to encode.
    #[derive(Debug, Clone)]
    struct RefusingCodec;

    impl Codec for RefusingCodec {
        fn encode<V: Serialize>(
            &self,
            value: &V,
        ) -> Result<Vec<u8>, ProtocolError> {
            let bytes = JsonCodec.encode(value)?;
            if bytes.windows(6).any(|w| w == b"poison") {
                return Err(ProtocolError::Encode(serde_json::Error::custom(
                    "refusing to encode",
                )));
            }
            Ok(bytes)
        }

        fn decode<V: DeserializeOwned>(
            &self,
            data: &[u8],
        ) -> Result<V, ProtocolError> {
            JsonCodec.decode(data)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unencodable_message_is_dropped_and_queue_moves_on() {
        let (a, b) = memory::pair();
        let a_conn = Connection::new();
        let b_conn = Connection::new();
        let refusing = MessagePasser::with_codec(
            a,
            RefusingCodec,
            PasserConfig {
                backoff_ms: 10,
                ..PasserConfig::default()
            }
            .into(),
        );
        a_conn.reopen(refusing).await.unwrap();
        b_conn.reopen(passer(b)).await.unwrap();
        let alice = Communicator::new(settings(), a_conn);
        let bob: TestCommunicator = Communicator::new(settings(), b_conn);
        let mut inbox = bob.subscribe();

        alice.queue_for_sending(chat("poison"));
        alice.queue_for_sending(chat("fine"));

        let received = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let message = inbox.recv().await.unwrap();
                if !message.is_ping() {
                    return message;
                }
            }
        })
        .await
        .expect("the message behind the refused one should arrive");

        assert_eq!(received, chat("fine"));
        assert_eq!(alice.state(), ConnectionState::Open);
        assert_eq!(without_pings(alice.sent_messages()), vec![chat("fine")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drains_queue_then_closes() {
        let (mut alice, bob) = linked_pair(settings(), settings()).await;
        let mut inbox = bob.subscribe();

        for n in 0..3 {
            alice.queue_for_sending(chat(&n.to_string()));
        }
        let started = Instant::now();
        alice.close().await;

        assert_eq!(alice.state(), ConnectionState::Closed);
        assert!(started.elapsed() < Duration::from_secs(5));
        for n in 0..3 {
            assert_eq!(inbox.recv().await.unwrap(), chat(&n.to_string()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_lost_closes_without_draining() {
        let conn = Connection::new();
        let mut alice: TestCommunicator = Communicator::new(settings(), conn);
        let (a, _b) = memory::pair();
        alice.connection().reopen(passer(a)).await.unwrap();
        alice.connection().mark_as_lost();
        alice.queue_for_sending(chat("stuck"));

        // Lost → begin_closing → Closed: nothing can be drained.
        alice.close().await;
        assert_eq!(alice.state(), ConnectionState::Closed);
        assert!(without_pings(alice.sent_messages()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_abandons_queue() {
        let (mut alice, _bob) = linked_pair(settings(), settings()).await;
        alice.connection().mark_as_lost();
        alice.queue_for_sending(chat("never sent"));

        alice.terminate().await;

        assert_eq!(alice.state(), ConnectionState::Closed);
        assert!(without_pings(alice.sent_messages()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_shared_connection() {
        let (alice, _bob) = linked_pair(settings(), settings()).await;
        let conn = alice.connection().clone();
        alice.shutdown().await;

        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
