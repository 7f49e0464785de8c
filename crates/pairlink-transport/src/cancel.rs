//! Cooperative cancellation shared by every suspension point.
//!
//! A [`CancelSource`] owns the signal; any number of [`CancelToken`]s
//! observe it. A token can carry its own deadline on top of the source's
//! signal ([`CancelToken::with_timeout`]), so a per-operation timeout and
//! an explicit shutdown look identical to the code that waits on the
//! token. Only the caller that created the deadline can tell them apart.
//!
//! ```text
//! CancelSource ──token()──→ CancelToken ──with_timeout(5s)──→ CancelToken
//!      │                         │                                  │
//!  cancel() / cancel_after()     └──── fires when the source fires ─┘
//!                                                        or after 5s
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Marker returned when an operation stopped because its token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Owner of a cancellation signal.
///
/// The watched value is the instant at which cancellation takes effect:
/// `None` means "not scheduled", `Some(now)` means "cancelled".
#[derive(Debug, Clone)]
pub struct CancelSource {
    fires_at: Arc<watch::Sender<Option<Instant>>>,
}

impl CancelSource {
    /// Creates a source that has not been cancelled.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            fires_at: Arc::new(tx),
        }
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            signal: self.fires_at.subscribe(),
            deadline: None,
        }
    }

    /// Cancels every token of this source immediately.
    pub fn cancel(&self) {
        self.schedule(Instant::now());
    }

    /// Cancels every token of this source once `delay` has elapsed.
    ///
    /// An earlier scheduled cancellation is never pushed back.
    pub fn cancel_after(&self, delay: Duration) {
        self.schedule(Instant::now() + delay);
    }

    /// Returns `true` once the source has fired.
    pub fn is_cancelled(&self) -> bool {
        self.fires_at
            .borrow()
            .is_some_and(|at| Instant::now() >= at)
    }

    fn schedule(&self, at: Instant) {
        self.fires_at.send_if_modified(|current| {
            match *current {
                Some(existing) if existing <= at => false,
                _ => {
                    *current = Some(at);
                    true
                }
            }
        });
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A cheap, cloneable view of a [`CancelSource`], optionally with an
/// extra deadline of its own.
#[derive(Debug, Clone)]
pub struct CancelToken {
    signal: watch::Receiver<Option<Instant>>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        // The sender is dropped right away, so the value stays `None`
        // and `changed()` reports a closed channel forever.
        let (_tx, rx) = watch::channel(None);
        Self {
            signal: rx,
            deadline: None,
        }
    }

    /// Derives a token that also fires `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            signal: self.signal.clone(),
            deadline: earliest(self.deadline, Some(Instant::now() + timeout)),
        }
    }

    /// Returns `true` if the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.fires_at().is_some_and(|at| Instant::now() >= at)
    }

    /// Returns `Err(Cancelled)` if the token has fired.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Completes once the token fires. Pends forever for [`never`].
    ///
    /// [`never`]: Self::never
    pub async fn cancelled(&self) {
        let mut signal = self.signal.clone();
        loop {
            let fires_at = earliest(*signal.borrow_and_update(), self.deadline);
            match fires_at {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => return,
                        changed = signal.changed() => {
                            if changed.is_err() {
                                tokio::time::sleep_until(at).await;
                                return;
                            }
                        }
                    }
                }
                None => {
                    if signal.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }

    /// Drives `future` to completion unless the token fires first.
    pub async fn run<F: Future>(
        &self,
        future: F,
    ) -> Result<F::Output, Cancelled> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            output = future => Ok(output),
        }
    }

    /// Sleeps for `duration`, waking early with `Err` if the token fires.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.run(tokio::time::sleep(duration)).await
    }

    fn fires_at(&self) -> Option<Instant> {
        earliest(*self.signal.borrow(), self.deadline)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
