//! Cancellation and deadline propagation for outbound calls.
//!
//! Every call into the CircleCI API carries a [`CallContext`]. The context can
//! be cancelled through its [`Canceller`] or expire at a deadline; whichever
//! happens first resolves [`CallContext::done`].

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a [`CallContext`] stopped accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CancelReason {
    /// The context was cancelled explicitly.
    #[error("operation cancelled")]
    Cancelled,
    /// The context deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Caller-supplied cancellation signal and deadline.
///
/// Contexts are cheap to clone. Deriving a context with [`with_timeout`] or
/// [`with_deadline`] only ever tightens the deadline.
///
/// [`with_timeout`]: CallContext::with_timeout
/// [`with_deadline`]: CallContext::with_deadline
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that expires after `timeout`.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let at = Instant::now() + timeout;
        self.with_deadline(at)
    }

    /// Derive a context that expires at `at`, keeping any earlier deadline.
    pub fn with_deadline(mut self, at: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(at),
            None => at,
        });
        self
    }

    /// Attach the cancellation signal of `canceller`.
    pub fn with_cancel(mut self, canceller: &Canceller) -> Self {
        self.cancel = Some(canceller.tx.subscribe());
        self
    }

    /// Returns the reason this context is finished, without waiting.
    pub fn err(&self) -> Option<CancelReason> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(at) if Instant::now() >= at => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) -> CancelReason {
        let cancelled = async {
            if let Some(mut rx) = self.cancel.clone() {
                let fired = rx.wait_for(|cancelled| *cancelled).await.is_ok();
                if fired {
                    return;
                }
            }
            // A dropped canceller can no longer fire.
            std::future::pending::<()>().await
        };
        let expired = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => CancelReason::Cancelled,
            _ = expired => CancelReason::DeadlineExceeded,
        }
    }
}

/// The sending half of a cancellation signal.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    /// Create a canceller that has not fired.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Cancel every context derived from this canceller.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// A fresh background context bound to this canceller.
    pub fn context(&self) -> CallContext {
        CallContext::background().with_cancel(self)
    }
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}
