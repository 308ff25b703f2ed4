//! Cancellation and deadline for the dial phase

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::error::{self, Error};

/// Governs how long a caller is willing to wait for a session to be opened
///
/// A context is checked before dialing and bounds the TCP connect. Once
/// the mail transaction has started it is no longer consulted, the socket
/// timeouts of the client apply instead.
#[derive(Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Context {
        Context::default()
    }

    /// Derives a context expiring after `timeout`
    ///
    /// The new context shares the cancellation flag of `self`, and keeps
    /// the earliest of both deadlines.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derives a context expiring at `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Context {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(deadline),
        }
    }

    /// Handle cancelling this context and every context derived from it
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Time left before the deadline
    ///
    /// `None` without deadline, `Some(Duration::ZERO)` once it is passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails with a dial error if the context is cancelled or expired
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(error::dial("context cancelled"));
        }
        if self.remaining() == Some(Duration::ZERO) {
            return Err(error::dial("context deadline exceeded"));
        }
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Cancels a [`Context`] from another thread
#[derive(Clone, Debug)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Cancels the context
    ///
    /// Sessions already opened are not affected.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
