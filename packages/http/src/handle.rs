use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) const PENDING: u8 = 0;
pub(crate) const COMPLETED: u8 = 1;
pub(crate) const CANCELLED: u8 = 2;

/// Lifecycle of a session. Both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Work is in flight and no outcome has been claimed
    Pending,
    /// A result was delivered or retrieved
    Completed,
    /// Cancellation won the claim
    Cancelled,
}

impl SessionState {
    pub(crate) fn from_raw(raw: u8) -> Self {
        match raw {
            PENDING => SessionState::Pending,
            COMPLETED => SessionState::Completed,
            _ => SessionState::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != SessionState::Pending
    }
}

/// Shared cancellation flag for one unit of work.
///
/// Cancelling is cooperative: the worker checks the flag before it starts
/// and before it reports, but a request already on the wire still runs to
/// completion on the server.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
