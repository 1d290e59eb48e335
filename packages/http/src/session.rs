//! One in-flight request as seen by its consumer.
//!
//! A [`Session`] arbitrates between the background worker and the consumer
//! thread. Its state is a single atomic tri-state: whichever of natural
//! completion, explicit cancellation, or a cancelling timeout claims it
//! first wins, and every later attempt is a no-op. Terminal notifications
//! are therefore delivered at most once.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::handle::{CancelHandle, SessionState, CANCELLED, COMPLETED, PENDING};
use crate::types::ResponseEnvelope;

/// Intermediate progress payload.
pub type Progress = serde_json::Value;

/// Receives the notifications of one session, always on the dispatcher's
/// callback context.
pub trait Callback<T>: Send {
    fn on_response_success(&mut self, response: Arc<ResponseEnvelope<T>>);

    fn on_response_failure(&mut self, _response: Arc<ResponseEnvelope<T>>) {}

    fn on_progress_update(&mut self, _progress: &Progress) {}
}

type Slot<T> = Option<Arc<ResponseEnvelope<T>>>;

struct Shared<T> {
    state: AtomicU8,
    cancel: CancelHandle,
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    callback: Mutex<Option<Box<dyn Callback<T>>>>,
}

/// Handle to one asynchronous execution.
///
/// Cloning shares the same session.
pub struct Session<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Session<T> {
    /// A pending session. Backends that do not go through
    /// [`Session::spawn`] drive it with the `on_*` methods.
    pub fn new(callback: Option<Box<dyn Callback<T>>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(PENDING),
                cancel: CancelHandle::new(),
                slot: Mutex::new(None),
                ready: Condvar::new(),
                callback: Mutex::new(callback),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_raw(self.shared.state.load(Ordering::SeqCst))
    }

    /// True once the session reached either terminal state.
    pub fn is_completed(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// The flag shared with the background work.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.shared.cancel.clone()
    }

    /// Block until the execution finishes.
    ///
    /// A cancelled session, a poisoned lock, or a faulted worker yields a
    /// `RequestFailed` envelope.
    pub fn await_response(&self) -> Arc<ResponseEnvelope<T>> {
        let outcome = self.wait_for_result(None);
        self.take_outcome(outcome)
    }

    /// Block for at most `timeout`.
    ///
    /// On timeout returns a `TimedOut` envelope. With `cancel_on_timeout`
    /// the session is also cancelled, which only suppresses notifications:
    /// a request already sent still takes effect on the server.
    pub fn await_response_timeout(
        &self,
        timeout: Duration,
        cancel_on_timeout: bool,
    ) -> Arc<ResponseEnvelope<T>> {
        match self.wait_for_result(Some(timeout)) {
            Wait::TimedOut => {
                if cancel_on_timeout {
                    self.request_cancel();
                }
                Arc::new(ResponseEnvelope::timed_out(format!(
                    "no response within {} ms",
                    timeout.as_millis()
                )))
            }
            outcome => self.take_outcome(outcome),
        }
    }

    /// Cancel the session unless it already reached a terminal state.
    pub fn request_cancel(&self) {
        if self.claim(CANCELLED) {
            self.shared.cancel.cancel();
            self.wake_waiters();
        }
    }

    /// Terminal delivery from the execution backend.
    pub fn on_request_complete(&self, envelope: Option<Arc<ResponseEnvelope<T>>>) {
        let Some(envelope) = envelope else {
            return;
        };
        if self.is_cancelled() {
            return;
        }
        self.fill(Arc::clone(&envelope));
        if !self.claim(COMPLETED) {
            return;
        }

        let callback = lock(&self.shared.callback).and_then(|mut callback| callback.take());
        if let Some(mut callback) = callback {
            if envelope.is_success() {
                callback.on_response_success(envelope);
            } else {
                callback.on_response_failure(envelope);
            }
        }
    }

    pub fn on_progress_update(&self, progress: &Progress) {
        if self.is_completed() {
            return;
        }
        if let Some(mut callback) = lock(&self.shared.callback) {
            if let Some(callback) = callback.as_mut() {
                callback.on_progress_update(progress);
            }
        }
    }

    /// Cancellation delivery from the execution backend.
    pub fn on_cancelled(&self) {
        if self.claim(CANCELLED) {
            self.shared.cancel.cancel();
            log::debug!("Session cancelled by backend");
            self.wake_waiters();
        }
    }

    fn claim(&self, terminal: u8) -> bool {
        self.shared
            .state
            .compare_exchange(PENDING, terminal, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Store the result for blocking consumers, keeping the first one.
    fn fill(&self, envelope: Arc<ResponseEnvelope<T>>) {
        if let Some(mut slot) = lock(&self.shared.slot) {
            if slot.is_none() {
                *slot = Some(envelope);
            }
        }
        self.shared.ready.notify_all();
    }

    fn wake_waiters(&self) {
        // Taking the lock orders the wakeup after any waiter's flag check.
        drop(lock(&self.shared.slot));
        self.shared.ready.notify_all();
    }

    fn wait_for_result(&self, timeout: Option<Duration>) -> Wait<T> {
        // A deadline past the clock's range waits without bound.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let Some(mut slot) = lock(&self.shared.slot) else {
            return Wait::Failed("session lock poisoned".to_string());
        };

        loop {
            if self.state() == SessionState::Cancelled || self.is_cancelled() {
                return Wait::Cancelled;
            }
            if let Some(envelope) = slot.as_ref() {
                return Wait::Ready(Arc::clone(envelope));
            }

            slot = match deadline {
                None => match self.shared.ready.wait(slot) {
                    Ok(slot) => slot,
                    Err(_) => return Wait::Failed("session lock poisoned".to_string()),
                },
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wait::TimedOut;
                    }
                    match self.shared.ready.wait_timeout(slot, deadline - now) {
                        Ok((slot, _)) => slot,
                        Err(_) => return Wait::Failed("session lock poisoned".to_string()),
                    }
                }
            };
        }
    }

    fn take_outcome(&self, outcome: Wait<T>) -> Arc<ResponseEnvelope<T>> {
        match outcome {
            Wait::Ready(envelope) => {
                self.claim(COMPLETED);
                envelope
            }
            Wait::Cancelled => Arc::new(ResponseEnvelope::request_failed("request cancelled")),
            Wait::Failed(message) => {
                self.claim(COMPLETED);
                Arc::new(ResponseEnvelope::request_failed(message))
            }
            Wait::TimedOut => Arc::new(ResponseEnvelope::timed_out("no response in time")),
        }
    }
}

impl<T: Send + Sync + 'static> Session<T> {
    /// Run `work` through `dispatcher` and return the session tracking it.
    ///
    /// Errors and panics raised by `work` become `RequestFailed` envelopes.
    /// Work is skipped entirely when the session is cancelled before a
    /// worker picks it up.
    pub fn spawn<F>(
        dispatcher: Arc<dyn Dispatcher>,
        callback: Option<Box<dyn Callback<T>>>,
        work: F,
    ) -> Self
    where
        F: FnOnce(&ProgressReporter<T>) -> Result<ResponseEnvelope<T>, Error> + Send + 'static,
    {
        let session = Self::new(callback);
        let worker = session.clone();
        let notifier = Arc::clone(&dispatcher);

        dispatcher.execute(Box::new(move || {
            if worker.is_cancelled() {
                notifier.notify(Box::new(move || worker.on_cancelled()));
                return;
            }

            let reporter = ProgressReporter {
                session: worker.clone(),
                dispatcher: Arc::clone(&notifier),
            };
            let envelope = match panic::catch_unwind(AssertUnwindSafe(|| work(&reporter))) {
                Ok(Ok(envelope)) => envelope,
                Ok(Err(e)) => ResponseEnvelope::request_failed(e.to_string()),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!("Request worker panicked: {}", message);
                    ResponseEnvelope::request_failed(message)
                }
            };

            let envelope = Arc::new(envelope);
            worker.fill(Arc::clone(&envelope));

            if worker.is_cancelled() {
                notifier.notify(Box::new(move || worker.on_cancelled()));
            } else {
                notifier.notify(Box::new(move || worker.on_request_complete(Some(envelope))));
            }
        }));

        session
    }
}

/// Publishes progress from inside running work.
pub struct ProgressReporter<T> {
    session: Session<T>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl<T: Send + Sync + 'static> ProgressReporter<T> {
    /// Queue `progress` for the callback context. Dropped once the session
    /// is terminal.
    pub fn publish(&self, progress: Progress) {
        if self.session.is_completed() {
            return;
        }
        let session = self.session.clone();
        self.dispatcher
            .notify(Box::new(move || session.on_progress_update(&progress)));
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }
}

enum Wait<T> {
    Ready(Arc<ResponseEnvelope<T>>),
    Cancelled,
    TimedOut,
    Failed(String),
}

fn lock<V>(mutex: &Mutex<V>) -> Option<MutexGuard<'_, V>> {
    match mutex.lock() {
        Ok(guard) => Some(guard),
        Err(e) => {
            log::error!("Session lock poisoned: {}", e);
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", message)
    } else {
        "worker panicked".to_string()
    }
}
