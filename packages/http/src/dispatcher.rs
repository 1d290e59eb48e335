//! Running work off the caller's thread and funnelling notifications to a
//! single callback context.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::Error;

/// A unit of work or a notification.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool seen by sessions.
///
/// `execute` runs background work in parallel. `notify` must run every job
/// it receives on one consistent context, in submission order, so callback
/// implementations never need their own synchronization.
pub trait Dispatcher: Send + Sync {
    fn execute(&self, job: Job);

    fn notify(&self, job: Job);
}

/// Thread-per-request dispatcher with a channel-fed callback context.
pub struct ThreadDispatcher {
    notifications: Sender<Job>,
}

impl ThreadDispatcher {
    /// Dispatcher whose notifications run on a dedicated `http-callback`
    /// thread. The thread exits once the dispatcher is dropped.
    pub fn new() -> Result<Self, Error> {
        let (notifications, receiver) = mpsc::channel::<Job>();

        thread::Builder::new()
            .name("http-callback".to_string())
            .spawn(move || {
                for job in receiver {
                    run_guarded(job);
                }
                log::debug!("Callback thread exiting");
            })?;

        Ok(Self { notifications })
    }

    /// Dispatcher whose notifications are queued for the caller to run on
    /// its own thread through the returned [`CallbackQueue`].
    pub fn with_callback_queue() -> (Self, CallbackQueue) {
        let (notifications, receiver) = mpsc::channel();
        (Self { notifications }, CallbackQueue { receiver })
    }
}

impl Dispatcher for ThreadDispatcher {
    fn execute(&self, job: Job) {
        let slot = Arc::new(Mutex::new(Some(job)));
        let worker_slot = Arc::clone(&slot);

        let spawned = thread::Builder::new()
            .name("http-worker".to_string())
            .spawn(move || {
                let job = worker_slot.lock().ok().and_then(|mut job| job.take());
                if let Some(job) = job {
                    job();
                }
            });

        if let Err(e) = spawned {
            log::warn!("Failed to spawn worker thread, running inline: {}", e);
            let job = slot.lock().ok().and_then(|mut job| job.take());
            if let Some(job) = job {
                job();
            }
        }
    }

    fn notify(&self, job: Job) {
        if self.notifications.send(job).is_err() {
            log::warn!("Callback context is gone, dropping notification");
        }
    }
}

/// Notifications waiting to run on the caller's thread.
pub struct CallbackQueue {
    receiver: Receiver<Job>,
}

impl CallbackQueue {
    /// Run every notification queued so far. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(job) = self.receiver.try_recv() {
            run_guarded(job);
            count += 1;
        }
        count
    }

    /// Wait up to `timeout` for one notification and run it.
    pub fn run_next_timeout(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(job) => {
                run_guarded(job);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

fn run_guarded(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        log::warn!("Notification panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn execute_runs_on_worker_thread() {
        let (dispatcher, _queue) = ThreadDispatcher::with_callback_queue();
        let (tx, rx) = mpsc::channel();

        dispatcher.execute(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }));

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("http-worker"));
    }

    #[test]
    fn queued_notifications_run_in_order_on_caller() {
        let (dispatcher, queue) = ThreadDispatcher::with_callback_queue();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let caller = thread::current().id();

        for i in 0..3 {
            let seen = Arc::clone(&seen);
            dispatcher.notify(Box::new(move || {
                assert_eq!(thread::current().id(), caller);
                seen.lock().unwrap().push(i);
            }));
        }

        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(queue.run_pending(), 0);
    }

    #[test]
    fn run_next_timeout_reports_empty_queue() {
        let (_dispatcher, queue) = ThreadDispatcher::with_callback_queue();
        assert!(!queue.run_next_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn callback_thread_survives_panicking_notification() {
        let dispatcher = ThreadDispatcher::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        dispatcher.notify(Box::new(|| panic!("boom")));
        let counter = Arc::clone(&count);
        dispatcher.notify(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        }));

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("http-callback"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notify_after_queue_dropped_is_harmless() {
        let (dispatcher, queue) = ThreadDispatcher::with_callback_queue();
        drop(queue);
        dispatcher.notify(Box::new(|| {}));
    }
}
