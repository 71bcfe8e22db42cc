//! Stop signal: lets a concurrent `stop` interrupt a blocking feed or play.
//!
//! Backends hold one [`StopSignal`] per session. The feeding thread sleeps
//! on it between writes; the stop-or-pause thread raises it. Raising wakes
//! every sleeper immediately, so a feed returns `Stopped` within one wait
//! slice regardless of how long the chunk would have played.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    raised: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Shared, clonable stop flag with a timed wait.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    /// Create a new signal (initially not raised).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake every waiter.
    pub fn raise(&self) {
        // Store under the lock so a waiter between its check and its wait
        // cannot miss the notification.
        let _guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.raised.store(true, Ordering::SeqCst);
        self.inner.wake.notify_all();
        tracing::trace!("Stop signal raised");
    }

    /// Clear the flag before the next utterance.
    pub fn reset(&self) {
        self.inner.raised.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Sleep for `timeout` or until raised. Returns `true` if raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (_guard, _) = self
            .inner
            .wake
            .wait_timeout_while(guard, timeout, |_| !self.inner.raised.load(Ordering::SeqCst))
            .unwrap_or_else(PoisonError::into_inner);
        self.is_raised()
    }

    /// Wake waiters without raising, so they re-check their own condition.
    ///
    /// Lock-free, so it can be called from a device callback. A wakeup that
    /// races a waiter's check is lost, delaying it by at most one timeout.
    pub fn notify(&self) {
        self.inner.wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn default_is_not_raised() {
        let stop = StopSignal::new();
        assert!(!stop.is_raised());
    }

    #[test]
    fn raise_and_reset() {
        let stop = StopSignal::new();

        stop.raise();
        assert!(stop.is_raised());

        stop.reset();
        assert!(!stop.is_raised());
    }

    #[test]
    fn clone_shares_state() {
        let a = StopSignal::new();
        let b = a.clone();

        a.raise();
        assert!(b.is_raised());

        b.reset();
        assert!(!a.is_raised());
    }

    #[test]
    fn wait_times_out_when_not_raised() {
        let stop = StopSignal::new();
        assert!(!stop.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn raise_wakes_a_long_wait() {
        let stop = StopSignal::new();
        let waiter = stop.clone();
        let start = Instant::now();

        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        stop.raise();

        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
