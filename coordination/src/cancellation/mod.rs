//! Cancellation & Timeout (C1, §4.1).
//!
//! A [`CancellationToken`] is a monotonic, observable flag with a
//! fire-once list of listeners invoked synchronously, in registration
//! order, on whichever thread requests cancellation. [`ProgressAwareTimeout`]
//! drives a token from two independent timers (hard deadline, idle
//! deadline) and [`LinkedToken`] composes a parent token with a timeout
//! source without ever cancelling the parent.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::warn;

type Listener = Box<dyn Fn(&str) + Send + Sync>;

struct Inner {
    requested: bool,
    reason: Option<String>,
    listeners: Vec<Listener>,
}

/// A monotonic cancellation flag with fire-once listener notification.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                requested: false,
                reason: None,
                listeners: Vec::new(),
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.lock().unwrap().requested
    }

    pub fn cancellation_reason(&self) -> Option<String> {
        self.inner.lock().unwrap().reason.clone()
    }

    /// Cancel the token with `reason`. Cancellation is monotonic: once
    /// requested, subsequent calls are no-ops and keep the first reason.
    /// Listener panics are caught and logged, never propagated, and never
    /// stop later listeners from running.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let already = {
            let mut inner = self.inner.lock().unwrap();
            if inner.requested {
                true
            } else {
                inner.requested = true;
                inner.reason = Some(reason.clone());
                false
            }
        };
        if already {
            return;
        }
        self.notify.notify_waiters();

        let listeners = {
            let inner = self.inner.lock().unwrap();
            // listeners are invoked outside the lock so a listener that
            // registers another listener (fire-once, immediate) does not
            // deadlock.
            inner.listeners.len()
        };
        for i in 0..listeners {
            let maybe = {
                let inner = self.inner.lock().unwrap();
                inner.listeners.get(i).map(|_| ())
            };
            if maybe.is_none() {
                continue;
            }
            let reason_ref = reason.clone();
            let result = {
                let inner = self.inner.lock().unwrap();
                let f = &inner.listeners[i];
                std::panic::catch_unwind(AssertUnwindSafe(|| f(&reason_ref)))
            };
            if let Err(e) = result {
                warn!(?e, "cancellation listener panicked; ignoring");
            }
        }
    }

    /// Register a listener. If the token is already cancelled, the
    /// listener is invoked immediately (still exactly once).
    pub fn on_cancel(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        let reason_if_already = {
            let mut inner = self.inner.lock().unwrap();
            if inner.requested {
                inner.reason.clone()
            } else {
                inner.listeners.push(Box::new(listener));
                return;
            }
        };
        let reason = reason_if_already.unwrap_or_default();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(&reason)));
        if let Err(e) = result {
            warn!(?e, "cancellation listener panicked; ignoring");
        }
    }

    /// Wait asynchronously until this token is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancellation_requested() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Error raised by [`race`] when the token cancels before (or during)
/// the raced operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cancelled: {0}")]
pub struct CancellationError(pub String);

/// Await `fut`, racing it against `token`. If the token is already
/// cancelled, the operation never starts.
pub async fn race<F, T>(fut: F, token: &CancellationToken) -> Result<T, CancellationError>
where
    F: std::future::Future<Output = T>,
{
    if token.is_cancellation_requested() {
        return Err(CancellationError(
            token.cancellation_reason().unwrap_or_default(),
        ));
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CancellationError(token.cancellation_reason().unwrap_or_default())),
        v = fut => Ok(v),
    }
}

/// Handle returned by [`create_timeout`].
pub struct TimeoutHandle {
    pub token: CancellationToken,
    start: Instant,
    last_progress: Arc<Mutex<Instant>>,
    disposed: Arc<Mutex<bool>>,
}

impl TimeoutHandle {
    /// Reset the idle timer. Does not affect the hard deadline.
    pub fn report_progress(&self) {
        *self.last_progress.lock().unwrap() = Instant::now();
    }

    pub fn idle_time(&self) -> Duration {
        Instant::now().saturating_duration_since(*self.last_progress.lock().unwrap())
    }

    pub fn elapsed_time(&self) -> Duration {
        Instant::now().saturating_duration_since(self.start)
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// Release the background timer. Cancellation requests after
    /// `dispose()` are no-ops (the timer task observes `disposed` and
    /// exits without cancelling).
    pub fn dispose(&self) {
        *self.disposed.lock().unwrap() = true;
    }
}

/// Create a progress-aware timeout (§3.5, §4.1): a hard deadline from
/// `start`, and an idle deadline that resets on `report_progress()`.
/// Whichever fires first cancels the returned token with a matching
/// reason string.
pub fn create_timeout(hard_ms: u64, idle_ms: u64, tick_ms: u64) -> TimeoutHandle {
    let token = CancellationToken::new();
    let start = Instant::now();
    let last_progress = Arc::new(Mutex::new(start));
    let disposed = Arc::new(Mutex::new(false));

    let handle = TimeoutHandle {
        token: token.clone(),
        start,
        last_progress: last_progress.clone(),
        disposed: disposed.clone(),
    };

    tokio::spawn(async move {
        let hard = Duration::from_millis(hard_ms);
        let idle = Duration::from_millis(idle_ms);
        let tick = Duration::from_millis(tick_ms.max(1));
        loop {
            sleep(tick).await;
            if *disposed.lock().unwrap() {
                return;
            }
            if token.is_cancellation_requested() {
                return;
            }
            let elapsed = Instant::now().saturating_duration_since(start);
            let idle_elapsed = Instant::now().saturating_duration_since(*last_progress.lock().unwrap());
            if idle_elapsed >= idle {
                token.cancel(format!("Idle timeout after {}s", idle.as_secs()));
                return;
            }
            if elapsed >= hard {
                token.cancel(format!("Maximum timeout exceeded after {}s", hard.as_secs()));
                return;
            }
        }
    });

    handle
}

/// Create a linked token that cancels iff `parent` cancels (propagating
/// its reason verbatim) OR `timeout_source` cancels (propagating its
/// reason). The child never cancels `parent`.
pub fn create_linked_token(parent: &CancellationToken, timeout_source: &CancellationToken) -> CancellationToken {
    let linked = CancellationToken::new();

    {
        let linked = linked.clone();
        parent.on_cancel(move |reason| linked.cancel(reason.to_string()));
    }
    {
        let linked = linked.clone();
        timeout_source.on_cancel(move |reason| linked.cancel(reason.to_string()));
    }

    linked
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn cancellation_is_monotonic() {
        let token = CancellationToken::new();
        token.cancel("first");
        token.cancel("second");
        assert_eq!(token.cancellation_reason().unwrap(), "first");
    }

    #[test]
    fn listener_registered_after_cancel_fires_immediately() {
        let token = CancellationToken::new();
        token.cancel("boom");
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        token.on_cancel(move |_| fired2.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let token = CancellationToken::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            token.on_cancel(move |_| order.lock().unwrap().push(i));
        }
        token.cancel("go");
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        token.on_cancel(|_| panic!("listener blew up"));
        let count2 = count.clone();
        token.on_cancel(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        token.cancel("go");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn race_fails_immediately_if_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel("already gone");
        let result = race(async { 42 }, &token).await;
        assert_eq!(result.unwrap_err().0, "already gone");
    }

    #[tokio::test]
    async fn race_returns_value_when_not_cancelled() {
        let token = CancellationToken::new();
        let result = race(async { 42 }, &token).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_timeout_fires_even_with_progress_reports() {
        let handle = create_timeout(20_000, 10_000, 100);
        let deadline = Instant::now() + Duration::from_secs(31);
        while Instant::now() < deadline && !handle.token.is_cancellation_requested() {
            tokio::time::advance(Duration::from_secs(5)).await;
            handle.report_progress();
        }
        assert!(handle.token.is_cancellation_requested());
        assert!(handle
            .token
            .cancellation_reason()
            .unwrap()
            .contains("Maximum timeout exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_fires_without_progress() {
        let handle = create_timeout(20_000, 10_000, 100);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(handle.token.is_cancellation_requested());
        assert!(handle
            .token
            .cancellation_reason()
            .unwrap()
            .contains("Idle timeout"));
    }

    #[test]
    fn linked_token_propagates_parent_reason_without_cancelling_parent() {
        let parent = CancellationToken::new();
        let timeout_source = CancellationToken::new();
        let linked = create_linked_token(&parent, &timeout_source);
        timeout_source.cancel("Idle timeout after 10s");
        assert!(linked.is_cancellation_requested());
        assert!(!parent.is_cancellation_requested());
        assert_eq!(linked.cancellation_reason().unwrap(), "Idle timeout after 10s");
    }

    #[test]
    fn linked_token_propagates_parent_cancellation() {
        let parent = CancellationToken::new();
        let timeout_source = CancellationToken::new();
        let linked = create_linked_token(&parent, &timeout_source);
        parent.cancel("user requested stop");
        assert!(linked.is_cancellation_requested());
        assert_eq!(
            linked.cancellation_reason().unwrap(),
            "user requested stop"
        );
    }
}
