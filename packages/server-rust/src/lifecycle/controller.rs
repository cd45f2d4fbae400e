//! Transport lifecycle state with in-flight request tracking.
//!
//! Every transport (the HTTP listener, a messaging service) owns one
//! controller. `ArcSwap` holds the lifecycle state so request paths can read
//! it without locking; an atomic counter with RAII guards tracks requests
//! that must finish before the transport reports itself stopped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Lifecycle of a transport.
///
/// State machine: Running -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Accepting and serving requests.
    Running,
    /// No new requests are accepted; in-flight requests are finishing.
    Draining,
    /// Every in-flight request has completed.
    Stopped,
}

/// Drives one transport from `Running` to `Stopped`.
///
/// 1. Request paths call `try_admit()` and hold the guard until they finish
/// 2. `begin_drain()` moves to `Draining` and wakes every drain receiver
/// 3. `wait_for_drain()` resolves once the last guard is dropped
#[derive(Debug)]
pub struct ShutdownController {
    drain_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: Arc<ArcSwap<LifecycleState>>,
}

impl ShutdownController {
    /// Creates a controller in the `Running` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            drain_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: Arc::new(ArcSwap::from_pointee(LifecycleState::Running)),
        }
    }

    /// Receiver flipped to `true` once draining starts.
    #[must_use]
    pub fn drain_receiver(&self) -> watch::Receiver<bool> {
        self.drain_signal.subscribe()
    }

    /// Resolves once draining starts. Suitable as a graceful-shutdown future.
    pub fn drained(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.drain_receiver();
        async move {
            // A dropped sender means the controller is gone: stop as well.
            let _ = rx.wait_for(|draining| *draining).await;
        }
    }

    /// Stops accepting new requests and signals every drain receiver.
    ///
    /// Idempotent; a stopped controller stays stopped.
    pub fn begin_drain(&self) {
        if self.state() == LifecycleState::Running {
            self.state.store(Arc::new(LifecycleState::Draining));
        }
        let _ = self.drain_signal.send(true);
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Marks the transport as fully stopped.
    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
    }

    /// Tracks one in-flight request until the guard is dropped.
    ///
    /// The counter is decremented on drop, including during unwinding.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Admits one request, or returns `None` once draining has started.
    ///
    /// The guard is taken before the state is checked, so a concurrent
    /// `wait_for_drain` either sees this request counted or this call sees
    /// `Draining` and backs out.
    #[must_use]
    pub fn try_admit(&self) -> Option<InFlightGuard> {
        let guard = self.in_flight_guard();
        self.is_accepting().then_some(guard)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits for all in-flight requests to complete, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` when the count reaches zero.
    /// Returns `false` on timeout, leaving the state at `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                self.mark_stopped();
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Waits until some other party marks the transport `Stopped`.
    pub async fn wait_stopped(&self) {
        while self.state() != LifecycleState::Stopped {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running() {
        let controller = ShutdownController::new();
        assert_eq!(controller.state(), LifecycleState::Running);
        assert!(controller.is_accepting());
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[test]
    fn begin_drain_stops_accepting() {
        let controller = ShutdownController::new();
        controller.begin_drain();
        assert_eq!(controller.state(), LifecycleState::Draining);
        assert!(!controller.is_accepting());
    }

    #[test]
    fn begin_drain_after_stop_keeps_stopped() {
        let controller = ShutdownController::new();
        controller.mark_stopped();
        controller.begin_drain();
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[test]
    fn guards_count_in_flight() {
        let controller = ShutdownController::new();

        let first = controller.in_flight_guard();
        let second = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(first);
        assert_eq!(controller.in_flight_count(), 1);
        drop(second);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[test]
    fn try_admit_counts_while_running() {
        let controller = ShutdownController::new();
        let guard = controller.try_admit();
        assert!(guard.is_some());
        assert_eq!(controller.in_flight_count(), 1);
        drop(guard);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[test]
    fn try_admit_backs_out_while_draining() {
        let controller = ShutdownController::new();
        controller.begin_drain();
        assert!(controller.try_admit().is_none());
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn admitted_request_holds_drain_open() {
        let controller = Arc::new(ShutdownController::new());
        let guard = controller.try_admit();
        assert!(guard.is_some());
        controller.begin_drain();

        // A request admitted before the drain keeps the transport from stopping.
        assert!(!controller.wait_for_drain(Duration::from_millis(30)).await);
        assert_eq!(controller.state(), LifecycleState::Draining);
        drop(guard);
        assert!(controller.wait_for_drain(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn drain_receiver_notified() {
        let controller = ShutdownController::new();
        let mut rx = controller.drain_receiver();
        assert!(!*rx.borrow());

        controller.begin_drain();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn drained_future_resolves_after_begin_drain() {
        let controller = ShutdownController::new();
        let drained = tokio::spawn(controller.drained());
        tokio::task::yield_now().await;
        assert!(!drained.is_finished());

        controller.begin_drain();
        drained.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_drain_with_nothing_in_flight() {
        let controller = ShutdownController::new();
        controller.begin_drain();

        assert!(controller.wait_for_drain(Duration::from_secs(1)).await);
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn wait_for_drain_waits_for_guards() {
        let controller = ShutdownController::new();
        let guard = controller.in_flight_guard();
        controller.begin_drain();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(controller.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(controller.state(), LifecycleState::Stopped);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_drain_times_out() {
        let controller = ShutdownController::new();
        let _guard = controller.in_flight_guard();
        controller.begin_drain();

        assert!(!controller.wait_for_drain(Duration::from_millis(50)).await);
        assert_eq!(controller.state(), LifecycleState::Draining);
    }
}
