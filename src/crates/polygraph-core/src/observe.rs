//! Node latency observation
//!
//! The engine reports per-node wall time through the [`NodeLatencyObserver`]
//! trait — the single pluggable point of the walk. Three implementations are
//! provided:
//!
//! - [`NoopNodeLatencyObserver`] discards everything.
//! - [`TracingNodeLatencyObserver`] logs synchronously through `tracing`.
//! - [`AsyncNodeLatencyObserver`] decouples the hot path from downstream
//!   I/O: events go into a bounded channel drained by one background worker,
//!   and when the channel is full (or the observer is closed) the event is
//!   counted as dropped instead of blocking the caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Receives the wall time of every visited node.
pub trait NodeLatencyObserver: Send + Sync {
    /// Called exactly once per visited node. Implementations must not block
    /// the engine.
    fn observe_node_latency(&self, node_id: &str, duration: Duration);
}

/// Observer that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNodeLatencyObserver;

impl NodeLatencyObserver for NoopNodeLatencyObserver {
    fn observe_node_latency(&self, _node_id: &str, _duration: Duration) {}
}

/// Synchronous sink that logs each event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNodeLatencyObserver;

impl NodeLatencyObserver for TracingNodeLatencyObserver {
    fn observe_node_latency(&self, node_id: &str, duration: Duration) {
        tracing::debug!(
            node = %node_id,
            duration_ms = duration.as_secs_f64() * 1000.0,
            "policy node latency"
        );
    }
}

struct LatencyEvent {
    node_id: String,
    duration: Duration,
}

/// Non-blocking pass-through to a downstream observer.
///
/// Events are buffered in a bounded channel (capacity ≥ 1) and drained by a
/// single spawned worker. `observe_node_latency` never blocks: on a full
/// channel, or after [`close`](AsyncNodeLatencyObserver::close), the event
/// is counted in [`dropped`](AsyncNodeLatencyObserver::dropped) and
/// discarded. Close is idempotent and delivers everything already buffered
/// before the worker exits.
///
/// Must be created inside a tokio runtime (the worker is a spawned task).
pub struct AsyncNodeLatencyObserver {
    sender: Mutex<Option<mpsc::Sender<LatencyEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl AsyncNodeLatencyObserver {
    /// Wrap `downstream` with a buffer of `buffer` events (minimum 1).
    pub fn new(downstream: Arc<dyn NodeLatencyObserver>, buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<LatencyEvent>(buffer.max(1));
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                downstream.observe_node_latency(&event.node_id, event.duration);
            }
        });

        Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Stop accepting events, drain what is buffered and join the worker.
    /// Safe to call more than once; later calls return immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // dropping the sender ends the worker's recv loop once the buffer
        // is empty
        self.sender.lock().take();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Number of events discarded so far (buffer full or observer closed).
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl NodeLatencyObserver for AsyncNodeLatencyObserver {
    fn observe_node_latency(&self, node_id: &str, duration: Duration) {
        if self.closed.load(Ordering::SeqCst) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let sent = {
            let sender = self.sender.lock();
            match sender.as_ref() {
                Some(tx) => tx
                    .try_send(LatencyEvent {
                        node_id: node_id.to_string(),
                        duration,
                    })
                    .is_ok(),
                None => false,
            }
        };

        if !sent {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct SpyObserver {
        delivered: AtomicUsize,
        delay: Option<Duration>,
    }

    impl SpyObserver {
        fn slow(delay: Duration) -> Self {
            Self {
                delivered: AtomicUsize::new(0),
                delay: Some(delay),
            }
        }

        fn count(&self) -> usize {
            self.delivered.load(Ordering::SeqCst)
        }
    }

    impl NodeLatencyObserver for SpyObserver {
        fn observe_node_latency(&self, _node_id: &str, _duration: Duration) {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_delivers_buffered_events_on_close() {
        let spy = Arc::new(SpyObserver::default());
        let observer = AsyncNodeLatencyObserver::new(spy.clone(), 8);

        observer.observe_node_latency("start", Duration::from_millis(1));
        observer.observe_node_latency("approved", Duration::from_millis(2));
        observer.close().await;

        assert_eq!(spy.count(), 2);
        assert_eq!(observer.dropped(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drops_when_buffer_is_full() {
        let spy = Arc::new(SpyObserver::slow(Duration::from_millis(1)));
        let observer = AsyncNodeLatencyObserver::new(spy.clone(), 1);

        for _ in 0..500 {
            observer.observe_node_latency("n", Duration::from_micros(1));
        }
        observer.close().await;

        assert!(observer.dropped() > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_plus_delivered_equals_observed() {
        let spy = Arc::new(SpyObserver::slow(Duration::from_micros(100)));
        let observer = AsyncNodeLatencyObserver::new(spy.clone(), 4);

        const TOTAL: usize = 200;
        for _ in 0..TOTAL {
            observer.observe_node_latency("n", Duration::from_micros(1));
        }
        observer.close().await;

        assert_eq!(spy.count() + observer.dropped() as usize, TOTAL);
    }

    #[tokio::test]
    async fn test_observe_after_close_counts_as_drop() {
        let spy = Arc::new(SpyObserver::default());
        let observer = AsyncNodeLatencyObserver::new(spy.clone(), 4);

        observer.close().await;
        observer.observe_node_latency("late", Duration::from_micros(1));

        assert_eq!(spy.count(), 0);
        assert_eq!(observer.dropped(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let spy = Arc::new(SpyObserver::default());
        let observer = AsyncNodeLatencyObserver::new(spy.clone(), 4);

        observer.observe_node_latency("n", Duration::from_micros(1));
        observer.close().await;
        observer.close().await;

        assert_eq!(spy.count(), 1);
    }

    #[tokio::test]
    async fn test_minimum_buffer_is_one() {
        let spy = Arc::new(SpyObserver::default());
        // a zero buffer must not panic the channel constructor
        let observer = AsyncNodeLatencyObserver::new(spy.clone(), 0);

        observer.observe_node_latency("n", Duration::from_micros(1));
        observer.close().await;

        assert_eq!(spy.count(), 1);
    }
}
