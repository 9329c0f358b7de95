//! Content-addressed policy cache with single-flight compilation
//!
//! Compiled policies are cached under the lowercase hex SHA-256 of an opaque
//! key text — callers pass either the raw policy text (the key collapses to
//! its content hash) or a composite such as `id:version:hash` to version
//! policies independently.
//!
//! Concurrent `get_or_compute` calls for one key collapse into a single
//! compute (**single-flight**): the first caller runs the closure, everyone
//! else waits on a watch channel and receives the same result. Compute
//! errors propagate to all waiters and are never cached; a panicking compute
//! is converted to [`PolicyError::ComputePanic`] for every waiter and the
//! in-flight entry is removed either way, so nobody deadlocks on a failed
//! compile.
//!
//! Storage is deliberately simple: a bounded map with no eviction. Once the
//! map is full, computed policies are still returned but not inserted — the
//! expected workload is a small set of well-known policies, and bounded
//! growth is all that is required.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{watch, RwLock};

use crate::error::{PolicyError, Result};
use crate::model::Policy;

/// Lowercase hex SHA-256 of `text`. Also used for `PolicyInfo.hash`.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

type FlightResult = Result<Arc<Policy>>;
type FlightRx = watch::Receiver<Option<FlightResult>>;
type FlightTx = watch::Sender<Option<FlightResult>>;

struct CacheState {
    items: HashMap<String, Arc<Policy>>,
    in_flight: HashMap<String, FlightRx>,
}

/// Bounded in-memory cache of compiled policies.
pub struct PolicyCache {
    max: usize,
    // one lock covers both maps: hits take it for reading, everything else
    // re-checks under the write lock
    state: RwLock<CacheState>,
}

enum Slot {
    Ready(Arc<Policy>),
    Wait(FlightRx),
    Lead(FlightTx),
}

impl PolicyCache {
    /// Cache holding at most `max` policies.
    pub fn new(max: usize) -> Self {
        Self {
            max,
            state: RwLock::new(CacheState {
                items: HashMap::new(),
                in_flight: HashMap::new(),
            }),
        }
    }

    /// Number of cached policies.
    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Return the cached policy for `key_text`, or run `compute` to produce
    /// it. See the module docs for the single-flight and error semantics.
    pub async fn get_or_compute<F>(&self, key_text: &str, compute: F) -> FlightResult
    where
        F: FnOnce() -> Result<Policy>,
    {
        let key = sha256_hex(key_text);

        {
            let state = self.state.read().await;
            if let Some(policy) = state.items.get(&key) {
                tracing::debug!(%key, "policy cache hit");
                return Ok(policy.clone());
            }
        }

        let slot = {
            let mut state = self.state.write().await;
            if let Some(policy) = state.items.get(&key) {
                Slot::Ready(policy.clone())
            } else {
                // an in-flight entry whose sender vanished without
                // publishing is stale; take the lead instead of joining
                let live_flight = state
                    .in_flight
                    .get(&key)
                    .filter(|rx| !(rx.has_changed().is_err() && rx.borrow().is_none()))
                    .cloned();
                match live_flight {
                    Some(rx) => Slot::Wait(rx),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        state.in_flight.insert(key.clone(), rx);
                        Slot::Lead(tx)
                    }
                }
            }
        };

        match slot {
            Slot::Ready(policy) => Ok(policy),
            Slot::Wait(rx) => wait_for_flight(rx).await,
            Slot::Lead(tx) => {
                tracing::debug!(%key, "policy cache miss, compiling");
                let result = panic::catch_unwind(AssertUnwindSafe(compute))
                    .map_err(|payload| PolicyError::ComputePanic(panic_message(payload.as_ref())))
                    .and_then(|computed| computed)
                    .map(Arc::new);

                let mut state = self.state.write().await;
                state.in_flight.remove(&key);
                if let Ok(policy) = &result {
                    if state.items.len() < self.max {
                        state.items.insert(key, policy.clone());
                    }
                }
                drop(state);

                let _ = tx.send(Some(result.clone()));
                result
            }
        }
    }
}

async fn wait_for_flight(mut rx: FlightRx) -> FlightResult {
    loop {
        if let Some(result) = rx.borrow_and_update().clone() {
            return result;
        }
        if rx.changed().await.is_err() {
            // sender gone: use the final value if one was published
            return rx.borrow().clone().unwrap_or_else(|| {
                Err(PolicyError::ComputePanic(
                    "policy compile abandoned before completing".to_string(),
                ))
            });
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::START_NODE;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn leaf_policy() -> Policy {
        let mut policy = Policy::new();
        policy.ensure_node(START_NODE);
        policy
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_hit_returns_same_policy_pointer() {
        let cache = PolicyCache::new(16);
        let a = cache
            .get_or_compute("digraph {}", || Ok(leaf_policy()))
            .await
            .unwrap();
        let b = cache
            .get_or_compute("digraph {}", || {
                panic!("must not recompute a cached policy")
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_key_computes_once() {
        let cache = Arc::new(PolicyCache::new(16));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("same-key", move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(30));
                        Ok(leaf_policy())
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = PolicyCache::new(16);
        let calls = AtomicU32::new(0);

        let err = cache
            .get_or_compute("k", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PolicyError::Parse("boom".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, PolicyError::Parse("boom".to_string()));

        cache
            .get_or_compute("k", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(leaf_policy())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panic_surfaces_to_all_waiters_and_unblocks_key() {
        let cache = Arc::new(PolicyCache::new(16));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("panic-key", || {
                        std::thread::sleep(Duration::from_millis(10));
                        panic!("boom");
                    })
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err, PolicyError::ComputePanic("boom".to_string()));
        }

        // the key is usable again afterwards
        cache
            .get_or_compute("panic-key", || Ok(leaf_policy()))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_overflow_is_not_cached() {
        let cache = PolicyCache::new(1);
        let calls = AtomicU32::new(0);

        cache
            .get_or_compute("first", || Ok(leaf_policy()))
            .await
            .unwrap();

        for _ in 0..2 {
            cache
                .get_or_compute("second", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(leaf_policy())
                })
                .await
                .unwrap();
        }

        // "second" never fit, so both calls recomputed; "first" is still hot
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 1);
        cache
            .get_or_compute("first", || panic!("must stay cached"))
            .await
            .unwrap();
    }
}
