//! Single-flight persist.
//!
//! A persist call claims the key under the store lock by writing
//! [`Slot::InFlight`], releases the lock, then runs the compute function
//! with bounded retry. Only the winning claim ever writes the final value.
//!
//! There is no wait queue: a second caller that finds the key in flight
//! gets [`StoreError::ConcurrentAccess`] immediately. When the retry budget
//! runs out the slot stays in flight, so the key is dead for the rest of
//! the store's lifetime.

use std::fmt;
use std::future::Future;
use std::hash::Hash;

use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::policy::RetryPolicy;
use crate::slot::Slot;
use crate::store::Store;

/// Outcome of the claim step.
enum Claim<V> {
    /// The key was already resolved.
    Hit(V),
    /// This caller owns the computation, under the policy in force at claim time.
    Claimed(RetryPolicy),
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    fn claim(&self, key: &K) -> Result<Claim<V>, StoreError> {
        let mut inner = self.lock()?;
        let policy = inner.policy;
        let slots = inner.slots_mut()?;
        match slots.get(key) {
            Some(Slot::Ready(value)) => {
                debug!(scope_id = %self.scope_id(), key = ?key, "persist hit");
                Ok(Claim::Hit(value.clone()))
            }
            Some(Slot::InFlight) => {
                debug!(scope_id = %self.scope_id(), key = ?key, "persist contended");
                Err(StoreError::concurrent_access(key))
            }
            None => {
                slots.insert(key.clone(), Slot::InFlight);
                debug!(scope_id = %self.scope_id(), key = ?key, "persist claimed");
                Ok(Claim::Claimed(policy))
            }
        }
    }

    fn complete(&self, key: K, value: V) -> Result<V, StoreError> {
        let mut inner = self.lock()?;
        let slots = inner.slots_mut()?;
        debug!(scope_id = %self.scope_id(), key = ?key, "persist resolved");
        slots.insert(key, Slot::Ready(value.clone()));
        Ok(value)
    }

    /// Record a failed attempt. Returns an error once the budget is spent.
    fn record_failure<E: fmt::Display>(
        &self,
        key: &K,
        attempt: u32,
        policy: &RetryPolicy,
        err: E,
    ) -> Result<(), StoreError> {
        if attempt >= policy.max_attempt {
            error!(
                scope_id = %self.scope_id(),
                key = ?key,
                attempts = attempt,
                error = %err,
                "compute exhausted, key stays claimed"
            );
            return Err(StoreError::ComputeExhausted {
                key: format!("{:?}", key),
                attempts: attempt,
                last_error: err.to_string(),
            });
        }
        warn!(
            scope_id = %self.scope_id(),
            key = ?key,
            attempt,
            max_attempt = policy.max_attempt,
            error = %err,
            "compute failed, retrying"
        );
        Ok(())
    }

    /// Return the value for `key`, computing it on a miss.
    ///
    /// `compute` only runs when the key has no slot, and is retried up to the
    /// store's `max_attempt` with `retry_delay` between attempts (the thread
    /// sleeps). Any `Err` counts as a failed attempt.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConcurrentAccess`] if another caller holds the key
    /// - [`StoreError::ComputeExhausted`] if every attempt failed
    /// - [`StoreError::Cleared`] if the store was cleared
    pub fn persist<F, E>(&self, key: K, mut compute: F) -> Result<V, StoreError>
    where
        F: FnMut() -> Result<V, E>,
        E: fmt::Display,
    {
        let policy = match self.claim(&key)? {
            Claim::Hit(value) => return Ok(value),
            Claim::Claimed(policy) => policy,
        };

        let mut attempt = 0;
        loop {
            match compute() {
                Ok(value) => return self.complete(key, value),
                Err(err) => {
                    attempt += 1;
                    self.record_failure(&key, attempt, &policy, err)?;
                    if !policy.retry_delay.is_zero() {
                        std::thread::sleep(policy.retry_delay);
                    }
                }
            }
        }
    }

    /// Async form of [`persist`](Self::persist).
    ///
    /// The store lock is never held across an `.await`; the delay between
    /// attempts uses `tokio::time::sleep`.
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future after the claim (a timeout, a
    /// disconnected client) leaves the key in flight for the rest of the
    /// store's lifetime. Later calls for it get
    /// [`StoreError::ConcurrentAccess`]; no `ComputeExhausted` is reported.
    pub async fn persist_async<F, Fut, E>(&self, key: K, mut compute: F) -> Result<V, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: fmt::Display,
    {
        let policy = match self.claim(&key)? {
            Claim::Hit(value) => return Ok(value),
            Claim::Claimed(policy) => policy,
        };

        let mut attempt = 0;
        loop {
            match compute().await {
                Ok(value) => return self.complete(key, value),
                Err(err) => {
                    attempt += 1;
                    self.record_failure(&key, attempt, &policy, err)?;
                    if !policy.retry_delay.is_zero() {
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SlotState;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_persist_miss_then_hit() {
        let store: Store<&str, String> = Store::request_scoped();
        let calls = Cell::new(0);

        let value = store
            .persist("x", || {
                calls.set(calls.get() + 1);
                Ok::<_, String>("valid".to_string())
            })
            .unwrap();
        assert_eq!(value, "valid");

        let again = store
            .persist("x", || {
                calls.set(calls.get() + 1);
                Ok::<_, String>("other".to_string())
            })
            .unwrap();
        assert_eq!(again, "valid");
        assert_eq!(calls.get(), 1);
        assert_eq!(store.get("x").unwrap(), Some("valid".to_string()));
    }

    #[test]
    fn test_persist_uses_existing_set_value() {
        let store: Store<&str, &str> = Store::request_scoped();
        store.set("test", "get").unwrap();

        let value = store.persist("test", || Ok::<_, String>("set")).unwrap();
        assert_eq!(value, "get");
    }

    #[test]
    fn test_retry_then_succeed() {
        let store: Store<&str, &str> = Store::new(RetryPolicy::new(3, Duration::ZERO)).unwrap();
        let calls = Cell::new(0);

        let value = store
            .persist("x", || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err("boom")
                } else {
                    Ok("ok")
                }
            })
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.get(), 3);
        assert_eq!(store.get("x").unwrap(), Some("ok"));
    }

    #[test]
    fn test_exhaustion_leaves_slot_in_flight() {
        let store: Store<&str, &str> = Store::new(RetryPolicy::new(2, Duration::ZERO)).unwrap();
        let calls = Cell::new(0);

        let err = store
            .persist("x", || {
                calls.set(calls.get() + 1);
                Err::<&str, _>("boom")
            })
            .unwrap_err();

        assert_eq!(
            err,
            StoreError::ComputeExhausted {
                key: "\"x\"".to_string(),
                attempts: 2,
                last_error: "boom".to_string(),
            }
        );
        assert_eq!(calls.get(), 2);
        assert_eq!(store.state("x").unwrap(), SlotState::InFlight);

        // the dead key now reads as contended, and compute is not re-run
        let err = store.persist("x", || Ok::<_, &str>("late")).unwrap_err();
        assert!(matches!(err, StoreError::ConcurrentAccess { .. }));
        assert!(matches!(
            store.get("x").unwrap_err(),
            StoreError::ConcurrentAccess { .. }
        ));
    }

    #[test]
    fn test_request_scoped_does_not_retry() {
        let store: Store<&str, &str> = Store::request_scoped();
        let calls = Cell::new(0);

        let err = store
            .persist("x", || {
                calls.set(calls.get() + 1);
                Err::<&str, _>("boom")
            })
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_policy_change_applies_to_later_claims() {
        let store: Store<&str, &str> = Store::request_scoped();
        store.set_max_attempt(2).unwrap();
        let calls = Cell::new(0);

        let value = store
            .persist("x", || {
                calls.set(calls.get() + 1);
                if calls.get() == 1 {
                    Err("transient")
                } else {
                    Ok("ok")
                }
            })
            .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_in_flight_claim_keeps_its_policy() {
        let store: Arc<Store<&str, &str>> = Arc::new(
            Store::new(RetryPolicy::new(2, Duration::from_millis(50))).unwrap(),
        );
        let calls = Arc::new(AtomicUsize::new(0));

        let worker = {
            let store = Arc::clone(&store);
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                store.persist("x", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<&str, _>("down")
                })
            })
        };

        thread::sleep(Duration::from_millis(10));
        store.set_max_attempt(10).unwrap();

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, StoreError::ComputeExhausted { attempts: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_contended_persist_fails_fast() {
        let store: Arc<Store<&str, &str>> = Arc::new(Store::request_scoped());
        let slow_calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let store = Arc::clone(&store);
            let slow_calls = Arc::clone(&slow_calls);
            thread::spawn(move || {
                store.persist("y", || {
                    slow_calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(100));
                    Ok::<_, String>("from-a")
                })
            })
        };

        thread::sleep(Duration::from_millis(10));
        let other_calls = AtomicUsize::new(0);
        let err = store
            .persist("y", || {
                other_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("from-b")
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::ConcurrentAccess { .. }));
        assert_eq!(other_calls.load(Ordering::SeqCst), 0);

        assert_eq!(first.join().unwrap().unwrap(), "from-a");
        assert_eq!(slow_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get("y").unwrap(), Some("from-a"));
    }

    #[test]
    fn test_distinct_keys_compute_in_parallel() {
        let store: Arc<Store<usize, usize>> = Arc::new(Store::request_scoped());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.persist(i, || {
                        thread::sleep(Duration::from_millis(20));
                        Ok::<_, String>(i * 10)
                    })
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap().unwrap(), i * 10);
        }
        assert_eq!(store.len().unwrap(), 4);
    }

    #[test]
    fn test_persist_after_clear() {
        let store: Store<&str, &str> = Store::request_scoped();
        store.clear().unwrap();
        let err = store.persist("x", || Ok::<_, String>("v")).unwrap_err();
        assert_eq!(err, StoreError::Cleared);
    }

    #[test]
    fn test_clear_during_compute_discards_value() {
        let store: Arc<Store<&str, &str>> = Arc::new(Store::request_scoped());

        let worker = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store.persist("slow", || {
                    thread::sleep(Duration::from_millis(50));
                    Ok::<_, String>("late")
                })
            })
        };

        thread::sleep(Duration::from_millis(10));
        store.clear().unwrap();

        assert_eq!(worker.join().unwrap().unwrap_err(), StoreError::Cleared);
        assert!(store.is_cleared().unwrap());
    }

    #[tokio::test]
    async fn test_dropped_persist_async_leaves_key_in_flight() {
        let store: Store<&str, u32> = Store::request_scoped();

        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            store.persist_async("k", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(1)
            }),
        )
        .await;
        assert!(timed_out.is_err());

        assert_eq!(store.state("k").unwrap(), SlotState::InFlight);
        let err = store.persist("k", || Ok::<_, String>(2)).unwrap_err();
        assert!(matches!(err, StoreError::ConcurrentAccess { .. }));
    }

    #[tokio::test]
    async fn test_persist_async_retries_with_tokio_sleep() {
        let store: Store<&str, u32> = Store::new(RetryPolicy::new(3, Duration::from_millis(1))).unwrap();
        let calls = AtomicUsize::new(0);

        let value = store
            .persist_async("health", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 2 {
                        Err(format!("attempt {} refused", n))
                    } else {
                        Ok(200)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.get("health").unwrap(), Some(200));
    }

    #[tokio::test]
    async fn test_persist_async_exhaustion() {
        let store: Store<&str, u32> = Store::new(RetryPolicy::new(2, Duration::ZERO)).unwrap();
        let err = store
            .persist_async("health", || async { Err::<u32, _>("unreachable") })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ComputeExhausted { attempts: 2, .. }));
        assert_eq!(store.state("health").unwrap(), SlotState::InFlight);
    }
}
