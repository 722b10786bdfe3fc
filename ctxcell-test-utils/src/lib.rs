//! ctxcell Test Utilities
//!
//! Centralized test infrastructure for the ctxcell workspace:
//! - Compute fixtures that fail, stall, or count their invocations
//! - Proptest generators for keys, values and retry policies
//! - Custom assertions for the store's error taxonomy
//! - Tracing subscriber setup for tests

// Re-export core types for convenience
pub use ctxcell_core::{
    ConfigError, CtxError, CtxResult, RetryPolicy, SlotState, Store, StoreError,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Error message produced by failing fixtures.
pub const BOOM: &str = "boom";

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG`, defaults to `warn`. Safe to call from every test.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// COMPUTE FIXTURES
// ============================================================================

pub mod fixtures {
    //! Compute functions with observable invocation counts.

    use super::*;

    /// Shared invocation counter, cloneable into threads and closures.
    #[derive(Debug, Clone, Default)]
    pub struct CallCounter(Arc<AtomicUsize>);

    impl CallCounter {
        pub fn new() -> Self {
            Self::default()
        }

        /// Record one call and return the 1-based call number.
        pub fn tick(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst) + 1
        }

        pub fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Compute that fails its first `failures` calls with [`BOOM`], then succeeds.
    #[derive(Debug, Clone)]
    pub struct FlakyCompute<V> {
        failures: usize,
        value: V,
        calls: CallCounter,
    }

    impl<V: Clone> FlakyCompute<V> {
        pub fn new(failures: usize, value: V) -> Self {
            Self {
                failures,
                value,
                calls: CallCounter::new(),
            }
        }

        /// Invoke once.
        pub fn call(&self) -> Result<V, String> {
            let n = self.calls.tick();
            if n <= self.failures {
                Err(format!("{} (call {})", BOOM, n))
            } else {
                Ok(self.value.clone())
            }
        }

        /// Borrow as a compute closure for `Store::persist`.
        pub fn as_fn(&self) -> impl FnMut() -> Result<V, String> + '_ {
            move || self.call()
        }

        pub fn calls(&self) -> usize {
            self.calls.get()
        }

        pub fn counter(&self) -> CallCounter {
            self.calls.clone()
        }
    }

    /// Compute that never succeeds.
    pub fn always_failing<V>(calls: CallCounter) -> impl FnMut() -> Result<V, String> + Send {
        move || {
            calls.tick();
            Err(BOOM.to_string())
        }
    }

    /// Compute that succeeds on every call.
    pub fn counting<V: Clone + Send>(
        value: V,
        calls: CallCounter,
    ) -> impl FnMut() -> Result<V, String> + Send {
        move || {
            calls.tick();
            Ok(value.clone())
        }
    }

    /// Compute that blocks the thread for `delay` before succeeding.
    pub fn slow<V: Clone + Send>(
        delay: Duration,
        value: V,
        calls: CallCounter,
    ) -> impl FnMut() -> Result<V, String> + Send {
        move || {
            calls.tick();
            std::thread::sleep(delay);
            Ok(value.clone())
        }
    }

    /// Retry policy with no delay, for fast retry tests.
    pub fn instant_policy(max_attempt: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempt, Duration::ZERO)
    }

    /// Request head for `GET uri`.
    pub fn request_parts(uri: &str) -> http::request::Parts {
        let (parts, ()) = http::Request::builder()
            .method(http::Method::GET)
            .uri(uri)
            .body(())
            .unwrap_or_else(|e| panic!("invalid fixture uri {}: {}", uri, e))
            .into_parts();
        parts
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for store keys, values and policies.

    use super::*;
    use proptest::prelude::*;

    /// Generate a short identifier-like key.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    /// Generate a stored value.
    pub fn arb_value() -> impl Strategy<Value = i64> {
        any::<i64>()
    }

    /// Generate a list of distinct keys.
    pub fn arb_distinct_keys(max: usize) -> impl Strategy<Value = Vec<String>> {
        prop::collection::hash_set(arb_key(), 1..=max.max(1)).prop_map(|set| set.into_iter().collect())
    }

    /// Generate a valid policy with zero delay (1..=8 attempts).
    pub fn arb_policy() -> impl Strategy<Value = RetryPolicy> {
        (1u32..=8).prop_map(|n| RetryPolicy::new(n, Duration::ZERO))
    }

    /// Generate any policy, valid or not.
    pub fn arb_any_policy() -> impl Strategy<Value = RetryPolicy> {
        (0u32..=8, 0u64..5_000)
            .prop_map(|(n, ms)| RetryPolicy::new(n, Duration::from_millis(ms)))
    }

    /// Generate a number of leading failures for a flaky compute.
    pub fn arb_failures(max: usize) -> impl Strategy<Value = usize> {
        0..=max
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the store's error taxonomy.

    use super::*;

    /// Assert that a write collided.
    #[track_caller]
    pub fn assert_collision<T: std::fmt::Debug>(result: &Result<T, StoreError>) {
        match result {
            Err(StoreError::Collision { .. }) => {}
            other => panic!("Expected Collision, got: {:?}", other),
        }
    }

    /// Assert that an access hit an in-flight slot.
    #[track_caller]
    pub fn assert_concurrent_access<T: std::fmt::Debug>(result: &Result<T, StoreError>) {
        match result {
            Err(StoreError::ConcurrentAccess { .. }) => {}
            other => panic!("Expected ConcurrentAccess, got: {:?}", other),
        }
    }

    /// Assert that a persist gave up after exactly `attempts` invocations.
    #[track_caller]
    pub fn assert_exhausted<T: std::fmt::Debug>(result: &Result<T, StoreError>, attempts: u32) {
        match result {
            Err(StoreError::ComputeExhausted { attempts: got, .. }) => {
                assert_eq!(*got, attempts, "Wrong attempt count in ComputeExhausted");
            }
            other => panic!("Expected ComputeExhausted after {} attempts, got: {:?}", attempts, other),
        }
    }

    /// Assert that a required value was missing.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &Result<T, StoreError>) {
        match result {
            Err(StoreError::NotFound { .. }) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    /// Assert the slot state of a key.
    #[track_caller]
    pub fn assert_state<K, V>(store: &Store<K, V>, key: &K, expected: SlotState)
    where
        K: Eq + std::hash::Hash + std::fmt::Debug,
        V: Clone,
    {
        let state = store
            .state(key)
            .unwrap_or_else(|e| panic!("state({:?}) failed: {}", key, e));
        assert_eq!(state, expected, "Unexpected slot state for {:?}", key);
    }
}

// ============================================================================
// TESTS
// ============================================================================
