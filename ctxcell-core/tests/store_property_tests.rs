//! Property-Based Tests for the Single-Flight Store
//!
//! Properties:
//! - A second write to any key collides and keeps the first value
//! - A successful persist is memoized: later reads never re-run compute
//! - With N attempts allowed and F < N leading failures, persist succeeds after F + 1 calls
//! - With F >= N failures, persist gives up after exactly N calls and the key stays in flight
//! - Reads never change store state

use ctxcell_test_utils::assertions::*;
use ctxcell_test_utils::fixtures::*;
use ctxcell_test_utils::generators::*;
use ctxcell_test_utils::{SlotState, Store};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_second_set_collides(key in arb_key(), first in arb_value(), second in arb_value()) {
        let store: Store<String, i64> = Store::request_scoped();
        store.set(key.clone(), first).unwrap();

        let result = store.set(key.clone(), second);
        assert_collision(&result);
        prop_assert_eq!(store.get(key.as_str()).unwrap(), Some(first));
    }

    #[test]
    fn prop_persist_is_memoized(key in arb_key(), value in arb_value(), reads in 1usize..8) {
        let store: Store<String, i64> = Store::request_scoped();
        let calls = CallCounter::new();

        prop_assert_eq!(store.persist(key.clone(), counting(value, calls.clone())).unwrap(), value);
        for _ in 0..reads {
            prop_assert_eq!(store.persist(key.clone(), counting(value + 1, calls.clone())).unwrap(), value);
            prop_assert_eq!(store.get(key.as_str()).unwrap(), Some(value));
        }
        prop_assert_eq!(calls.get(), 1);
    }

    #[test]
    fn prop_bounded_retry(policy in arb_policy(), failures in arb_failures(10), value in arb_value()) {
        let store: Store<&str, i64> = Store::new(policy).unwrap();
        let flaky = FlakyCompute::new(failures, value);

        let result = store.persist("x", flaky.as_fn());
        let max = policy.max_attempt as usize;

        if failures < max {
            prop_assert_eq!(result.unwrap(), value);
            prop_assert_eq!(flaky.calls(), failures + 1);
            assert_state(&store, &"x", SlotState::Ready);
        } else {
            assert_exhausted(&result, policy.max_attempt);
            prop_assert_eq!(flaky.calls(), max);
            assert_state(&store, &"x", SlotState::InFlight);
            assert_concurrent_access(&store.get("x"));
        }
    }

    #[test]
    fn prop_reads_do_not_mutate(keys in arb_distinct_keys(8), lookup in arb_key()) {
        let store: Store<String, usize> = Store::request_scoped();
        for (i, key) in keys.iter().enumerate() {
            store.set(key.clone(), i).unwrap();
        }
        let before = store.len().unwrap();

        let expected = keys.iter().position(|k| *k == lookup);
        prop_assert_eq!(store.get(lookup.as_str()).unwrap(), expected);
        prop_assert_eq!(store.get(lookup.as_str()).unwrap(), expected);
        prop_assert_eq!(store.contains(lookup.as_str()).unwrap(), expected.is_some());
        prop_assert_eq!(store.len().unwrap(), before);
    }

    #[test]
    fn prop_seeded_keys_are_ready(keys in arb_distinct_keys(8)) {
        let entries: Vec<(String, usize)> = keys.iter().cloned().zip(0..).collect();
        let store = Store::with_entries(instant_policy(1), entries).unwrap();
        for (i, key) in keys.iter().enumerate() {
            prop_assert_eq!(store.require(key.as_str()).unwrap(), i);
            assert_collision(&store.set(key.clone(), 0));
        }
    }
}
