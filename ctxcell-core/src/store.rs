//! Scoped key-value store.
//!
//! One mutex per store guards the slot map and the retry policy. The
//! critical sections cover map reads and writes only; computations run
//! outside the lock (see [`crate::persist`]).

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{ConfigError, CtxResult, StoreError};
use crate::policy::RetryPolicy;
use crate::slot::{Slot, SlotState};
use crate::{new_scope_id, ScopeId};

/// State behind the store mutex.
pub(crate) struct Inner<K, V> {
    /// `None` once the store has been cleared.
    slots: Option<HashMap<K, Slot<V>>>,
    pub(crate) policy: RetryPolicy,
}

impl<K, V> Inner<K, V> {
    pub(crate) fn slots(&self) -> Result<&HashMap<K, Slot<V>>, StoreError> {
        self.slots.as_ref().ok_or(StoreError::Cleared)
    }

    pub(crate) fn slots_mut(&mut self) -> Result<&mut HashMap<K, Slot<V>>, StoreError> {
        self.slots.as_mut().ok_or(StoreError::Cleared)
    }
}

/// Concurrency-safe key-value store owned by a single scope.
///
/// Values are written once: through [`set`](Store::set), or lazily through
/// [`persist`](Store::persist). Share a store down a call chain by reference
/// or `Arc`, never by cloning its contents.
pub struct Store<K, V> {
    scope_id: ScopeId,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> fmt::Debug for Store<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("scope_id", &self.scope_id)
            .finish_non_exhaustive()
    }
}

impl<K, V> Default for Store<K, V> {
    fn default() -> Self {
        Self::with_policy(RetryPolicy::default())
    }
}

impl<K, V> Store<K, V> {
    /// Create an empty store with the given retry policy.
    ///
    /// Fails with [`ConfigError`] if the policy does not validate.
    pub fn new(policy: RetryPolicy) -> Result<Self, ConfigError> {
        policy.validate()?;
        Ok(Self::with_policy(policy))
    }

    /// Skips validation; callers pass known-valid profiles.
    fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            scope_id: new_scope_id(),
            inner: Mutex::new(Inner {
                slots: Some(HashMap::new()),
                policy,
            }),
        }
    }

    /// Store for a single request: no retry.
    pub fn request_scoped() -> Self {
        Self::with_policy(RetryPolicy::request_scoped())
    }

    /// Store for a long-lived background scope: five attempts, two seconds apart.
    pub fn background() -> Self {
        Self::with_policy(RetryPolicy::background())
    }

    /// Store whose policy is read from the environment.
    pub fn from_env() -> Self {
        Self::with_policy(RetryPolicy::from_env())
    }

    /// Identifier used to correlate log lines for this store.
    pub fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Inner<K, V>>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Number of occupied slots, in flight or ready.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.slots()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Drop every slot. Any later access returns [`StoreError::Cleared`].
    ///
    /// Clearing an already cleared store does nothing.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(slots) = inner.slots.take() {
            tracing::debug!(scope_id = %self.scope_id, slots = slots.len(), "store cleared");
        }
        Ok(())
    }

    pub fn is_cleared(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.slots.is_none())
    }

    // === Settings ===

    /// Current retry policy.
    pub fn settings(&self) -> Result<RetryPolicy, StoreError> {
        let inner = self.lock()?;
        inner.slots()?;
        Ok(inner.policy)
    }

    /// Replace the retry policy.
    ///
    /// Persist calls that already claimed their key keep the policy they
    /// started with; later calls observe this one.
    pub fn set_settings(&self, policy: RetryPolicy) -> CtxResult<()> {
        policy.validate()?;
        let mut inner = self.lock()?;
        inner.slots()?;
        inner.policy = policy;
        Ok(())
    }

    /// Update the policy in place under the store lock.
    pub fn update_settings<F>(&self, update: F) -> CtxResult<RetryPolicy>
    where
        F: FnOnce(&mut RetryPolicy),
    {
        let mut inner = self.lock()?;
        inner.slots()?;
        let mut policy = inner.policy;
        update(&mut policy);
        policy.validate()?;
        inner.policy = policy;
        Ok(policy)
    }

    pub fn max_attempt(&self) -> Result<u32, StoreError> {
        Ok(self.settings()?.max_attempt)
    }

    pub fn set_max_attempt(&self, max_attempt: u32) -> CtxResult<()> {
        self.update_settings(|p| p.max_attempt = max_attempt)
            .map(|_| ())
    }

    pub fn retry_delay(&self) -> Result<Duration, StoreError> {
        Ok(self.settings()?.retry_delay)
    }

    pub fn set_retry_delay(&self, retry_delay: Duration) -> CtxResult<()> {
        self.update_settings(|p| p.retry_delay = retry_delay)
            .map(|_| ())
    }
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: Clone,
{
    /// Create a store pre-seeded with ready values.
    ///
    /// Fails with [`StoreError::Collision`] if `entries` repeats a key, and
    /// with [`ConfigError`] if the policy does not validate.
    pub fn with_entries<I>(policy: RetryPolicy, entries: I) -> CtxResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let store = Self::new(policy)?;
        {
            let mut inner = store.lock()?;
            let slots = inner.slots_mut()?;
            for (key, value) in entries {
                if slots.contains_key(&key) {
                    return Err(StoreError::collision(&key).into());
                }
                slots.insert(key, Slot::Ready(value));
            }
        }
        Ok(store)
    }

    /// Write a value for a key that has no slot yet.
    ///
    /// Never overwrites: an existing slot, ready or in flight, is a
    /// [`StoreError::Collision`] and leaves the stored value untouched.
    pub fn set(&self, key: K, value: V) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let slots = inner.slots_mut()?;
        if slots.contains_key(&key) {
            tracing::debug!(scope_id = %self.scope_id, key = ?key, "set collision");
            return Err(StoreError::collision(&key));
        }
        slots.insert(key, Slot::Ready(value));
        Ok(())
    }

    /// Read a ready value.
    ///
    /// Returns `Ok(None)` for an absent key and
    /// [`StoreError::ConcurrentAccess`] while a computation holds the key.
    pub fn get<Q>(&self, key: &Q) -> Result<Option<V>, StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        let inner = self.lock()?;
        match inner.slots()?.get(key) {
            Some(Slot::Ready(value)) => Ok(Some(value.clone())),
            Some(Slot::InFlight) => Err(StoreError::concurrent_access(&key)),
            None => Ok(None),
        }
    }

    /// Read a value that must be present.
    pub fn require<Q>(&self, key: &Q) -> Result<V, StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        self.get(key)?.ok_or_else(|| StoreError::not_found(&key))
    }

    /// Whether the key has a slot of any kind.
    pub fn contains<Q>(&self, key: &Q) -> Result<bool, StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        Ok(self.lock()?.slots()?.contains_key(key))
    }

    /// Snapshot of the key's slot state.
    pub fn state<Q>(&self, key: &Q) -> Result<SlotState, StoreError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        Ok(SlotState::of(self.lock()?.slots()?.get(key)))
    }
}
