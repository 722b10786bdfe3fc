//! ctxcell Core - Scoped Single-Flight Store
//!
//! A key-value store owned by one scope (a request, or a long-lived
//! background process) whose values are written once, either directly or
//! lazily through a compute function that runs at most once per key.
//!
//! # Example
//!
//! ```
//! use ctxcell_core::{CtxError, RetryPolicy, Store};
//! use std::time::Duration;
//!
//! let store: Store<&str, u16> = Store::new(RetryPolicy::new(3, Duration::ZERO))?;
//!
//! let mut checks = 0;
//! let status = store.persist("db", || {
//!     checks += 1;
//!     if checks < 2 { Err("connection refused") } else { Ok(200) }
//! })?;
//!
//! assert_eq!(status, 200);
//! assert_eq!(store.get("db")?, Some(200));
//! # Ok::<(), CtxError>(())
//! ```

use uuid::Uuid;

pub mod error;
pub mod persist;
pub mod policy;
pub mod slot;
pub mod store;

pub use error::{ConfigError, CtxError, CtxResult, StoreError};
pub use policy::{RetryPolicy, ENV_MAX_ATTEMPT, ENV_RETRY_DELAY_MS};
pub use slot::{Slot, SlotState};
pub use store::Store;

/// Identifier of the scope owning a store, UUIDv7 so log lines sort by creation.
pub type ScopeId = Uuid;

/// Generate a new timestamp-sortable scope identifier.
pub fn new_scope_id() -> ScopeId {
    Uuid::now_v7()
}
