//! Per-key storage cell.
//!
//! A key moves through three states and never backwards:
//!
//! ```text
//! (absent) ─── claim ──→ InFlight ─── complete ──→ Ready(value)
//!     │                                                 ↑
//!     └──────────────────── set ────────────────────────┘
//! ```
//!
//! The absent state is the key missing from the store's map, so a `Slot`
//! in hand is always either claimed or resolved. The lock marker is a
//! distinct variant and can never be returned as a value.

use serde::{Deserialize, Serialize};

/// Occupied slot for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<V> {
    /// Exactly one caller has claimed the computation and has not finished.
    InFlight,
    /// Computation finished; the value is immutable from here on.
    Ready(V),
}

impl<V> Slot<V> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Slot::Ready(_))
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Slot::InFlight)
    }

    /// Resolved value, if any.
    pub fn value(&self) -> Option<&V> {
        match self {
            Slot::Ready(v) => Some(v),
            Slot::InFlight => None,
        }
    }

    pub fn state(&self) -> SlotState {
        match self {
            Slot::InFlight => SlotState::InFlight,
            Slot::Ready(_) => SlotState::Ready,
        }
    }
}

/// Value-free snapshot of a key's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    Empty,
    InFlight,
    Ready,
}

impl SlotState {
    pub(crate) fn of<V>(slot: Option<&Slot<V>>) -> Self {
        slot.map_or(SlotState::Empty, Slot::state)
    }
}
