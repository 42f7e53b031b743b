//! Active-duel gate.
//!
//! The game logs a start and an end line for every private duel, and
//! both can repeat. A [`DuelKey`] is the order-free identity of one
//! pairing; the board holds the set of currently live keys, so a start
//! only counts when the key is absent and an end only counts when it is
//! present.

use std::collections::HashSet;

/// Order-free identity of a duel between two normalized names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DuelKey {
    low: String,
    high: String,
}

impl DuelKey {
    pub fn new(a: &str, b: &str) -> DuelKey {
        if a <= b {
            DuelKey {
                low: a.to_string(),
                high: b.to_string(),
            }
        } else {
            DuelKey {
                low: b.to_string(),
                high: a.to_string(),
            }
        }
    }

    pub fn contains(&self, clean: &str) -> bool {
        self.low == clean || self.high == clean
    }
}

#[derive(Default)]
pub struct DuelBoard {
    active: HashSet<DuelKey>,
}

impl DuelBoard {
    pub fn new() -> DuelBoard {
        DuelBoard::default()
    }

    /// Marks the key live. Returns false when it already was, meaning
    /// the start line is a duplicate and must be ignored.
    pub fn try_activate(&mut self, key: DuelKey) -> bool {
        self.active.insert(key)
    }

    /// Clears the key. Returns false when it was not live, meaning the
    /// end line is a duplicate or orphaned and must be ignored.
    pub fn try_release(&mut self, key: &DuelKey) -> bool {
        self.active.remove(key)
    }

    pub fn is_active(&self, key: &DuelKey) -> bool {
        self.active.contains(key)
    }

    /// Drops every key involving the given player (disconnect, reset).
    pub fn release_all_for(&mut self, clean: &str) {
        self.active.retain(|key| !key.contains(clean));
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}
