//! Nesting flags for advice that does not capture nested invocations
//!
//! Woven code calls two static methods on a small runtime class:
//!
//! * `static int enter(int slot)` sets the calling thread's flag for `slot`
//!   and returns its previous value (0 or 1)
//! * `static void exit(int slot, int prior)` restores the flag to `prior`
//!
//! The weaver hands out one slot per (loader, declaring class, advice).
//! [`enter`] and [`exit`] implement the same contract in Rust for the
//! simulator.

use crate::types::LoaderId;
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default runtime class holding the flags
pub const DEFAULT_RUNTIME_CLASS: &str = "weft.runtime.NestingFlags";

/// Name of the flag-setting method
pub const ENTER_METHOD: &str = "enter";
/// Descriptor of the flag-setting method
pub const ENTER_DESCRIPTOR: &str = "(I)I";
/// Name of the flag-restoring method
pub const EXIT_METHOD: &str = "exit";
/// Descriptor of the flag-restoring method
pub const EXIT_DESCRIPTOR: &str = "(II)V";

type SlotKey = (Option<LoaderId>, String, usize);

/// Allocates nesting slot ids
#[derive(Debug, Default)]
pub struct NestingRegistry {
    slots: DashMap<SlotKey, u32>,
    next: AtomicU32,
}

impl NestingRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `advice_id` woven into `class_name` under `loader`
    ///
    /// Ids are never reused, even after eviction.
    pub fn slot(&self, loader: Option<LoaderId>, class_name: &str, advice_id: usize) -> u32 {
        *self
            .slots
            .entry((loader, class_name.to_string(), advice_id))
            .or_insert_with(|| self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Forget the slots of classes defined by `loader`
    pub fn evict_loader(&self, loader: LoaderId) {
        self.slots.retain(|key, _| key.0 != Some(loader));
    }

    /// Number of allocated slots still tracked
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is tracked
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

thread_local! {
    static FLAGS: RefCell<FxHashMap<u32, bool>> = RefCell::new(FxHashMap::default());
}

/// Set the current thread's flag for `slot`, returning the prior value
pub fn enter(slot: u32) -> i32 {
    FLAGS.with(|flags| {
        let prior = flags.borrow_mut().insert(slot, true).unwrap_or(false);
        prior as i32
    })
}

/// Restore the current thread's flag for `slot`
pub fn exit(slot: u32, prior: i32) {
    FLAGS.with(|flags| {
        let mut flags = flags.borrow_mut();
        if prior == 0 {
            flags.remove(&slot);
        } else {
            flags.insert(slot, true);
        }
    })
}

/// Whether the current thread is inside `slot`
pub fn is_nested(slot: u32) -> bool {
    FLAGS.with(|flags| flags.borrow().get(&slot).copied().unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_stable_and_distinct() {
        let registry = NestingRegistry::new();
        let a = registry.slot(Some(LoaderId(1)), "demo.A", 0);
        let b = registry.slot(Some(LoaderId(1)), "demo.A", 1);
        let c = registry.slot(Some(LoaderId(2)), "demo.A", 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.slot(Some(LoaderId(1)), "demo.A", 0), a);

        registry.evict_loader(LoaderId(1));
        assert_eq!(registry.len(), 1);
        assert_ne!(registry.slot(Some(LoaderId(1)), "demo.A", 0), a);
    }

    #[test]
    fn test_enter_exit_nesting() {
        let slot = 900;
        assert_eq!(enter(slot), 0);
        assert_eq!(enter(slot), 1);
        exit(slot, 1);
        assert!(is_nested(slot));
        exit(slot, 0);
        assert!(!is_nested(slot));
    }

    #[test]
    fn test_flags_are_thread_local() {
        let slot = 901;
        enter(slot);
        let other = std::thread::spawn(move || enter(slot)).join().unwrap();
        assert_eq!(other, 0);
        exit(slot, 0);
    }
}
