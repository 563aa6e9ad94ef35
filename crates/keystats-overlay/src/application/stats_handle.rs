//! Shared handle to the statistics engine.
//!
//! The engine is mutated by the edge pump and the rate ticker and read by
//! every HTTP handler.  A `std::sync::Mutex` is enough: each critical section
//! is a single counter update or a snapshot copy, and no `.await` ever happens
//! while the lock is held.
//!
//! A poisoned lock is recovered rather than propagated.  The engine has no
//! multi-step invariants that a panicking writer could leave half-applied.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use keystats_core::{KeyCode, KeyStats, StatsConfig, StatsListener, StatsSnapshot};

/// Cloneable, thread-safe handle to one [`KeyStats`] engine.
#[derive(Clone, Default)]
pub struct StatsHandle {
    inner: Arc<Mutex<KeyStats>>,
}

impl StatsHandle {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(KeyStats::new(config))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, KeyStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().snapshot()
    }

    pub fn record_press(&self, code: KeyCode) -> bool {
        self.lock().record_press(code)
    }

    pub fn record_release(&self, code: KeyCode) -> bool {
        self.lock().record_release(code)
    }

    pub fn tick(&self) {
        self.lock().tick();
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn set_valid_codes(&self, codes: impl IntoIterator<Item = KeyCode>) {
        self.lock().set_valid_codes(codes);
    }

    pub fn add_listener(&self, listener: Box<dyn StatsListener>) {
        self.lock().add_listener(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listener_count()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation()
    }

    pub fn smoothed_rate(&self) -> u32 {
        self.lock().smoothed_rate()
    }
}

impl std::fmt::Debug for StatsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StatsHandle").field(&*self.lock()).finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
