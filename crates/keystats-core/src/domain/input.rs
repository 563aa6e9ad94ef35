//! Input edges and the per-source pressed-code bitmap.
//!
//! A capture hook sees every raw key/button transition the OS delivers,
//! including auto-repeat downs and ups for keys it never saw go down.  The
//! [`PressedSet`] turns that noisy stream into clean edges: a code can only go
//! down once before it goes up again.
//!
//! [`PressedSet`] is a fixed-size array of atomic words so that the OS hook
//! callback can test-and-set a code without allocating and without taking a
//! lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Logical key code.
///
/// Keyboard keys use the Windows virtual-key value; mouse buttons are mapped
/// into the same space (`0x01` left, `0x02` right, `0x04` middle, `0x05` X1,
/// `0x06` X2).
pub type KeyCode = u16;

/// Number of distinct codes a [`PressedSet`] can hold.
pub const PRESSED_SET_CAPACITY: usize = 1024;

const WORD_BITS: usize = 64;
const WORDS: usize = PRESSED_SET_CAPACITY / WORD_BITS;

/// Which physical device produced an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Keyboard,
    Mouse,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Keyboard => f.write_str("keyboard"),
            SourceKind::Mouse => f.write_str("mouse"),
        }
    }
}

/// Direction of a key or button transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Down,
    Up,
}

/// A deduplicated press or release of one physical actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub source: SourceKind,
    pub code: KeyCode,
    pub transition: Transition,
}

impl Edge {
    pub fn down(source: SourceKind, code: KeyCode) -> Self {
        Self { source, code, transition: Transition::Down }
    }

    pub fn up(source: SourceKind, code: KeyCode) -> Self {
        Self { source, code, transition: Transition::Up }
    }
}

/// One notch of wheel motion.
///
/// Wheel motion is not a key: it is never counted and never enters a
/// pressed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelDelta {
    /// `+1` away from the user (or right), `-1` toward the user (or left).
    pub magnitude: i32,
}

/// Everything a capture source can hand to the stats pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSignal {
    Edge(Edge),
    Wheel(WheelDelta),
}

/// Lock-free set of currently-held codes.
///
/// Each code is one bit.  `insert` and `remove` report whether they changed
/// the set, which is exactly the dedup rule: only a changing operation
/// produces an edge.
pub struct PressedSet {
    words: [AtomicU64; WORDS],
}

impl PressedSet {
    /// Creates an empty set.  `const` so a hook module can keep one in a
    /// `static`.
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: AtomicU64 = AtomicU64::new(0);
        Self { words: [EMPTY; WORDS] }
    }

    fn slot(code: KeyCode) -> Option<(usize, u64)> {
        let code = code as usize;
        if code >= PRESSED_SET_CAPACITY {
            return None;
        }
        Some((code / WORD_BITS, 1u64 << (code % WORD_BITS)))
    }

    /// Marks `code` as held.  Returns `true` only if it was not already held.
    ///
    /// Codes outside [`PRESSED_SET_CAPACITY`] are never stored and return
    /// `false`.
    pub fn insert(&self, code: KeyCode) -> bool {
        match Self::slot(code) {
            Some((word, mask)) => self.words[word].fetch_or(mask, Ordering::AcqRel) & mask == 0,
            None => false,
        }
    }

    /// Marks `code` as released.  Returns `true` only if it was held.
    pub fn remove(&self, code: KeyCode) -> bool {
        match Self::slot(code) {
            Some((word, mask)) => self.words[word].fetch_and(!mask, Ordering::AcqRel) & mask != 0,
            None => false,
        }
    }

    pub fn contains(&self, code: KeyCode) -> bool {
        match Self::slot(code) {
            Some((word, mask)) => self.words[word].load(Ordering::Acquire) & mask != 0,
            None => false,
        }
    }

    pub fn clear(&self) {
        for word in &self.words {
            word.store(0, Ordering::Release);
        }
    }

    pub fn len(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Acquire) == 0)
    }

    /// Returns the held codes in ascending order.
    pub fn codes(&self) -> Vec<KeyCode> {
        let mut out = Vec::new();
        for (index, word) in self.words.iter().enumerate() {
            let mut bits = word.load(Ordering::Acquire);
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                out.push((index * WORD_BITS + bit) as KeyCode);
                bits &= bits - 1;
            }
        }
        out
    }
}

impl Default for PressedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PressedSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.codes()).finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
