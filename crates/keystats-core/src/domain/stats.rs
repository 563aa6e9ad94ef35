//! The statistics engine.
//!
//! [`KeyStats`] aggregates accepted press/release edges into:
//!
//! - a total press count and a per-code count table (never decremented),
//! - the union set of codes currently held across all capture sources,
//! - a sliding window of recent press timestamps, from which an
//!   instantaneous rate and an exponentially smoothed rate are derived on
//!   every tick.
//!
//! The engine is a plain struct with no interior locking.  The overlay wraps
//! it in a mutex; every method here is short and allocation-light so that
//! critical section stays small.
//!
//! # Time
//!
//! Every time-dependent operation has an `_at` variant taking an explicit
//! [`Instant`].  Production code uses the wall-clock wrappers; tests drive
//! the `_at` variants to get deterministic windows.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::time::{Duration, Instant};

use super::input::KeyCode;

/// Trailing window over which presses count toward the instantaneous rate.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_millis(100);

/// Weight of the newest instantaneous rate in the smoothed rate.
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.5;

/// Tuning for the rate computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsConfig {
    /// Length of the sliding rate window.
    pub window: Duration,
    /// Exponential smoothing factor in `(0, 1]`.
    pub smoothing_alpha: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_RATE_WINDOW,
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
        }
    }
}

/// Immutable point-in-time copy of the engine state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub total_presses: u64,
    /// Presses per second over the last window, as of the last tick.
    pub instant_rate: u32,
    /// Smoothed presses per second, as of the last tick.
    pub smoothed_rate: u32,
    pub key_counts: BTreeMap<KeyCode, u64>,
    pub pressed: BTreeSet<KeyCode>,
}

/// Observer notified whenever the engine state changes or a tick runs.
///
/// Called while the engine is borrowed mutably (and, in the overlay, while
/// its mutex is held), so implementations must be cheap and non-blocking.
pub trait StatsListener: Send {
    fn stats_updated(&self, generation: u64);

    /// A detached listener is dropped after the next notification.
    fn is_detached(&self) -> bool {
        false
    }
}

/// Aggregates key edges into counts, pressed state, and rates.
pub struct KeyStats {
    config: StatsConfig,
    key_counts: BTreeMap<KeyCode, u64>,
    pressed: BTreeSet<KeyCode>,
    valid_codes: HashSet<KeyCode>,
    recent_presses: VecDeque<Instant>,
    total_presses: u64,
    instant_rate: u32,
    smoothed_rate: u32,
    generation: u64,
    listeners: Vec<Box<dyn StatsListener>>,
}

impl KeyStats {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            key_counts: BTreeMap::new(),
            pressed: BTreeSet::new(),
            valid_codes: HashSet::new(),
            recent_presses: VecDeque::with_capacity(64),
            total_presses: 0,
            instant_rate: 0,
            smoothed_rate: 0,
            generation: 0,
            listeners: Vec::new(),
        }
    }

    /// Registers an observer.  Observers survive [`reset`](Self::reset).
    pub fn add_listener(&mut self, listener: Box<dyn StatsListener>) {
        self.listeners.push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Monotonic counter bumped on every notification.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Restricts counting to `codes`.  An empty set accepts every code.
    pub fn set_valid_codes(&mut self, codes: impl IntoIterator<Item = KeyCode>) {
        self.valid_codes = codes.into_iter().collect();
    }

    fn accepts(&self, code: KeyCode) -> bool {
        self.valid_codes.is_empty() || self.valid_codes.contains(&code)
    }

    /// Records a press at the current time.  See [`record_press_at`](Self::record_press_at).
    pub fn record_press(&mut self, code: KeyCode) -> bool {
        self.record_press_at(code, Instant::now())
    }

    /// Records an accepted Down edge.
    ///
    /// Returns `false` when the allow-list rejects `code`; a rejected press
    /// leaves every counter, the pressed set, and the observers untouched.
    pub fn record_press_at(&mut self, code: KeyCode, now: Instant) -> bool {
        if !self.accepts(code) {
            return false;
        }

        self.pressed.insert(code);
        *self.key_counts.entry(code).or_insert(0) += 1;
        self.recent_presses.push_back(now);
        self.total_presses += 1;

        self.notify();
        true
    }

    /// Records an Up edge.  Only the pressed set changes; observers hear
    /// about it only if the code was actually held.
    pub fn record_release(&mut self, code: KeyCode) -> bool {
        let removed = self.pressed.remove(&code);
        if removed {
            self.notify();
        }
        removed
    }

    /// Runs one rate tick at the current time.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Evicts presses older than the window, recomputes both rates, and
    /// notifies observers even when nothing changed so the smoothed rate can
    /// decay to zero.
    pub fn tick_at(&mut self, now: Instant) {
        if let Some(window_start) = now.checked_sub(self.config.window) {
            while self
                .recent_presses
                .front()
                .is_some_and(|&t| t < window_start)
            {
                self.recent_presses.pop_front();
            }
        }

        self.instant_rate = self.window_rate();

        let alpha = self.config.smoothing_alpha;
        let smoothed =
            alpha * f64::from(self.instant_rate) + (1.0 - alpha) * f64::from(self.smoothed_rate);
        self.smoothed_rate = smoothed as u32;

        self.notify();
    }

    /// Presses per second implied by the current window contents.
    fn window_rate(&self) -> u32 {
        let window_ms = self.config.window.as_millis().max(1) as u64;
        let count = self.recent_presses.len() as u64;
        (count * 1000 / window_ms).min(u64::from(u32::MAX)) as u32
    }

    /// Zeroes all counters, the pressed set, the window, and both rates.
    pub fn reset(&mut self) {
        self.key_counts.clear();
        self.pressed.clear();
        self.recent_presses.clear();
        self.total_presses = 0;
        self.instant_rate = 0;
        self.smoothed_rate = 0;
        self.notify();
    }

    pub fn total_presses(&self) -> u64 {
        self.total_presses
    }

    pub fn smoothed_rate(&self) -> u32 {
        self.smoothed_rate
    }

    pub fn instant_rate(&self) -> u32 {
        self.instant_rate
    }

    pub fn count_for(&self, code: KeyCode) -> u64 {
        self.key_counts.get(&code).copied().unwrap_or(0)
    }

    pub fn is_pressed(&self, code: KeyCode) -> bool {
        self.pressed.contains(&code)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_presses: self.total_presses,
            instant_rate: self.instant_rate,
            smoothed_rate: self.smoothed_rate,
            key_counts: self.key_counts.clone(),
            pressed: self.pressed.clone(),
        }
    }

    fn notify(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        for listener in &self.listeners {
            listener.stats_updated(self.generation);
        }
        self.listeners.retain(|listener| !listener.is_detached());
    }
}

impl Default for KeyStats {
    fn default() -> Self {
        Self::new(StatsConfig::default())
    }
}

impl std::fmt::Debug for KeyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStats")
            .field("total_presses", &self.total_presses)
            .field("smoothed_rate", &self.smoothed_rate)
            .field("pressed", &self.pressed)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingListener(Arc<AtomicU64>);

    impl StatsListener for CountingListener {
        fn stats_updated(&self, _generation: u64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_press_then_release_counts_once_and_clears_pressed() {
        // Arrange
        let mut stats = KeyStats::default();

        // Act
        stats.record_press(65);
        stats.record_release(65);

        // Assert
        let snap = stats.snapshot();
        assert_eq!(snap.total_presses, 1);
        assert_eq!(snap.key_counts.get(&65), Some(&1));
        assert!(snap.pressed.is_empty());
    }

    #[test]
    fn test_release_never_touches_counts() {
        let mut stats = KeyStats::default();
        stats.record_press(10);
        stats.record_release(10);
        stats.record_release(10);
        assert_eq!(stats.count_for(10), 1);
        assert_eq!(stats.total_presses(), 1);
    }

    #[test]
    fn test_release_of_unpressed_code_is_noop() {
        // Arrange
        let mut stats = KeyStats::default();
        stats.record_press(1);
        let before = stats.snapshot();

        // Act
        let changed = stats.record_release(99);

        // Assert
        assert!(!changed);
        assert_eq!(stats.snapshot(), before);
    }

    #[test]
    fn test_release_notifies_only_when_held() {
        let hits = Arc::new(AtomicU64::new(0));
        let mut stats = KeyStats::default();
        stats.add_listener(Box::new(CountingListener(Arc::clone(&hits))));

        stats.record_release(65);
        stats.record_press(65);
        stats.record_release(65);

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_allow_list_rejects_unknown_codes_completely() {
        // Arrange
        let listener_hits = Arc::new(AtomicU64::new(0));
        let mut stats = KeyStats::default();
        stats.add_listener(Box::new(CountingListener(Arc::clone(&listener_hits))));
        stats.set_valid_codes([65, 66]);

        // Act
        let accepted = stats.record_press(90);

        // Assert
        assert!(!accepted);
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
        assert_eq!(listener_hits.load(Ordering::SeqCst), 0, "rejection must not notify");
    }

    #[test]
    fn test_allow_list_accepts_listed_codes() {
        let mut stats = KeyStats::default();
        stats.set_valid_codes([65]);
        assert!(stats.record_press(65));
        assert_eq!(stats.total_presses(), 1);
    }

    #[test]
    fn test_empty_allow_list_accepts_everything() {
        let mut stats = KeyStats::default();
        stats.set_valid_codes(Vec::new());
        assert!(stats.record_press(500));
        assert!(stats.is_pressed(500));
    }

    #[test]
    fn test_counts_accumulate_per_code() {
        let mut stats = KeyStats::default();
        for _ in 0..3 {
            stats.record_press(65);
            stats.record_release(65);
        }
        stats.record_press(66);
        assert_eq!(stats.count_for(65), 3);
        assert_eq!(stats.count_for(66), 1);
        assert_eq!(stats.total_presses(), 4);
    }

    #[test]
    fn test_tick_computes_instant_rate_from_window() {
        // Arrange
        let mut stats = KeyStats::default();
        let t0 = Instant::now();
        for code in 0..4 {
            stats.record_press_at(code, t0);
        }

        // Act
        stats.tick_at(t0 + ms(50));

        // Assert: 4 presses in a 100ms window = 40/s
        assert_eq!(stats.instant_rate(), 40);
        assert_eq!(stats.smoothed_rate(), 20);
    }

    #[test]
    fn test_tick_evicts_presses_older_than_window() {
        let mut stats = KeyStats::default();
        let t0 = Instant::now();
        stats.record_press_at(1, t0);
        stats.record_press_at(2, t0 + ms(150));

        stats.tick_at(t0 + ms(200));

        assert_eq!(stats.instant_rate(), 10, "only the press at +150ms is in the window");
    }

    #[test]
    fn test_press_exactly_at_window_start_is_kept() {
        let mut stats = KeyStats::default();
        let t0 = Instant::now();
        stats.record_press_at(1, t0);
        stats.tick_at(t0 + ms(100));
        assert_eq!(stats.instant_rate(), 10);
    }

    #[test]
    fn test_smoothed_rate_halves_each_idle_tick() {
        // Arrange: 8 presses → instant 80 → smoothed 40
        let mut stats = KeyStats::default();
        let t0 = Instant::now();
        for code in 0..8 {
            stats.record_press_at(code, t0);
        }
        stats.tick_at(t0);
        let initial = stats.smoothed_rate();
        assert_eq!(initial, 40);

        // Act / Assert
        for k in 1..=8 {
            stats.tick_at(t0 + ms(200 + k * 100));
            let expected = (f64::from(initial) * 0.5f64.powi(k as i32)) as u32;
            assert_eq!(stats.smoothed_rate(), expected, "after {k} idle ticks");
        }
        assert_eq!(stats.smoothed_rate(), 0);
    }

    struct DetachableListener(Arc<AtomicU64>);

    impl StatsListener for DetachableListener {
        fn stats_updated(&self, _generation: u64) {}

        fn is_detached(&self) -> bool {
            self.0.load(Ordering::SeqCst) > 0
        }
    }

    #[test]
    fn test_detached_listener_is_dropped_on_next_notification() {
        // Arrange
        let detached = Arc::new(AtomicU64::new(0));
        let hits = Arc::new(AtomicU64::new(0));
        let mut stats = KeyStats::default();
        stats.add_listener(Box::new(DetachableListener(Arc::clone(&detached))));
        stats.add_listener(Box::new(CountingListener(Arc::clone(&hits))));
        stats.tick();
        assert_eq!(stats.listener_count(), 2);

        // Act
        detached.store(1, Ordering::SeqCst);
        stats.tick();

        // Assert
        assert_eq!(stats.listener_count(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_tick_notifies_even_without_events() {
        let hits = Arc::new(AtomicU64::new(0));
        let mut stats = KeyStats::default();
        stats.add_listener(Box::new(CountingListener(Arc::clone(&hits))));

        stats.tick();
        stats.tick();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(stats.generation(), 2);
    }

    #[test]
    fn test_custom_window_scales_rate() {
        // A 200ms window holding 4 presses is 20 presses per second.
        let mut stats = KeyStats::new(StatsConfig {
            window: ms(200),
            smoothing_alpha: 1.0,
        });
        let t0 = Instant::now();
        for code in 0..4 {
            stats.record_press_at(code, t0);
        }
        stats.tick_at(t0 + ms(10));
        assert_eq!(stats.instant_rate(), 20);
        assert_eq!(stats.smoothed_rate(), 20);
    }

    #[test]
    fn test_reset_matches_fresh_engine() {
        // Arrange
        let mut stats = KeyStats::default();
        let t0 = Instant::now();
        stats.record_press_at(65, t0);
        stats.record_press_at(66, t0);
        stats.tick_at(t0);

        // Act
        stats.reset();

        // Assert
        assert_eq!(stats.snapshot(), KeyStats::default().snapshot());
        stats.tick_at(t0 + ms(1));
        assert_eq!(stats.instant_rate(), 0, "window must be emptied by reset");
    }

    #[test]
    fn test_reset_keeps_allow_list() {
        let mut stats = KeyStats::default();
        stats.set_valid_codes([65]);
        stats.reset();
        assert!(!stats.record_press(66));
    }
}
