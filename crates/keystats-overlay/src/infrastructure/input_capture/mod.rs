//! Global input capture.
//!
//! On Windows, each source installs one low-level hook (`WH_KEYBOARD_LL` or
//! `WH_MOUSE_LL`) on its own Win32 message-loop thread.  Raw transitions are
//! deduplicated against the source's [`PressedSet`] inside the hook callback
//! and the surviving edges are pushed into a bounded channel consumed by the
//! Tokio runtime.
//!
//! # Callback budget
//!
//! Windows silently removes a low-level hook whose callback is slow.  The
//! callback therefore only does a bit test-and-set and a non-blocking
//! `try_send`.  When the channel is full the edge is dropped and counted
//! rather than waiting for the consumer.
//!
//! # Testability
//!
//! The [`InputSource`] trait allows tests to inject synthetic events through
//! [`mock::MockInputSource`] without installing OS hooks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use keystats_core::{Edge, InputSignal, KeyCode, PressedSet, SourceKind, WheelDelta};

pub mod mock;

#[cfg(target_os = "windows")]
pub mod windows;

/// Default capacity of the hook → pump channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Direction reported by the OS for one raw transition, before dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawAction {
    Down,
    Up,
}

/// Physical mouse buttons that count as keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    X1,
    X2,
}

/// Maps a mouse button into the keyboard code space (Windows `VK_*BUTTON`
/// values).
pub fn mouse_button_code(button: MouseButton) -> KeyCode {
    match button {
        MouseButton::Left => 0x01,
        MouseButton::Right => 0x02,
        MouseButton::Middle => 0x04,
        MouseButton::X1 => 0x05,
        MouseButton::X2 => 0x06,
    }
}

/// Reduces a raw wheel delta (multiples of 120 on Windows) to one notch in
/// its direction.  Zero yields nothing.
pub fn normalize_wheel(raw: i32) -> Option<WheelDelta> {
    match raw.signum() {
        0 => None,
        magnitude => Some(WheelDelta { magnitude }),
    }
}

/// Error type for input capture operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The OS refused the hook.  `code` is the platform error code.
    #[error("failed to install {kind} hook (platform error {code})")]
    HookInstallFailed { kind: SourceKind, code: i32 },

    /// Another source already owns the process-wide hook slot for this kind.
    #[error("a {0} hook is already registered in this process")]
    SlotTaken(SourceKind),

    #[error("failed to spawn {kind} hook thread: {source}")]
    ThreadSpawn {
        kind: SourceKind,
        #[source]
        source: std::io::Error,
    },

    /// The hook thread ended before reporting whether installation worked.
    #[error("{0} hook thread exited during startup")]
    HookThreadExited(SourceKind),

    #[error("platform not supported: {0}")]
    UnsupportedPlatform(String),
}

/// Trait abstracting a global input source.
///
/// The production implementation uses Windows hooks; tests use
/// [`mock::MockInputSource`].  Each source is built with the
/// [`SignalSender`] it delivers into.
pub trait InputSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Installs the hook.  Calling it on a running source succeeds without
    /// reinstalling.
    fn start(&self) -> Result<(), CaptureError>;

    /// Uninstalls the hook and forgets every held code.  Safe to call
    /// repeatedly.
    fn stop(&self);

    fn is_running(&self) -> bool;
}

// ── Dedup ─────────────────────────────────────────────────────────────────────

/// Turns raw OS transitions for one source into clean edges.
#[derive(Debug)]
pub struct EdgeFilter {
    kind: SourceKind,
    pressed: PressedSet,
}

impl EdgeFilter {
    pub const fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            pressed: PressedSet::new(),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Down on a free code and Up on a held code produce an edge; anything
    /// else (auto-repeat, stray release) produces nothing.
    pub fn classify(&self, code: KeyCode, action: RawAction) -> Option<Edge> {
        match action {
            RawAction::Down => self.pressed.insert(code).then(|| Edge::down(self.kind, code)),
            RawAction::Up => self.pressed.remove(code).then(|| Edge::up(self.kind, code)),
        }
    }

    pub fn is_pressed(&self, code: KeyCode) -> bool {
        self.pressed.contains(code)
    }

    pub fn clear(&self) {
        self.pressed.clear();
    }
}

// ── Hand-off channel ──────────────────────────────────────────────────────────

/// Non-blocking producer side of the capture channel.
///
/// Safe to call from an OS callback: `push` never waits.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<InputSignal>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl SignalSender {
    /// Queues `signal`.  Returns `false` if it was dropped.
    pub fn push(&self, signal: InputSignal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.closed.store(true, Ordering::Relaxed);
                false
            }
        }
    }

    /// Number of signals dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// A push found the consumer gone.  Left for the owner to report, since
    /// `push` runs on hook threads that must not log.
    pub fn saw_closed_channel(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

/// Creates the bounded channel between capture sources and the edge pump.
pub fn capture_channel(capacity: usize) -> (SignalSender, mpsc::Receiver<InputSignal>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = SignalSender {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
        closed: Arc::new(AtomicBool::new(false)),
    };
    (sender, rx)
}

// ── Platform selection ────────────────────────────────────────────────────────

/// Builds the native source for `kind` on this platform.
///
/// On platforms without a hook backend the returned source fails to start
/// with [`CaptureError::UnsupportedPlatform`], which leaves the overlay
/// running without capture.
pub fn platform_source(kind: SourceKind, sender: SignalSender) -> Arc<dyn InputSource> {
    #[cfg(target_os = "windows")]
    {
        Arc::new(windows::WindowsHookSource::new(kind, sender))
    }

    #[cfg(not(target_os = "windows"))]
    {
        drop(sender);
        Arc::new(UnsupportedSource { kind })
    }
}

/// Placeholder source for platforms without a global hook backend.
#[cfg(not(target_os = "windows"))]
struct UnsupportedSource {
    kind: SourceKind,
}

#[cfg(not(target_os = "windows"))]
impl InputSource for UnsupportedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn start(&self) -> Result<(), CaptureError> {
        Err(CaptureError::UnsupportedPlatform(std::env::consts::OS.to_string()))
    }

    fn stop(&self) {}

    fn is_running(&self) -> bool {
        false
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use keystats_core::Transition;

    #[test]
    fn test_filter_emits_down_once_until_released() {
        // Arrange
        let filter = EdgeFilter::new(SourceKind::Keyboard);

        // Act
        let first = filter.classify(65, RawAction::Down);
        let repeat = filter.classify(65, RawAction::Down);
        let up = filter.classify(65, RawAction::Up);

        // Assert
        assert_eq!(first, Some(Edge::down(SourceKind::Keyboard, 65)));
        assert_eq!(repeat, None, "auto-repeat must be suppressed");
        assert_eq!(up.map(|e| e.transition), Some(Transition::Up));
    }

    #[test]
    fn test_filter_ignores_stray_release() {
        let filter = EdgeFilter::new(SourceKind::Mouse);
        assert_eq!(filter.classify(0x01, RawAction::Up), None);
    }

    #[test]
    fn test_filter_clear_forgets_held_codes() {
        let filter = EdgeFilter::new(SourceKind::Keyboard);
        filter.classify(10, RawAction::Down);
        filter.clear();
        assert!(!filter.is_pressed(10));
        assert!(filter.classify(10, RawAction::Down).is_some());
    }

    #[test]
    fn test_mouse_buttons_map_to_virtual_key_codes() {
        assert_eq!(mouse_button_code(MouseButton::Left), 0x01);
        assert_eq!(mouse_button_code(MouseButton::Right), 0x02);
        assert_eq!(mouse_button_code(MouseButton::Middle), 0x04);
        assert_eq!(mouse_button_code(MouseButton::X1), 0x05);
        assert_eq!(mouse_button_code(MouseButton::X2), 0x06);
    }

    #[test]
    fn test_wheel_is_normalized_to_one_notch() {
        assert_eq!(normalize_wheel(240), Some(WheelDelta { magnitude: 1 }));
        assert_eq!(normalize_wheel(-120), Some(WheelDelta { magnitude: -1 }));
        assert_eq!(normalize_wheel(0), None);
    }

    #[test]
    fn test_full_channel_drops_and_counts() {
        // Arrange
        let (sender, mut rx) = capture_channel(2);
        let signal = InputSignal::Edge(Edge::down(SourceKind::Keyboard, 1));

        // Act
        let results: Vec<bool> = (0..4).map(|_| sender.push(signal)).collect();

        // Assert
        assert_eq!(results, vec![true, true, false, false]);
        assert_eq!(sender.dropped(), 2);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_push_after_receiver_dropped_sets_closed_flag() {
        // Arrange
        let (sender, rx) = capture_channel(4);
        let clone = sender.clone();
        assert!(!sender.saw_closed_channel());

        // Act
        drop(rx);
        let delivered = sender.push(InputSignal::Wheel(WheelDelta { magnitude: 1 }));

        // Assert
        assert!(!delivered);
        assert_eq!(sender.dropped(), 0);
        assert!(clone.saw_closed_channel());
    }
}
