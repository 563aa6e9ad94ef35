//! Mock input source for testing.
//!
//! Behaves like a hook-backed source: it only delivers while started, it
//! deduplicates through its own [`EdgeFilter`], and it can be told to fail
//! its next installation.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use keystats_core::{Edge, InputSignal, KeyCode, SourceKind};

use super::{normalize_wheel, CaptureError, EdgeFilter, InputSource, RawAction, SignalSender};

/// A mock implementation of [`InputSource`] that allows tests to inject events.
pub struct MockInputSource {
    sender: SignalSender,
    filter: EdgeFilter,
    running: AtomicBool,
    installs: AtomicU32,
    fail_next: Mutex<Option<i32>>,
}

impl MockInputSource {
    pub fn new(kind: SourceKind, sender: SignalSender) -> Self {
        Self {
            sender,
            filter: EdgeFilter::new(kind),
            running: AtomicBool::new(false),
            installs: AtomicU32::new(0),
            fail_next: Mutex::new(None),
        }
    }

    /// Feeds one raw transition, as if reported by the OS.
    ///
    /// Returns the edge that was forwarded, or `None` if the source is
    /// stopped or the transition was a duplicate.
    pub fn inject(&self, code: KeyCode, action: RawAction) -> Option<Edge> {
        if !self.is_running() {
            return None;
        }
        let edge = self.filter.classify(code, action)?;
        self.sender.push(InputSignal::Edge(edge));
        Some(edge)
    }

    /// Feeds a raw wheel delta.  Returns whether a signal was forwarded.
    pub fn inject_wheel(&self, raw_delta: i32) -> bool {
        if !self.is_running() {
            return false;
        }
        match normalize_wheel(raw_delta) {
            Some(delta) => self.sender.push(InputSignal::Wheel(delta)),
            None => false,
        }
    }

    /// Makes the next `start()` fail with `code`.
    pub fn fail_next_start(&self, code: i32) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(code);
    }

    /// How many times a hook was actually installed.
    pub fn install_count(&self) -> u32 {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn is_pressed(&self, code: KeyCode) -> bool {
        self.filter.is_pressed(code)
    }
}

impl InputSource for MockInputSource {
    fn kind(&self) -> SourceKind {
        self.filter.kind()
    }

    fn start(&self) -> Result<(), CaptureError> {
        if let Some(code) = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(CaptureError::HookInstallFailed {
                kind: self.kind(),
                code,
            });
        }
        if !self.running.swap(true, Ordering::SeqCst) {
            self.installs.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.filter.clear();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::input_capture::capture_channel;
    use keystats_core::WheelDelta;

    #[test]
    fn test_mock_source_delivers_only_while_running() {
        // Arrange
        let (sender, mut rx) = capture_channel(8);
        let source = MockInputSource::new(SourceKind::Keyboard, sender);

        // Act
        let before = source.inject(65, RawAction::Down);
        source.start().expect("start should succeed");
        let after = source.inject(65, RawAction::Down);

        // Assert
        assert_eq!(before, None);
        assert_eq!(after, Some(Edge::down(SourceKind::Keyboard, 65)));
        assert_eq!(
            rx.try_recv().ok(),
            Some(InputSignal::Edge(Edge::down(SourceKind::Keyboard, 65)))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_start_is_idempotent() {
        let (sender, _rx) = capture_channel(8);
        let source = MockInputSource::new(SourceKind::Mouse, sender);

        source.start().unwrap();
        source.start().unwrap();

        assert_eq!(source.install_count(), 1);
    }

    #[test]
    fn test_failed_start_reports_platform_code() {
        // Arrange
        let (sender, _rx) = capture_channel(8);
        let source = MockInputSource::new(SourceKind::Keyboard, sender);
        source.fail_next_start(5);

        // Act
        let result = source.start();

        // Assert
        assert!(matches!(
            result,
            Err(CaptureError::HookInstallFailed { kind: SourceKind::Keyboard, code: 5 })
        ));
        assert!(!source.is_running());
        assert!(source.start().is_ok(), "only the next start fails");
    }

    #[test]
    fn test_stop_clears_pressed_state_and_repeats_safely() {
        let (sender, _rx) = capture_channel(8);
        let source = MockInputSource::new(SourceKind::Keyboard, sender);
        source.start().unwrap();
        source.inject(65, RawAction::Down);

        source.stop();
        source.stop();

        assert!(!source.is_pressed(65));
        assert!(!source.is_running());
    }

    #[test]
    fn test_wheel_is_forwarded_as_single_notch() {
        let (sender, mut rx) = capture_channel(8);
        let source = MockInputSource::new(SourceKind::Mouse, sender);
        source.start().unwrap();

        assert!(source.inject_wheel(-360));

        assert_eq!(
            rx.try_recv().ok(),
            Some(InputSignal::Wheel(WheelDelta { magnitude: -1 }))
        );
    }
}
