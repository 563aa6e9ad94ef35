//! Starts and stops every configured capture source as a group.
//!
//! A source that fails to start is reported, not fatal: the overlay keeps
//! serving whatever the remaining sources (possibly none) capture.

use std::sync::Arc;

use tracing::{info, warn};

use keystats_core::SourceKind;

use crate::infrastructure::input_capture::{CaptureError, InputSource};

/// Outcome of [`CaptureSupervisor::start_all`].
#[derive(Debug, Default)]
pub struct CaptureReport {
    pub started: Vec<SourceKind>,
    pub failed: Vec<(SourceKind, CaptureError)>,
}

impl CaptureReport {
    /// At least one source failed to start.
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }

    /// No source is capturing.
    pub fn is_idle(&self) -> bool {
        self.started.is_empty()
    }
}

/// Owns the capture sources for the lifetime of the overlay.
pub struct CaptureSupervisor {
    sources: Vec<Arc<dyn InputSource>>,
}

impl CaptureSupervisor {
    pub fn new(sources: Vec<Arc<dyn InputSource>>) -> Self {
        Self { sources }
    }

    /// Starts every source, logging each failure.
    pub fn start_all(&self) -> CaptureReport {
        let mut report = CaptureReport::default();
        for source in &self.sources {
            let kind = source.kind();
            match source.start() {
                Ok(()) => report.started.push(kind),
                Err(e) => {
                    warn!("{kind} capture unavailable: {e}");
                    report.failed.push((kind, e));
                }
            }
        }

        if report.is_idle() && !self.sources.is_empty() {
            warn!("no input capture is running; stats will stay at zero");
        } else if !report.started.is_empty() {
            info!("capturing: {:?}", report.started);
        }
        report
    }

    /// Stops every source.  Repeated calls are harmless.
    pub fn stop_all(&self) {
        for source in &self.sources {
            source.stop();
        }
    }

    pub fn running_kinds(&self) -> Vec<SourceKind> {
        self.sources
            .iter()
            .filter(|s| s.is_running())
            .map(|s| s.kind())
            .collect()
    }
}

impl Drop for CaptureSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::input_capture::capture_channel;
    use crate::infrastructure::input_capture::mock::MockInputSource;
    use crate::infrastructure::input_capture::RawAction;

    fn mocks() -> (Arc<MockInputSource>, Arc<MockInputSource>) {
        let (sender, _rx) = capture_channel(8);
        (
            Arc::new(MockInputSource::new(SourceKind::Keyboard, sender.clone())),
            Arc::new(MockInputSource::new(SourceKind::Mouse, sender)),
        )
    }

    #[test]
    fn test_start_all_reports_partial_failure() {
        // Arrange
        let (keyboard, mouse) = mocks();
        mouse.fail_next_start(1428);
        let supervisor = CaptureSupervisor::new(vec![keyboard.clone(), mouse.clone()]);

        // Act
        let report = supervisor.start_all();

        // Assert
        assert_eq!(report.started, vec![SourceKind::Keyboard]);
        assert!(report.is_degraded());
        assert!(matches!(
            report.failed.as_slice(),
            [(SourceKind::Mouse, CaptureError::HookInstallFailed { code: 1428, .. })]
        ));
        assert_eq!(supervisor.running_kinds(), vec![SourceKind::Keyboard]);
    }

    #[test]
    fn test_stop_all_is_idempotent_and_clears_sources() {
        let (keyboard, mouse) = mocks();
        let supervisor = CaptureSupervisor::new(vec![keyboard.clone(), mouse.clone()]);
        supervisor.start_all();
        keyboard.inject(65, RawAction::Down);

        supervisor.stop_all();
        supervisor.stop_all();

        assert!(supervisor.running_kinds().is_empty());
        assert!(!keyboard.is_pressed(65));
    }

    #[test]
    fn test_drop_stops_sources() {
        let (keyboard, mouse) = mocks();
        {
            let supervisor = CaptureSupervisor::new(vec![keyboard.clone(), mouse.clone()]);
            supervisor.start_all();
        }
        assert!(!keyboard.is_running());
        assert!(!mouse.is_running());
    }

    #[test]
    fn test_empty_supervisor_is_idle_without_degradation() {
        let report = CaptureSupervisor::new(Vec::new()).start_all();
        assert!(report.is_idle());
        assert!(!report.is_degraded());
    }
}
