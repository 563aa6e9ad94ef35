//! Moves captured input into the engine and keeps its rates ticking.
//!
//! ```text
//! hook thread ──try_send──▶ mpsc ──▶ run_edge_pump ──▶ StatsHandle
//!                                                          ▲
//!                        run_stats_ticker (every 100 ms) ──┘
//! ```
//!
//! The pump is the only consumer of the capture channel, so edges from the
//! keyboard and mouse sources reach the engine in the order they were queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use keystats_core::{InputSignal, StatsListener, Transition};

use super::stats_handle::StatsHandle;

/// Applies one captured signal to the engine.
///
/// Returns `true` if the engine state changed.  Wheel deltas never change it.
pub fn apply_signal(stats: &StatsHandle, signal: InputSignal) -> bool {
    match signal {
        InputSignal::Edge(edge) => match edge.transition {
            Transition::Down => {
                let accepted = stats.record_press(edge.code);
                if !accepted {
                    trace!(code = edge.code, source = %edge.source, "press outside layout ignored");
                }
                accepted
            }
            Transition::Up => stats.record_release(edge.code),
        },
        InputSignal::Wheel(delta) => {
            trace!(magnitude = delta.magnitude, "wheel delta");
            false
        }
    }
}

/// Totals reported by [`run_edge_pump`] when its channel closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpSummary {
    pub signals: u64,
    pub applied: u64,
}

/// Drains `rx` into `stats` until every sender is gone.
pub async fn run_edge_pump(mut rx: mpsc::Receiver<InputSignal>, stats: StatsHandle) -> PumpSummary {
    let mut summary = PumpSummary::default();
    while let Some(signal) = rx.recv().await {
        summary.signals += 1;
        if apply_signal(&stats, signal) {
            summary.applied += 1;
        }
    }
    debug!(
        signals = summary.signals,
        applied = summary.applied,
        "edge pump finished"
    );
    summary
}

/// Calls [`StatsHandle::tick`] every `period` until `running` is cleared.
///
/// Late ticks are skipped rather than bunched up; the engine's rate is
/// derived from timestamps, so a missed tick only delays decay.
pub async fn run_stats_ticker(stats: StatsHandle, period: Duration, running: Arc<AtomicBool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("stats ticker running every {} ms", period.as_millis());

    loop {
        ticker.tick().await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
        stats.tick();
    }
    debug!("stats ticker stopped");
}

/// Publishes the engine generation on a `watch` channel.
struct GenerationWatch(watch::Sender<u64>);

impl StatsListener for GenerationWatch {
    fn stats_updated(&self, generation: u64) {
        self.0.send_replace(generation);
    }

    fn is_detached(&self) -> bool {
        self.0.is_closed()
    }
}

/// Registers a listener on `stats` and returns a receiver that changes every
/// time the engine notifies.
///
/// The listener detaches on the first notification after every clone of the
/// receiver has been dropped.
pub fn generation_channel(stats: &StatsHandle) -> watch::Receiver<u64> {
    let (tx, rx) = watch::channel(stats.generation());
    stats.add_listener(Box::new(GenerationWatch(tx)));
    rx
}

// ── Tests ─────────────────────────────────────────────────────────────────────
