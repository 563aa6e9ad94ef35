//! JSON encoding of [`StatsSnapshot`] for the query endpoint and the event
//! stream.
//!
//! Both endpoints share one object shape.  The point query omits `pressed`;
//! the event stream includes it so overlays can highlight held keys:
//!
//! ```json
//! {"totalKeyPresses":3,"kps":20,"keyCounts":{"65":2,"66":1},"pressed":[65]}
//! ```
//!
//! `kps` is the smoothed rate.  Count keys are decimal strings because JSON
//! object keys are always strings; serde_json stringifies integer map keys.
//! Field order is fixed by the struct declaration order below.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::input::KeyCode;
use crate::domain::stats::StatsSnapshot;

/// Borrowed view of a snapshot in wire order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsPayload<'a> {
    total_key_presses: u64,
    kps: u32,
    key_counts: &'a BTreeMap<KeyCode, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pressed: Option<Vec<KeyCode>>,
}

impl<'a> StatsPayload<'a> {
    fn new(snapshot: &'a StatsSnapshot, with_pressed: bool) -> Self {
        Self {
            total_key_presses: snapshot.total_presses,
            kps: snapshot.smoothed_rate,
            key_counts: &snapshot.key_counts,
            pressed: with_pressed.then(|| snapshot.pressed.iter().copied().collect()),
        }
    }
}

/// Owned, decoded form of a stats payload.  Used by viewers written in Rust
/// and by tests that inspect what the server sent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsMessage {
    pub total_key_presses: u64,
    pub kps: u32,
    pub key_counts: BTreeMap<KeyCode, u64>,
    #[serde(default)]
    pub pressed: Option<Vec<KeyCode>>,
}

/// Encodes the one-shot query body (no `pressed` field).
///
/// # Errors
///
/// Only fails if serde_json fails, which it does not for these types.
pub fn encode_query(snapshot: &StatsSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(&StatsPayload::new(snapshot, false))
}

/// Encodes the event-stream body (with `pressed`, ascending).
pub fn encode_stream(snapshot: &StatsSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(&StatsPayload::new(snapshot, true))
}

/// Wraps an encoded body in `text/event-stream` framing.
pub fn event_stream_frame(json: &str) -> String {
    format!("data: {json}\r\n\r\n")
}

/// Parses a payload produced by [`encode_query`] or [`encode_stream`].
pub fn decode_message(json: &str) -> Result<StatsMessage, serde_json::Error> {
    serde_json::from_str(json)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
