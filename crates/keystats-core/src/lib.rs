//! # keystats-core
//!
//! Shared library for KeyStats containing the statistics engine, the
//! lock-free pressed-key bitmap used by capture hooks, the keyboard layout
//! model, and the JSON payload shapes pushed to overlay viewers.
//!
//! It has zero dependencies on OS APIs, sockets, or an async runtime, so every
//! rule here can be unit-tested on any platform.
//!
//! # Architecture overview
//!
//! KeyStats watches physical keyboard and mouse activity system-wide and
//! republishes live counters to browser overlays (for example an OBS browser
//! source).  The pipeline is:
//!
//! ```text
//! OS hook ──▶ PressedSet (dedup) ──▶ KeyStats (aggregate) ──▶ StatsSnapshot ──▶ JSON
//! ```
//!
//! - **`domain`** – Pure business rules: input edges, the per-source pressed
//!   set, the stats engine with its sliding rate window, and the key layout.
//!
//! - **`protocol`** – The wire shape of a snapshot as served to viewers: the
//!   compact JSON object and its `text/event-stream` framing.

pub mod domain;
pub mod protocol;

pub use domain::input::{Edge, InputSignal, KeyCode, PressedSet, SourceKind, Transition, WheelDelta};
pub use domain::layout::{DisplayMetrics, KeyGeometry, KeyInfo, KeyLayout, LayoutError};
pub use domain::stats::{KeyStats, StatsConfig, StatsListener, StatsSnapshot};
pub use protocol::json::{decode_message, encode_query, encode_stream, event_stream_frame, StatsMessage};
