//! Domain entities for KeyStats.
//!
//! Everything in here is pure logic with no infrastructure dependencies.
//! Capture hooks, the HTTP server, and configuration storage live in the
//! `keystats-overlay` crate and depend on these types, never the other way
//! around.

/// Input edges, wheel deltas, and the atomic pressed-code bitmap.
pub mod input;

/// Keyboard layout map and pixel geometry.
pub mod layout;

/// The statistics engine and its immutable snapshots.
pub mod stats;
