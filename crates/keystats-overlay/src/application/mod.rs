//! Application layer for the overlay.
//!
//! Sits between the pure engine in `keystats_core` and the OS-facing
//! adapters in `infrastructure`.  Nothing here installs hooks or opens
//! sockets; it moves data between the pieces that do.
//!
//! # Sub-modules
//!
//! - **`stats_handle`** – The shared, lock-protected [`KeyStats`] engine.
//!   Every context (edge pump, ticker, HTTP handlers) goes through it.
//!
//! - **`pipeline`** – The edge pump that drains captured signals into the
//!   engine in arrival order, and the periodic rate ticker.
//!
//! - **`capture_supervisor`** – Starts and stops every capture source and
//!   reports which ones are running.
//!
//! - **`layout_slot`** – Holds the active keyboard layout and swaps it as a
//!   whole on reload.
//!
//! [`KeyStats`]: keystats_core::KeyStats

pub mod capture_supervisor;
pub mod layout_slot;
pub mod pipeline;
pub mod stats_handle;
