//! Infrastructure layer for the overlay.
//!
//! Contains OS-facing adapters: input capture hooks, the HTTP/event-stream
//! server, file-system storage, and port diagnostics.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `keystats_core`, but MUST NOT be imported by the domain layer.

pub mod diagnostics;
pub mod http;
pub mod input_capture;
pub mod storage;
