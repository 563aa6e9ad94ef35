//! Hand-built HTTP/1.1 server for overlay viewers.
//!
//! Three response shapes share one listener:
//!
//! | Path                     | Response                              |
//! |--------------------------|---------------------------------------|
//! | `/`, `/index*`           | HTML page with the embedded layout    |
//! | `/query`, `/api/stats`   | one JSON snapshot, then close         |
//! | `/events`, `/sse`        | `text/event-stream`, pushed every tick |
//! | anything else            | `404 Not Found`                       |
//!
//! Only the request line is looked at; headers and bodies are ignored.

pub mod page;
pub mod request;
pub mod response;
pub mod server;
pub mod subscribers;

pub use server::{BroadcastServer, ServerError, ServerSettings};
