//! Wire shapes served to overlay viewers.

pub mod json;

pub use json::{decode_message, encode_query, encode_stream, event_stream_frame, StatsMessage};
