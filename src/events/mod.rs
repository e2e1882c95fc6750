//! Runtime event fan-out to streaming HTTP clients.

pub mod bridge;

pub use bridge::{http_stream_channel, sse_channel, EventBridge, Subscription};
