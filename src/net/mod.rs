//! Network listener subsystem.

pub mod listener;

pub use listener::{bind_with_retry, ListenerError};
