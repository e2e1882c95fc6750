//! In-process publish/subscribe keyed by channel name.
//!
//! # Responsibilities
//! - Fan out JSON payloads to every live subscriber of a channel
//! - Detach subscribers when their stream is dropped
//! - Drop channels once their last subscriber leaves
//!
//! # Design Decisions
//! - Bounded per-subscriber buffers; a full buffer drops the event for that
//!   subscriber only, so one slow client never stalls a publisher
//! - No persistence or replay: subscribers see events published after they
//!   attach

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::observability::metrics;

pub const SSE_PREFIX: &str = "sse:";
pub const HTTP_STREAM_PREFIX: &str = "http-stream:";

pub fn sse_channel(topic: &str) -> String {
    format!("{SSE_PREFIX}{topic}")
}

pub fn http_stream_channel(resource_id: &str) -> String {
    format!("{HTTP_STREAM_PREFIX}{resource_id}")
}

fn channel_kind(channel: &str) -> &'static str {
    if channel.starts_with(SSE_PREFIX) {
        "sse"
    } else if channel.starts_with(HTTP_STREAM_PREFIX) {
        "http_stream"
    } else {
        "other"
    }
}

type Sinks = HashMap<u64, mpsc::Sender<Value>>;

struct BridgeInner {
    channels: DashMap<String, Sinks>,
    next_id: AtomicU64,
    buffer: usize,
    closed: AtomicBool,
}

impl BridgeInner {
    fn detach(&self, channel: &str, id: u64) {
        if let Some(mut sinks) = self.channels.get_mut(channel) {
            sinks.remove(&id);
        }
        self.channels.remove_if(channel, |_, sinks| sinks.is_empty());
        self.report_subscribers();
    }

    fn report_subscribers(&self) {
        let total: usize = self.channels.iter().map(|entry| entry.value().len()).sum();
        metrics::set_stream_subscribers(total);
    }
}

/// Cloneable handle to the bus.
#[derive(Clone)]
pub struct EventBridge {
    inner: Arc<BridgeInner>,
}

impl EventBridge {
    /// `buffer` is the per-subscriber queue depth.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                channels: DashMap::new(),
                next_id: AtomicU64::new(0),
                buffer: buffer.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Attach to `channel`. The subscription detaches when dropped.
    pub fn subscribe(&self, channel: impl Into<String>) -> Subscription {
        let channel = channel.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);

        // A closed bridge hands out subscriptions that end immediately.
        if !self.inner.closed.load(Ordering::SeqCst) {
            self.inner
                .channels
                .entry(channel.clone())
                .or_default()
                .insert(id, tx);
            self.inner.report_subscribers();
            tracing::debug!(channel = %channel, subscriber = id, "Subscriber attached");
        }

        Subscription {
            channel,
            id,
            rx,
            bridge: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `payload` to the current subscribers of `channel`.
    ///
    /// Returns how many subscribers accepted the event.
    pub fn publish(&self, channel: &str, payload: Value) -> usize {
        // Snapshot, then release the shard lock before sending.
        let sinks: Vec<(u64, mpsc::Sender<Value>)> = match self.inner.channels.get(channel) {
            Some(entry) => entry.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
            None => Vec::new(),
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in sinks {
            match tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(channel, subscriber = id, "Subscriber buffer full, event dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }
        for id in closed {
            self.inner.detach(channel, id);
        }

        metrics::record_event_published(channel_kind(channel), delivered);
        tracing::trace!(channel, delivered, "Event published");
        delivered
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|sinks| sinks.len())
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    /// Drop every sink so open streams end. Later subscriptions end at once.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.channels.clear();
        self.inner.report_subscribers();
    }

    /// Accept subscribers again after `close()`.
    pub fn reopen(&self) {
        self.inner.closed.store(false, Ordering::SeqCst);
    }
}

/// One attached subscriber.
pub struct Subscription {
    channel: String,
    id: u64,
    rx: mpsc::Receiver<Value>,
    bridge: Weak<BridgeInner>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next payload, or `None` once the bridge is closed.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn into_stream(mut self) -> impl Stream<Item = Value> + Send + 'static {
        async_stream::stream! {
            while let Some(payload) = self.recv().await {
                yield payload;
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.detach(&self.channel, self.id);
            tracing::debug!(channel = %self.channel, subscriber = self.id, "Subscriber detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_only_events_after_attach_are_delivered() {
        let bridge = EventBridge::new(8);
        assert_eq!(bridge.publish("sse:builds", json!({"n": 0})), 0);

        let mut sub = bridge.subscribe(sse_channel("builds"));
        assert_eq!(bridge.publish("sse:builds", json!({"n": 1})), 1);
        assert_eq!(sub.recv().await, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let bridge = EventBridge::new(8);
        let mut a = bridge.subscribe("http-stream:r1");
        let mut b = bridge.subscribe("http-stream:r1");
        let mut other = bridge.subscribe("http-stream:r2");

        assert_eq!(bridge.publish("http-stream:r1", json!("chunk")), 2);
        assert_eq!(a.recv().await, Some(json!("chunk")));
        assert_eq!(b.recv().await, Some(json!("chunk")));
        assert!(other.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_detaches_and_removes_empty_channel() {
        let bridge = EventBridge::new(8);
        let a = bridge.subscribe("sse:t");
        let b = bridge.subscribe("sse:t");
        assert_eq!(bridge.subscriber_count("sse:t"), 2);

        drop(a);
        assert_eq!(bridge.subscriber_count("sse:t"), 1);
        drop(b);
        assert_eq!(bridge.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_for_slow_subscriber_only() {
        let bridge = EventBridge::new(1);
        let mut slow = bridge.subscribe("sse:t");
        let mut fast = bridge.subscribe("sse:t");

        assert_eq!(bridge.publish("sse:t", json!(1)), 2);
        assert_eq!(fast.recv().await, Some(json!(1)));
        assert_eq!(bridge.publish("sse:t", json!(2)), 1);

        assert_eq!(slow.recv().await, Some(json!(1)));
        assert_eq!(fast.recv().await, Some(json!(2)));
        assert_eq!(bridge.subscriber_count("sse:t"), 2);
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let bridge = EventBridge::new(8);
        let stream = bridge.subscribe("sse:t").into_stream();
        bridge.close();

        let collected: Vec<Value> = stream.collect().await;
        assert!(collected.is_empty());

        let mut late = bridge.subscribe("sse:t");
        assert_eq!(late.recv().await, None);
        assert_eq!(bridge.channel_count(), 0);
    }
}
