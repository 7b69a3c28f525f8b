use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use nodedeck_process::{LogEnvelope, LogTag};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::{RwLock, mpsc},
};

/// Serialized envelope as handed to subscribers.
pub type Frame = Arc<str>;

/// Topic-keyed fan-out of log envelopes.
///
/// Each subscriber owns a bounded queue. A subscriber whose queue is full (or
/// whose receiver is gone but has not unsubscribed yet) is skipped for that
/// message and stays registered until it unsubscribes.
#[derive(Clone)]
pub struct LogHub {
    inner: Arc<RwLock<HashMap<String, HashMap<u64, mpsc::Sender<Frame>>>>>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(crate::support::log_queue_capacity())
    }
}

pub struct Subscription {
    pub topic: String,
    pub id: u64,
    pub rx: mpsc::Receiver<Frame>,
}

impl LogHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self, topic: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.inner
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .insert(id, tx);
        tracing::debug!(topic, subscriber = id, "log subscriber added");
        Subscription {
            topic: topic.to_string(),
            id,
            rx,
        }
    }

    pub async fn unsubscribe(&self, topic: &str, id: u64) {
        let mut map = self.inner.write().await;
        if let Some(subs) = map.get_mut(topic) {
            subs.remove(&id);
            if subs.is_empty() {
                map.remove(topic);
            }
        }
        tracing::debug!(topic, subscriber = id, "log subscriber removed");
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .read()
            .await
            .get(topic)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Wraps `message` in an envelope and offers it to every subscriber of `topic`.
    /// Returns how many subscribers accepted it.
    pub async fn broadcast(&self, topic: &str, message: impl Into<String>) -> usize {
        let frame: Frame = LogEnvelope::now(message).to_json().into();

        let map = self.inner.read().await;
        let Some(subs) = map.get(topic) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, tx) in subs {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::trace!(topic, subscriber = id, "log subscriber queue full, skipped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub fn sink(&self, topic: impl Into<String>) -> LogSink {
        LogSink {
            hub: self.clone(),
            topic: topic.into(),
        }
    }
}

/// Log destination bound to one topic.
#[derive(Clone)]
pub struct LogSink {
    hub: LogHub,
    topic: String,
}

impl LogSink {
    pub async fn emit(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(topic = %self.topic, %line, "log");
        self.hub.broadcast(&self.topic, line).await;
    }

    /// Forwards every line of `reader` tagged with `tag` until EOF.
    /// Invalid UTF-8 is replaced rather than ending the stream.
    pub async fn pump<R>(&self, reader: R, tag: LogTag)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    while buf.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
                        buf.pop();
                    }
                    let line = String::from_utf8_lossy(&buf);
                    self.emit(tag.tag(&line)).await;
                }
                Err(err) => {
                    tracing::debug!(topic = %self.topic, %err, "output stream read failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodedeck_process::LogEnvelope;

    fn decode(frame: &Frame) -> LogEnvelope {
        serde_json::from_str(frame).unwrap()
    }

    #[tokio::test]
    async fn broadcast_reaches_only_its_topic() {
        let hub = LogHub::new(16);
        let mut a1 = hub.subscribe("a").await;
        let mut a2 = hub.subscribe("a").await;
        let mut b = hub.subscribe("b").await;

        assert_eq!(hub.broadcast("a", "[stdout] hi").await, 2);

        assert_eq!(decode(&a1.rx.recv().await.unwrap()).message, "[stdout] hi");
        assert_eq!(decode(&a2.rx.recv().await.unwrap()).message, "[stdout] hi");
        assert!(b.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_history() {
        let hub = LogHub::new(16);
        hub.broadcast("a", "before").await;
        let mut sub = hub.subscribe("a").await;
        hub.broadcast("a", "after").await;

        assert_eq!(decode(&sub.rx.recv().await.unwrap()).message, "after");
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_is_skipped_not_removed() {
        let hub = LogHub::new(1);
        let mut slow = hub.subscribe("a").await;

        assert_eq!(hub.broadcast("a", "one").await, 1);
        assert_eq!(hub.broadcast("a", "two").await, 0);
        assert_eq!(hub.subscriber_count("a").await, 1);

        assert_eq!(decode(&slow.rx.recv().await.unwrap()).message, "one");
        assert_eq!(hub.broadcast("a", "three").await, 1);
        assert_eq!(decode(&slow.rx.recv().await.unwrap()).message, "three");
    }

    #[tokio::test]
    async fn unsubscribe_drops_membership() {
        let hub = LogHub::new(4);
        let sub = hub.subscribe("a").await;
        assert_eq!(hub.subscriber_count("a").await, 1);

        hub.unsubscribe(&sub.topic, sub.id).await;
        assert_eq!(hub.subscriber_count("a").await, 0);
        assert_eq!(hub.broadcast("a", "nobody").await, 0);
    }

    #[tokio::test]
    async fn pump_tags_each_line() {
        let hub = LogHub::new(8);
        let mut sub = hub.subscribe("srv").await;
        let input: &[u8] = b"first\r\nsecond\nlast";
        hub.sink("srv").pump(input, LogTag::Stderr).await;

        let got: Vec<String> = (0..3)
            .map(|_| decode(&sub.rx.try_recv().unwrap()).message)
            .collect();
        assert_eq!(got, vec!["[stderr] first", "[stderr] second", "[stderr] last"]);
    }

    #[tokio::test]
    async fn sink_emits_on_its_topic() {
        let hub = LogHub::new(4);
        let mut sub = hub.subscribe("srv").await;
        hub.sink("srv").emit("Process exited with code 0").await;

        let env = decode(&sub.rx.recv().await.unwrap());
        assert_eq!(env.kind, "log");
        assert_eq!(env.message, "Process exited with code 0");
    }
}
