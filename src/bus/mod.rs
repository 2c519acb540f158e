use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};

use crate::error::BusError;

/// One message as delivered to a subscriber. The offset is acknowledged back
/// via [`Subscription::commit`] only after the downstream write succeeds.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub offset: usize,
    pub key: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Message {
    key: String,
    payload: Vec<u8>,
}

struct TopicState {
    /// Absolute offset of the first retained log entry. Committed entries are
    /// compacted away; offsets stay absolute across compaction.
    base: usize,
    log: VecDeque<Message>,
    /// All offsets below this are committed; a fresh subscription replays from here.
    committed: usize,
}

/// A named, append-only message log with at-least-once delivery semantics.
///
/// Messages survive between publish acknowledgment and offset commit: a
/// subscriber that drops without committing sees the same messages again on
/// the next subscribe. Capacity bounds the uncommitted backlog so a stalled
/// consumer exerts backpressure on publishers instead of growing unbounded,
/// and committed entries are dropped from memory.
pub struct Topic {
    name: String,
    state: Mutex<TopicState>,
    backlog: Semaphore,
    appended: Notify,
}

/// Durable in-process message bus keyed by topic name.
pub struct MessageBus {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    capacity: usize,
    publish_timeout: Duration,
    /// Set under the topics lock so lazily created topics are born closed.
    closed: AtomicBool,
}

impl MessageBus {
    pub fn new(capacity: usize, publish_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            capacity,
            publish_timeout,
            closed: AtomicBool::new(false),
        })
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        let topics = &mut *self.topics.lock().unwrap();
        let topic = topics
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Topic {
                    name: name.to_string(),
                    state: Mutex::new(TopicState {
                        base: 0,
                        log: VecDeque::new(),
                        committed: 0,
                    }),
                    backlog: Semaphore::new(self.capacity),
                    appended: Notify::new(),
                })
            })
            .clone();
        if self.closed.load(Ordering::SeqCst) {
            topic.backlog.close();
        }
        topic
    }

    /// Append one message to a topic. Returns once the broker has durably
    /// accepted it (the publish acknowledgment the watcher waits on).
    pub async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<usize, BusError> {
        let topic = self.topic(topic);

        let permit = tokio::time::timeout(self.publish_timeout, topic.backlog.acquire())
            .await
            .map_err(|_| BusError::PublishTimeout {
                topic: topic.name.clone(),
                timeout: self.publish_timeout,
            })?
            .map_err(|_| BusError::BrokerUnavailable)?;

        // The permit is returned on commit, not on drop: it accounts for one
        // uncommitted message in the backlog.
        permit.forget();

        let offset = {
            let mut state = topic.state.lock().unwrap();
            let offset = state.base + state.log.len();
            state.log.push_back(Message {
                key: key.to_string(),
                payload,
            });
            offset
        };

        topic.appended.notify_waiters();
        Ok(offset)
    }

    /// Subscribe to a topic, replaying any uncommitted messages first.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let topic = self.topic(topic);
        let next = topic.state.lock().unwrap().committed;
        Subscription { topic, next }
    }

    /// Shut down: publishers and blocked receivers see `BrokerUnavailable`,
    /// including on topics that have not been touched yet.
    pub fn shutdown(&self) {
        let topics = self.topics.lock().unwrap();
        self.closed.store(true, Ordering::SeqCst);
        for topic in topics.values() {
            topic.backlog.close();
            topic.appended.notify_waiters();
        }
    }
}

/// A consumer's cursor into one topic. `recv` hands out messages in log
/// order; `commit` acknowledges everything up to an offset, releasing
/// backlog capacity and fencing those messages from future replays.
pub struct Subscription {
    topic: Arc<Topic>,
    next: usize,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<Delivery, BusError> {
        loop {
            // Register for wakeup before checking the log so an append
            // between check and await is never missed.
            let appended = self.topic.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            {
                let state = self.topic.state.lock().unwrap();
                // Entries below base were committed (and compacted) by
                // another cursor; skip past them.
                if self.next < state.base {
                    self.next = state.base;
                }
                if self.next < state.base + state.log.len() {
                    let msg = state.log[self.next - state.base].clone();
                    let offset = self.next;
                    self.next += 1;
                    return Ok(Delivery {
                        offset,
                        key: msg.key,
                        payload: msg.payload,
                    });
                }
            }

            if self.topic.backlog.is_closed() {
                return Err(BusError::BrokerUnavailable);
            }

            appended.await;
        }
    }

    /// Acknowledge all messages up to and including `offset`. Committed
    /// entries are dropped from the log; they are never replayed, so keeping
    /// them would only grow memory for the process lifetime.
    pub fn commit(&mut self, offset: usize) {
        let newly_committed = {
            let mut state = self.topic.state.lock().unwrap();
            if offset + 1 <= state.committed {
                return;
            }
            let newly = offset + 1 - state.committed;
            state.committed = offset + 1;
            while state.base < state.committed {
                state.log.pop_front();
                state.base += 1;
            }
            newly
        };
        self.topic.backlog.add_permits(newly_committed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_messages_in_order() {
        let bus = MessageBus::new(16, Duration::from_secs(1));
        bus.publish("t", "a", b"one".to_vec()).await.unwrap();
        bus.publish("t", "b", b"two".to_vec()).await.unwrap();

        let mut sub = bus.subscribe("t");
        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(second.payload, b"two");
        assert_eq!((first.offset, second.offset), (0, 1));
    }

    #[tokio::test]
    async fn uncommitted_messages_are_redelivered_on_resubscribe() {
        let bus = MessageBus::new(16, Duration::from_secs(1));
        bus.publish("t", "k", b"m1".to_vec()).await.unwrap();
        bus.publish("t", "k", b"m2".to_vec()).await.unwrap();

        // First consumer commits only the first message, then "crashes".
        let mut sub = bus.subscribe("t");
        let d1 = sub.recv().await.unwrap();
        sub.commit(d1.offset);
        let _d2 = sub.recv().await.unwrap();
        drop(sub);

        // The replacement replays the uncommitted message.
        let mut sub = bus.subscribe("t");
        let redelivered = sub.recv().await.unwrap();
        assert_eq!(redelivered.payload, b"m2");
    }

    #[tokio::test(start_paused = true)]
    async fn full_backlog_times_out_publish_until_commit() {
        let bus = MessageBus::new(1, Duration::from_millis(100));
        bus.publish("t", "k", b"m1".to_vec()).await.unwrap();

        let err = bus.publish("t", "k", b"m2".to_vec()).await.unwrap_err();
        assert!(matches!(err, BusError::PublishTimeout { .. }));
        assert!(err.is_transient());

        let mut sub = bus.subscribe("t");
        let d = sub.recv().await.unwrap();
        sub.commit(d.offset);

        bus.publish("t", "k", b"m2".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn committed_messages_are_compacted_from_the_log() {
        let bus = MessageBus::new(8, Duration::from_secs(1));
        for payload in [b"m0", b"m1", b"m2"] {
            bus.publish("t", "k", payload.to_vec()).await.unwrap();
        }

        let mut sub = bus.subscribe("t");
        let _ = sub.recv().await.unwrap();
        let d = sub.recv().await.unwrap();
        sub.commit(d.offset);

        {
            let topic = bus.topic("t");
            let state = topic.state.lock().unwrap();
            assert_eq!(state.base, 2);
            assert_eq!(state.log.len(), 1);
        }

        // Offsets stay absolute across compaction, for consumers and
        // publishers alike.
        let d = sub.recv().await.unwrap();
        assert_eq!(d.offset, 2);
        assert_eq!(d.payload, b"m2");
        let offset = bus.publish("t", "k", b"m3".to_vec()).await.unwrap();
        assert_eq!(offset, 3);
    }

    #[tokio::test]
    async fn shutdown_fails_publish_and_recv() {
        let bus = MessageBus::new(4, Duration::from_secs(1));
        bus.publish("t", "k", b"m1".to_vec()).await.unwrap();
        let mut sub = bus.subscribe("t");
        let d = sub.recv().await.unwrap();
        sub.commit(d.offset);

        bus.shutdown();

        assert!(matches!(
            bus.publish("t", "k", b"m2".to_vec()).await,
            Err(BusError::BrokerUnavailable)
        ));
        assert!(matches!(sub.recv().await, Err(BusError::BrokerUnavailable)));
    }

    #[tokio::test]
    async fn shutdown_covers_topics_created_afterwards() {
        let bus = MessageBus::new(4, Duration::from_secs(1));
        bus.shutdown();

        // A topic first touched after shutdown must refuse work too; a
        // publish accepted here would be silently lost on exit.
        assert!(matches!(
            bus.publish("fresh", "k", b"late".to_vec()).await,
            Err(BusError::BrokerUnavailable)
        ));
        let mut sub = bus.subscribe("fresh");
        assert!(matches!(sub.recv().await, Err(BusError::BrokerUnavailable)));
    }
}
