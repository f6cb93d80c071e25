//! In-process topic hub: one broadcast channel per subscribed topic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::pipeline::publish::{PublishError, PublishPort};

/// Buffered messages per topic before slow subscribers start lagging.
const TOPIC_CAPACITY: usize = 32;

pub struct TopicHub {
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl Default for TopicHub {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicHub {
    pub fn new() -> Self {
        Self::with_capacity(TOPIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Receive every payload published to `topic` from now on.
    pub fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<String>, PublishError> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| PublishError::Unavailable("topic registry poisoned".into()))?;
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.subscribe())
    }

    /// Subscribe and release the topic when the returned handle is dropped.
    pub fn lease(self: &Arc<Self>, topic: &str) -> Result<TopicSubscription, PublishError> {
        let events = self.subscribe(topic)?;
        Ok(TopicSubscription {
            topic: topic.to_string(),
            events: Some(events),
            hub: Arc::clone(self),
        })
    }

    /// Drop `topic` once its last receiver is gone.
    pub fn release(&self, topic: &str) {
        if let Ok(mut topics) = self.topics.lock() {
            if topics.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
                topics.remove(topic);
                tracing::debug!(topic, "Topic released");
            }
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .ok()
            .and_then(|topics| topics.get(topic).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().map(|t| t.len()).unwrap_or(0)
    }
}

impl PublishPort for TopicHub {
    fn publish(&self, channel: &str, payload: &str) -> Result<(), PublishError> {
        let sender = self
            .topics
            .lock()
            .map_err(|_| PublishError::Unavailable("topic registry poisoned".into()))?
            .get(channel)
            .cloned();

        match sender.map(|tx| tx.send(payload.to_string())) {
            Some(Ok(receivers)) => tracing::debug!(channel, receivers, "Delivered to subscribers"),
            Some(Err(_)) => {
                tracing::debug!(channel, "Subscribers gone, message dropped");
                self.release(channel);
            }
            None => tracing::debug!(channel, "No subscribers, message dropped"),
        }
        Ok(())
    }
}

/// A receiver on one topic. Dropping it releases the topic.
pub struct TopicSubscription {
    topic: String,
    events: Option<broadcast::Receiver<String>>,
    hub: Arc<TopicHub>,
}

impl TopicSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn recv(&mut self) -> Result<String, broadcast::error::RecvError> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => Err(broadcast::error::RecvError::Closed),
        }
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        // The receiver must go before release checks the count.
        self.events.take();
        self.hub.release(&self.topic);
    }
}
