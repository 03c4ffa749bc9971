//! Typed publish/subscribe topics, one per room and one per duo.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{db::PairKey, rooms::Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Room(Uuid),
    Duo(Uuid),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchEvent {
    pub match_id: Uuid,
    pub duos: PairKey,
    pub room_id: Uuid,
    pub matched_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    MessageAppended(Message),
    MatchCreated(MatchEvent),
}

struct Channel {
    tx: broadcast::Sender<Event>,
    /// Held across "write, then publish" so every subscriber sees the
    /// durable order.
    sequencer: Arc<tokio::sync::Mutex<()>>,
}

impl Channel {
    fn idle(&self) -> bool {
        self.tx.receiver_count() == 0 && Arc::strong_count(&self.sequencer) == 1
    }
}

#[derive(Clone)]
pub struct Hub {
    topics: Arc<Mutex<HashMap<Topic, Channel>>>,
    capacity: usize,
}

impl Hub {
    pub fn new(capacity: usize) -> Hub {
        Hub {
            topics: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        let mut topics = self.topics.lock();
        topics.retain(|key, channel| *key == topic || !channel.idle());
        topics
            .entry(topic)
            .or_insert_with(|| self.open())
            .tx
            .subscribe()
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, topic: Topic, event: Event) -> usize {
        let topics = self.topics.lock();
        match topics.get(&topic) {
            Some(channel) => channel.tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn sequencer(&self, topic: Topic) -> Arc<tokio::sync::Mutex<()>> {
        self.topics
            .lock()
            .entry(topic)
            .or_insert_with(|| self.open())
            .sequencer
            .clone()
    }

    /// Drops the topic's channel if nobody is subscribed or sequencing on it.
    pub fn release(&self, topic: Topic) {
        let mut topics = self.topics.lock();
        if topics.get(&topic).is_some_and(Channel::idle) {
            topics.remove(&topic);
        }
    }

    fn open(&self) -> Channel {
        Channel {
            tx: broadcast::channel(self.capacity).0,
            sequencer: Arc::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn topic_count(&self) -> usize {
        self.topics.lock().len()
    }
}
