use std::{
    collections::VecDeque,
    sync::Mutex,
};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::score::{HistoryEntry, RateSnapshot};

/// History ids remembered to drop duplicates arriving from several sources.
const RECENT_ENTRY_WINDOW: usize = 256;

/// Change observed on the shared score, whoever caused it.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Score(i64),
    HistoryEntry(HistoryEntry),
    Rate(RateSnapshot),
}

/// Broadcast hub fanning out score, history and rate changes to every observer.
///
/// Delivery is best effort and unordered with respect to a caller's own
/// mutation result; slow subscribers skip what they lagged behind on.
pub struct FeedHub {
    sender: broadcast::Sender<FeedEvent>,
    recent: Mutex<VecDeque<Uuid>>,
}

impl FeedHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_ENTRY_WINDOW)),
        }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    ///
    /// History entries already published recently are dropped.
    pub fn publish(&self, event: FeedEvent) {
        if let FeedEvent::HistoryEntry(entry) = &event {
            if !self.remember(entry.id) {
                return;
            }
        }
        let _ = self.sender.send(event);
    }

    fn remember(&self, id: Uuid) -> bool {
        let mut recent = self
            .recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.contains(&id) {
            return false;
        }
        if recent.len() == RECENT_ENTRY_WINDOW {
            recent.pop_front();
        }
        recent.push_back(id);
        true
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[tokio::test]
    async fn duplicate_history_entries_are_published_once() {
        let hub = FeedHub::new(8);
        let mut receiver = hub.subscribe();
        let entry = HistoryEntry::new(3, 3, datetime!(2026-10-19 10:00 UTC));

        hub.publish(FeedEvent::HistoryEntry(entry.clone()));
        hub.publish(FeedEvent::HistoryEntry(entry.clone()));
        hub.publish(FeedEvent::Score(3));

        assert_eq!(receiver.recv().await.unwrap(), FeedEvent::HistoryEntry(entry));
        assert_eq!(receiver.recv().await.unwrap(), FeedEvent::Score(3));
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let hub = FeedHub::new(1);
        hub.publish(FeedEvent::Score(1));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
