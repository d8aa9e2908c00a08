//! Append-only per-channel buffer the ingestion collaborator writes into and
//! the scheduling loop reads from.
//!
//! The buffer is bounded per channel (drop-oldest past the cap) so a source
//! channel that is never drained cannot grow memory without bound. Eviction
//! does not affect at-most-once delivery; the processed-id registry in the
//! engine is independent of the buffer.

use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

use crate::message::SourceMessage;

/// Oldest messages are dropped once a channel's buffer exceeds this.
pub const MAX_BUFFERED_PER_CHANNEL: usize = 500;

#[derive(Default)]
pub struct MessageStore {
    inner: Mutex<HashMap<u64, VecDeque<SourceMessage>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store(&self, channel_key: u64, message: SourceMessage) {
        let mut map = self.inner.lock().await;
        let buf = map.entry(channel_key).or_default();
        buf.push_back(message);
        while buf.len() > MAX_BUFFERED_PER_CHANNEL {
            buf.pop_front();
        }
    }

    /// Last `limit` messages for a channel in arrival order. Returns an owned
    /// snapshot so a concurrent `clear_all` cannot corrupt a batch the loop
    /// is iterating.
    pub async fn fetch(&self, channel_key: u64, limit: usize) -> Vec<SourceMessage> {
        let map = self.inner.lock().await;
        let Some(buf) = map.get(&channel_key) else {
            return Vec::new();
        };
        let skip = buf.len().saturating_sub(limit);
        buf.iter().skip(skip).cloned().collect()
    }

    /// Remove one channel's buffer, returning how many messages it held.
    pub async fn clear(&self, channel_key: u64) -> usize {
        let mut map = self.inner.lock().await;
        map.remove(&channel_key).map(|b| b.len()).unwrap_or(0)
    }

    /// Empty every buffer, returning the total number of messages removed.
    pub async fn clear_all(&self) -> usize {
        let mut map = self.inner.lock().await;
        let count = map.values().map(|b| b.len()).sum();
        map.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, MessageId, MessageRef};
    use crate::message::MessageKind;
    use chrono::Utc;

    fn msg(id: i32) -> SourceMessage {
        SourceMessage {
            origin: MessageRef {
                chat_id: ChatId(-100),
                message_id: MessageId(id),
            },
            channel_key: 100,
            kind: MessageKind::Text,
            media: None,
            text: Some(format!("msg {id}")),
            caption: None,
            entities: Vec::new(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fetch_returns_last_n_in_arrival_order() {
        let store = MessageStore::new();
        for i in 0..5 {
            store.store(100, msg(i)).await;
        }

        let got = store.fetch(100, 3).await;
        let ids: Vec<i32> = got.iter().map(|m| m.origin.message_id.0).collect();
        assert_eq!(ids, vec![2, 3, 4]);

        assert!(store.fetch(999, 10).await.is_empty());
    }

    #[tokio::test]
    async fn clear_all_reports_removed_count() {
        let store = MessageStore::new();
        store.store(1, msg(1)).await;
        store.store(1, msg(2)).await;
        store.store(2, msg(3)).await;

        assert_eq!(store.clear_all().await, 3);
        assert_eq!(store.clear_all().await, 0);
    }

    #[tokio::test]
    async fn clear_removes_single_channel() {
        let store = MessageStore::new();
        store.store(1, msg(1)).await;
        store.store(2, msg(2)).await;

        assert_eq!(store.clear(1).await, 1);
        assert!(store.fetch(1, 10).await.is_empty());
        assert_eq!(store.fetch(2, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn buffer_is_bounded_drop_oldest() {
        let store = MessageStore::new();
        for i in 0..(MAX_BUFFERED_PER_CHANNEL as i32 + 10) {
            store.store(7, msg(i)).await;
        }

        let got = store.fetch(7, MAX_BUFFERED_PER_CHANNEL * 2).await;
        assert_eq!(got.len(), MAX_BUFFERED_PER_CHANNEL);
        assert_eq!(got[0].origin.message_id.0, 10);
    }
}
