//! # Queue Store
//!
//! Durable FIFO of pending work items for one job, split into segments.
//!
//! ## Overview
//!
//! Items are buffered in memory with [`QueueStore::push`] and written as one
//! segment by [`QueueStore::save`]. Each segment is a JSON array stored under
//! `{action}_batch_{seq}`, where `seq` is zero-padded so that key order is
//! insertion order.
//!
//! Consumers look at the head with [`QueueStore::peek`] and remove it with
//! [`QueueStore::ack`] once the item reached a terminal outcome. An item that
//! was peeked but never acknowledged (crash, retry) is seen again by the next
//! window.
//!
//! Only one window touches a queue at a time; the dispatcher's process lock
//! guarantees that. The store itself offers no compare-and-swap.

use bridge_traits::SettingsStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Head of the queue as returned by [`QueueStore::peek`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem<T> {
    /// Segment the item lives in
    pub segment: String,
    pub item: T,
}

/// Segmented persistent queue keyed by a job action
pub struct QueueStore<T> {
    store: Arc<dyn SettingsStore>,
    action: String,
    pending: Vec<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> QueueStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(store: Arc<dyn SettingsStore>, action: impl Into<String>) -> Self {
        Self {
            store,
            action: action.into(),
            pending: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Key prefix shared by every segment of this queue
    pub fn segment_prefix(&self) -> String {
        format!("{}_batch_", self.action)
    }

    fn segment_key(&self, seq: u64) -> String {
        format!("{}{:020}", self.segment_prefix(), seq)
    }

    /// Buffer an item for the next [`save`](Self::save)
    pub fn push(&mut self, item: T) -> &mut Self {
        self.pending.push(item);
        self
    }

    /// Items buffered but not yet saved
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Persist buffered items as a new tail segment.
    ///
    /// Returns the segment key, or `None` when nothing was buffered.
    pub async fn save(&mut self) -> Result<Option<String>> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let key = self.segment_key(self.next_seq().await?);
        let value = serde_json::to_value(&self.pending).map_err(|e| {
            SyncError::CorruptSegment {
                key: key.clone(),
                reason: e.to_string(),
            }
        })?;
        self.store.set_value(&key, &value).await?;

        debug!(segment = %key, items = self.pending.len(), "Saved queue segment");
        self.pending.clear();
        Ok(Some(key))
    }

    async fn next_seq(&self) -> Result<u64> {
        let prefix = self.segment_prefix();
        let last = self
            .store
            .list_keys(&prefix)
            .await?
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix)?.parse::<u64>().ok())
            .max();
        Ok(last.map_or(0, |seq| seq + 1))
    }

    async fn load_raw(&self, key: &str) -> Result<Option<Vec<Value>>> {
        match self.store.get_value(key).await? {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(other) => Err(SyncError::CorruptSegment {
                key: key.to_string(),
                reason: format!("expected an array, found {}", other),
            }),
        }
    }

    async fn load_segment(&self, key: &str) -> Result<Option<Vec<T>>> {
        let Some(items) = self.load_raw(key).await? else {
            return Ok(None);
        };
        serde_json::from_value(Value::Array(items))
            .map(Some)
            .map_err(|e| SyncError::CorruptSegment {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    /// First item of the oldest non-empty segment.
    ///
    /// Empty segments met on the way are deleted.
    pub async fn peek(&self) -> Result<Option<QueuedItem<T>>> {
        for key in self.store.list_keys(&self.segment_prefix()).await? {
            match self.load_segment(&key).await? {
                Some(items) => {
                    if let Some(item) = items.into_iter().next() {
                        return Ok(Some(QueuedItem { segment: key, item }));
                    }
                    self.store.delete(&key).await?;
                }
                None => continue,
            }
        }
        Ok(None)
    }

    /// Remove the head of `entry.segment` if it still is `entry.item`.
    ///
    /// Returns `false` without touching the queue when the segment
    /// disappeared (a stop cleared the queue) or its head changed since the
    /// entry was peeked (another window acknowledged it first).
    pub async fn ack(&self, entry: &QueuedItem<T>) -> Result<bool> {
        let Some(mut items) = self.load_raw(&entry.segment).await? else {
            debug!(segment = %entry.segment, "Segment already gone; nothing to acknowledge");
            return Ok(false);
        };

        let expected = serde_json::to_value(&entry.item).map_err(|e| SyncError::CorruptSegment {
            key: entry.segment.clone(),
            reason: e.to_string(),
        })?;
        if items.first() != Some(&expected) {
            warn!(segment = %entry.segment, "Queue head changed since it was read; leaving it in place");
            return Ok(false);
        }
        items.remove(0);

        if items.is_empty() {
            self.store.delete(&entry.segment).await?;
        } else {
            self.store
                .set_value(&entry.segment, &Value::Array(items))
                .await?;
        }
        Ok(true)
    }

    /// Remove and return the head item
    pub async fn dequeue_next(&self) -> Result<Option<T>> {
        while let Some(entry) = self.peek().await? {
            if self.ack(&entry).await? {
                return Ok(Some(entry.item));
            }
        }
        Ok(None)
    }

    /// True when no persisted segment holds an item
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.peek().await?.is_none())
    }

    /// Number of persisted items across all segments
    pub async fn len(&self) -> Result<u64> {
        let mut total = 0u64;
        for key in self.store.list_keys(&self.segment_prefix()).await? {
            if let Some(Value::Array(items)) = self.store.get_value(&key).await? {
                total += items.len() as u64;
            }
        }
        Ok(total)
    }

    /// Delete every segment and drop buffered items
    pub async fn clear(&mut self) -> Result<u64> {
        self.pending.clear();
        let removed = self.store.delete_prefix(&self.segment_prefix()).await?;
        if removed > 0 {
            debug!(action = %self.action, segments = removed, "Cleared queue");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::MemorySettingsStore;
    use serde_json::json;

    fn queue(store: &Arc<MemorySettingsStore>) -> QueueStore<i64> {
        QueueStore::new(store.clone() as Arc<dyn SettingsStore>, "bg_test")
    }

    #[tokio::test]
    async fn test_fifo_across_segments() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut queue = queue(&store);

        queue.push(1).push(2);
        queue.save().await.unwrap();
        queue.push(3);
        queue.save().await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 3);
        assert_eq!(queue.dequeue_next().await.unwrap(), Some(1));
        assert_eq!(queue.dequeue_next().await.unwrap(), Some(2));
        assert_eq!(queue.dequeue_next().await.unwrap(), Some(3));
        assert_eq!(queue.dequeue_next().await.unwrap(), None);
        assert!(store.list_keys("bg_test_batch_").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_without_items_writes_nothing() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut queue = queue(&store);

        assert_eq!(queue.save().await.unwrap(), None);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_segment_keys_sort_numerically() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut queue = queue(&store);

        for i in 0..12 {
            queue.push(i);
            queue.save().await.unwrap();
        }

        let keys = store.list_keys("bg_test_batch_").await.unwrap();
        assert_eq!(keys.len(), 12);
        assert_eq!(keys[0], "bg_test_batch_00000000000000000000");
        assert_eq!(keys[11], "bg_test_batch_00000000000000000011");

        for expected in 0..12 {
            assert_eq!(queue.dequeue_next().await.unwrap(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_peek_keeps_item_until_ack() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut queue = queue(&store);
        queue.push(7).push(8);
        queue.save().await.unwrap();

        let head = queue.peek().await.unwrap().unwrap();
        assert_eq!(head.item, 7);
        assert_eq!(queue.peek().await.unwrap().unwrap().item, 7);

        queue.ack(&head).await.unwrap();
        assert_eq!(queue.peek().await.unwrap().unwrap().item, 8);
    }

    #[tokio::test]
    async fn test_ack_after_clear_is_noop() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut queue = queue(&store);
        queue.push(1);
        queue.save().await.unwrap();

        let head = queue.peek().await.unwrap().unwrap();
        queue.clear().await.unwrap();
        assert!(!queue.ack(&head).await.unwrap());
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_second_ack_of_same_head_keeps_next_item() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut queue = queue(&store);
        queue.push(1).push(2).push(3);
        queue.save().await.unwrap();

        let first_reader = queue.peek().await.unwrap().unwrap();
        let second_reader = queue.peek().await.unwrap().unwrap();

        assert_eq!(first_reader, second_reader);
        assert!(queue.ack(&second_reader).await.unwrap());
        assert!(!queue.ack(&first_reader).await.unwrap());

        assert_eq!(queue.len().await.unwrap(), 2);
        assert_eq!(queue.dequeue_next().await.unwrap(), Some(2));
        assert_eq!(queue.dequeue_next().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_empty_segments_are_skipped() {
        let store = Arc::new(MemorySettingsStore::new());
        store
            .set_value("bg_test_batch_00000000000000000000", &json!([]))
            .await
            .unwrap();
        store
            .set_value("bg_test_batch_00000000000000000001", &json!([5]))
            .await
            .unwrap();

        let queue = queue(&store);
        assert_eq!(queue.dequeue_next().await.unwrap(), Some(5));
        assert!(store.list_keys("bg_test_batch_").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_segment_is_reported() {
        let store = Arc::new(MemorySettingsStore::new());
        store
            .set_value("bg_test_batch_00000000000000000000", &json!({"oops": true}))
            .await
            .unwrap();

        let queue = queue(&store);
        let err = queue.peek().await.unwrap_err();
        assert!(matches!(err, SyncError::CorruptSegment { .. }));
    }

    #[tokio::test]
    async fn test_queues_are_isolated_by_action() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut first = queue(&store);
        let mut second: QueueStore<i64> =
            QueueStore::new(store.clone() as Arc<dyn SettingsStore>, "bg_test_other");

        first.push(1);
        first.save().await.unwrap();
        second.push(2);
        second.save().await.unwrap();

        second.clear().await.unwrap();
        assert_eq!(first.len().await.unwrap(), 1);
    }
}
