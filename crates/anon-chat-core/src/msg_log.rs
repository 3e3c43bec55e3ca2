//! Ordered, deduplicated chat transcript.

use std::collections::HashSet;

use crate::{ChatMessage, DedupKey};

/// Client-side transcript merging history snapshots with live messages.
///
/// Entries stay sorted ascending by timestamp; messages with equal
/// timestamps keep their arrival order. A message matching any key of a
/// present entry (server id or `(sender, timestamp, text)`) is ignored, so
/// replayed history and rebroadcasts are harmless.
///
/// The log has a single owner and does no internal locking.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<ChatMessage>,
    keys: HashSet<DedupKey>,
    limit: Option<usize>,
}

impl MessageLog {
    /// Create an unbounded log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log retaining at most `limit` messages (oldest evicted first).
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit.max(1)),
            ..Self::default()
        }
    }

    /// Merge a server snapshot into the log.
    ///
    /// Returns the number of new messages still retained afterwards.
    pub fn load_history<I>(&mut self, messages: I) -> usize
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        let inserted: Vec<DedupKey> = messages
            .into_iter()
            .filter_map(|msg| self.insert(msg))
            .collect();
        self.evict();
        let added = inserted.iter().filter(|key| self.keys.contains(key)).count();
        tracing::debug!(added, total = self.entries.len(), "Merged history snapshot");
        added
    }

    /// Insert one live message.
    ///
    /// Returns `false` if the log is unchanged: the message was a duplicate,
    /// blank, or older than everything a full log retains.
    pub fn append(&mut self, msg: ChatMessage) -> bool {
        let Some(key) = self.insert(msg) else {
            return false;
        };
        self.evict();
        self.keys.contains(&key)
    }

    /// Current ordered view.
    #[must_use]
    pub fn all(&self) -> &[ChatMessage] {
        &self.entries
    }

    /// Whether a message sharing any dedup key is present.
    #[must_use]
    pub fn contains(&self, msg: &ChatMessage) -> bool {
        msg.dedup_keys().any(|key| self.keys.contains(&key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert unless blank or already known. Returns the composite key.
    fn insert(&mut self, msg: ChatMessage) -> Option<DedupKey> {
        if msg.is_blank() {
            tracing::warn!(sender = %msg.sender, "Dropping blank message");
            return None;
        }
        if self.contains(&msg) {
            return None;
        }
        self.keys.extend(msg.dedup_keys());
        let pos = self
            .entries
            .partition_point(|existing| existing.timestamp <= msg.timestamp);
        let key = msg.composite_key();
        self.entries.insert(pos, msg);
        Some(key)
    }

    fn evict(&mut self) {
        let Some(limit) = self.limit else {
            return;
        };
        let excess = self.entries.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }
        for old in self.entries.drain(..excess) {
            for key in old.dedup_keys() {
                self.keys.remove(&key);
            }
        }
    }
}
