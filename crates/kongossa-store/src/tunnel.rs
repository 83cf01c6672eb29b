//! A single tunnel's bounded, deduplicated message log.
//!
//! Messages are kept oldest first by `(created_at, id)`. The log never holds
//! more than `capacity` entries; the oldest are evicted first. Evicted ids are
//! remembered for a while so that a peer still advertising them does not
//! bring them back.

use std::collections::{HashSet, VecDeque};

use kongossa_shared::{Message, MessageId, RemoteTunnel, TunnelId, TunnelSnapshot, WireEnvelope};

use crate::error::{Result, StoreError};
use crate::models::{AppendOutcome, MergeOutcome, MergeStrategy, TunnelRecord};

/// Evicted ids remembered per unit of capacity.
const TOMBSTONE_FACTOR: usize = 4;

#[derive(Debug, Clone)]
pub struct Tunnel {
    id: TunnelId,
    version: u64,
    capacity: usize,
    messages: VecDeque<Message>,
    present: HashSet<MessageId>,
    tombstones: HashSet<MessageId>,
    tombstone_order: VecDeque<MessageId>,
    churn: usize,
}

impl Tunnel {
    pub fn new(id: TunnelId, capacity: usize) -> Self {
        Self {
            id,
            version: 0,
            capacity: capacity.max(1),
            messages: VecDeque::new(),
            present: HashSet::new(),
            tombstones: HashSet::new(),
            tombstone_order: VecDeque::new(),
            churn: 0,
        }
    }

    /// Rebuild from a persisted record, re-applying the retention limit.
    pub fn from_record(record: TunnelRecord, capacity: usize) -> Self {
        let mut tunnel = Self::new(record.id, capacity);
        for message in record.messages {
            if !tunnel.present.contains(&message.id) {
                tunnel.insert_sorted(message);
            }
        }
        tunnel.evict_overflow();
        tunnel.version = record.version;
        tunnel
    }

    pub fn id(&self) -> &TunnelId {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.present.contains(id)
    }

    /// Oldest first.
    pub fn messages(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.messages.iter()
    }

    /// Append a locally authored message. Bumps the version by exactly one.
    pub fn append(&mut self, message: Message) -> Result<AppendOutcome> {
        if self.present.contains(&message.id) || self.tombstones.contains(&message.id) {
            return Err(StoreError::DuplicateMessage(message.id));
        }
        let id = message.id.clone();
        self.insert_sorted(message);
        self.version += 1;
        self.churn += 1;
        let evicted = self.evict_overflow();
        Ok(AppendOutcome {
            version: self.version,
            evicted,
            retained: self.present.contains(&id),
        })
    }

    /// Fold a remote snapshot into this tunnel.
    pub fn merge(&mut self, remote: &RemoteTunnel, strategy: MergeStrategy) -> MergeOutcome {
        match strategy {
            MergeStrategy::Union => self.merge_union(remote),
            MergeStrategy::Version => self.merge_version_wins(remote),
        }
    }

    fn merge_union(&mut self, remote: &RemoteTunnel) -> MergeOutcome {
        let version_before = self.version;
        let mut inserted = 0;
        for message in &remote.messages {
            if self.present.contains(&message.id) || self.tombstones.contains(&message.id) {
                continue;
            }
            self.insert_sorted(message.clone());
            inserted += 1;
        }
        let evicted = self.evict_overflow();
        self.version = self.version.max(remote.version);
        self.churn += inserted;

        MergeOutcome {
            inserted,
            evicted,
            replaced: false,
            version_before,
            version_after: self.version,
        }
    }

    fn merge_version_wins(&mut self, remote: &RemoteTunnel) -> MergeOutcome {
        let version_before = self.version;
        if remote.version <= self.version {
            return MergeOutcome {
                version_before,
                version_after: self.version,
                ..MergeOutcome::default()
            };
        }

        let previous = std::mem::take(&mut self.present);
        for message in self.messages.drain(..) {
            Self::remember(&mut self.tombstones, &mut self.tombstone_order, self.capacity, message.id);
        }

        let mut inserted = 0;
        for message in &remote.messages {
            if self.present.contains(&message.id) {
                continue;
            }
            // A replaced tunnel takes the remote content as-is, tombstones
            // included, so clear the id from the graveyard first.
            if self.tombstones.remove(&message.id) {
                self.tombstone_order.retain(|id| id != &message.id);
            }
            if !previous.contains(&message.id) {
                inserted += 1;
            }
            self.insert_sorted(message.clone());
        }
        let evicted = self.evict_overflow();
        self.version = remote.version;
        self.churn += inserted;

        MergeOutcome {
            inserted,
            evicted,
            replaced: true,
            version_before,
            version_after: self.version,
        }
    }

    /// Messages inserted (locally or by merge) since the last call.
    pub fn take_churn(&mut self) -> usize {
        std::mem::take(&mut self.churn)
    }

    pub fn snapshot(&self) -> TunnelSnapshot {
        TunnelSnapshot {
            version: self.version,
            messages: self.messages.iter().map(WireEnvelope::from).collect(),
        }
    }

    pub fn to_record(&self) -> TunnelRecord {
        TunnelRecord {
            id: self.id.clone(),
            version: self.version,
            messages: self.messages.iter().cloned().collect(),
        }
    }

    fn insert_sorted(&mut self, message: Message) {
        let key = (message.created_at, &message.id);
        let pos = self.messages.partition_point(|m| m.order_key() <= key);
        self.present.insert(message.id.clone());
        self.messages.insert(pos, message);
    }

    fn evict_overflow(&mut self) -> usize {
        let mut evicted = 0;
        while self.messages.len() > self.capacity {
            if let Some(oldest) = self.messages.pop_front() {
                self.present.remove(&oldest.id);
                Self::remember(&mut self.tombstones, &mut self.tombstone_order, self.capacity, oldest.id);
                evicted += 1;
            }
        }
        evicted
    }

    fn remember(
        tombstones: &mut HashSet<MessageId>,
        order: &mut VecDeque<MessageId>,
        capacity: usize,
        id: MessageId,
    ) {
        if tombstones.insert(id.clone()) {
            order.push_back(id);
        }
        while order.len() > capacity * TOMBSTONE_FACTOR {
            if let Some(expired) = order.pop_front() {
                tombstones.remove(&expired);
            }
        }
    }
}
