//! Message Buffers
//!
//! Pending messages of an internal node's partition, kept in enqueue order.
//! When a comparator is available the buffer also maintains three indexes
//! that refer to messages by position:
//!
//! - fresh: fresh, non-broadcast messages ordered by (key, msn)
//! - stale: stale, non-broadcast messages ordered by (key, msn)
//! - broadcast: broadcast messages in enqueue order

use std::cmp::Ordering;
use std::fmt;

use crate::error::{FtError, Result};

use super::{Comparator, Msn, TxnId};

// =============================================================================
// Message Kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Insert = 1,
    InsertNoOverwrite = 2,
    DeleteAny = 3,
    AbortAny = 4,
    CommitBroadcastAll = 5,
    CommitBroadcastTxn = 6,
    AbortBroadcastTxn = 7,
    Update = 8,
    UpdateBroadcastAll = 9,
    Optimize = 10,
    CommitAny = 11,
    OptimizeForUpgrade = 12,
}

impl MessageKind {
    pub fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => MessageKind::Insert,
            2 => MessageKind::InsertNoOverwrite,
            3 => MessageKind::DeleteAny,
            4 => MessageKind::AbortAny,
            5 => MessageKind::CommitBroadcastAll,
            6 => MessageKind::CommitBroadcastTxn,
            7 => MessageKind::AbortBroadcastTxn,
            8 => MessageKind::Update,
            9 => MessageKind::UpdateBroadcastAll,
            10 => MessageKind::Optimize,
            11 => MessageKind::CommitAny,
            12 => MessageKind::OptimizeForUpgrade,
            _ => return Err(FtError::BadFormat(format!("unknown message type {}", tag))),
        })
    }

    /// Broadcast messages apply to every key below the node
    pub fn is_broadcast(self) -> bool {
        matches!(
            self,
            MessageKind::CommitBroadcastAll
                | MessageKind::CommitBroadcastTxn
                | MessageKind::AbortBroadcastTxn
                | MessageKind::UpdateBroadcastAll
                | MessageKind::Optimize
                | MessageKind::OptimizeForUpgrade
        )
    }
}

// =============================================================================
// Transaction id stack
// =============================================================================

/// Stack of nested transaction ids, outermost first
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Xids(Vec<TxnId>);

impl Xids {
    pub const MAX_DEPTH: usize = u8::MAX as usize;

    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(ids: Vec<TxnId>) -> Result<Self> {
        if ids.len() > Self::MAX_DEPTH {
            return Err(FtError::InvalidState(format!(
                "transaction stack of depth {} exceeds {}",
                ids.len(),
                Self::MAX_DEPTH
            )));
        }
        Ok(Self(ids))
    }

    pub fn ids(&self) -> &[TxnId] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn disk_size(&self) -> usize {
        1 + 8 * self.0.len()
    }
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub msn: Msn,
    pub xids: Xids,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub fresh: bool,
}

impl Message {
    pub fn new(kind: MessageKind, msn: Msn, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            msn,
            xids: Xids::root(),
            key: key.into(),
            value: value.into(),
            fresh: true,
        }
    }

    pub fn with_xids(mut self, xids: Xids) -> Self {
        self.xids = xids;
        self
    }

    pub fn stale(mut self) -> Self {
        self.fresh = false;
        self
    }

    /// Packed size in the current layout:
    /// type u8 | fresh u8 | msn u64 | xids | key (len u32) | value (len u32)
    pub fn disk_size(&self) -> usize {
        1 + 1 + 8 + self.xids.disk_size() + 4 + self.key.len() + 4 + self.value.len()
    }
}

// =============================================================================
// Buffer
// =============================================================================

#[derive(Clone, Default)]
pub struct MessageBuffer {
    messages: Vec<Message>,
    fresh: Vec<usize>,
    stale: Vec<usize>,
    broadcast: Vec<usize>,
    indexed: bool,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from messages in enqueue order, indexing them if `cmp` is given
    pub fn from_messages(messages: Vec<Message>, cmp: Option<&Comparator>) -> Self {
        let mut buffer = Self {
            messages,
            ..Self::default()
        };
        if let Some(cmp) = cmp {
            buffer.build_indexes(cmp);
        }
        buffer
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, i: usize) -> Option<&Message> {
        self.messages.get(i)
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn fresh_indexes(&self) -> &[usize] {
        &self.fresh
    }

    pub fn stale_indexes(&self) -> &[usize] {
        &self.stale
    }

    pub fn broadcast_indexes(&self) -> &[usize] {
        &self.broadcast
    }

    /// Append a message. Indexes are kept current when a comparator is
    /// supplied; without one they are dropped until the next `build_indexes`.
    pub fn enqueue(&mut self, message: Message, cmp: Option<&Comparator>) {
        let position = self.messages.len();
        self.messages.push(message);
        match cmp {
            Some(cmp) if self.indexed => self.index_one(position, cmp),
            Some(cmp) => self.build_indexes(cmp),
            None => self.clear_indexes(),
        }
    }

    /// Rebuild all three indexes from the log
    pub fn build_indexes(&mut self, cmp: &Comparator) {
        self.clear_indexes();
        for (i, message) in self.messages.iter().enumerate() {
            if message.kind.is_broadcast() {
                self.broadcast.push(i);
            } else if message.fresh {
                self.fresh.push(i);
            } else {
                self.stale.push(i);
            }
        }
        let messages = &self.messages;
        let order = |a: &usize, b: &usize| compare(cmp, &messages[*a], &messages[*b]);
        self.fresh.sort_by(order);
        self.stale.sort_by(order);
        self.indexed = true;
    }

    /// Mutable view of the log. Indexes are dropped because keys or
    /// sequence numbers may change; rebuild them afterwards.
    pub(crate) fn messages_mut(&mut self) -> &mut [Message] {
        self.clear_indexes();
        &mut self.messages
    }

    pub fn clear_indexes(&mut self) {
        self.fresh.clear();
        self.stale.clear();
        self.broadcast.clear();
        self.indexed = false;
    }

    /// Packed size of every message in the current layout
    pub fn disk_size(&self) -> usize {
        self.messages.iter().map(Message::disk_size).sum()
    }

    fn index_one(&mut self, position: usize, cmp: &Comparator) {
        let messages = &self.messages;
        let message = &messages[position];
        let index = if message.kind.is_broadcast() {
            self.broadcast.push(position);
            return;
        } else if message.fresh {
            &mut self.fresh
        } else {
            &mut self.stale
        };
        let at = index.partition_point(|&i| compare(cmp, &messages[i], message) != Ordering::Greater);
        index.insert(at, position);
    }
}

fn compare(cmp: &Comparator, a: &Message, b: &Message) -> Ordering {
    cmp(&a.key, &b.key).then(a.msn.cmp(&b.msn))
}

impl PartialEq for MessageBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.messages == other.messages
    }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("messages", &self.messages)
            .field("indexed", &self.indexed)
            .finish()
    }
}
