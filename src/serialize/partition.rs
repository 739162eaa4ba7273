//! Partition codec
//!
//! ```text
//! Leaf:     ┌──────┬───────────┬──────────────────────────┬──────────────┐
//!           │ 0xaa │ count u32 │ packed leaf entries      │ checksum u32 │
//!           └──────┴───────────┴──────────────────────────┴──────────────┘
//! Internal: ┌──────┬───────────┬──────────────────────────┬──────────────┐
//!           │ 0xbb │ count u32 │ messages (enqueue order) │ checksum u32 │
//!           └──────┴───────────┴──────────────────────────┴──────────────┘
//!
//! Message:  type u8 | fresh u8 | msn u64 | xids | key (len u32) | value (len u32)
//! xids:     count u8 | txnid u64 * count
//! ```
//! Layout 19 messages have no fresh flag (read as fresh); layouts 17 and 18
//! have neither fresh flag nor msn (msn is assigned during upgrade).

use crate::buffer::{try_alloc, ReadBuffer, WriteBuffer};
use crate::checksum::{verify_trailing, CHECKSUM_SIZE};
use crate::error::{FtError, Result};
use crate::node::{
    Basement, Comparator, Message, MessageBuffer, MessageKind, Msn, Node, PartitionData,
    PartitionState, TxnId, Xids,
};

use super::version::LayoutSchema;

pub const LEAF_PARTITION_TAG: u8 = 0xaa;
pub const INTERNAL_PARTITION_TAG: u8 = 0xbb;

const PARTITION_PREFIX: usize = 1 + 4;

/// Exact uncompressed size of a partition payload
pub fn partition_size(data: &PartitionData) -> usize {
    let body = match data {
        PartitionData::Leaf(basement) => basement.disk_size(),
        PartitionData::Internal(buffer) => buffer.disk_size(),
    };
    PARTITION_PREFIX + body + CHECKSUM_SIZE
}

/// Payload of one available partition of `node`
pub fn serialize_partition(node: &Node, child: usize) -> Result<Vec<u8>> {
    match &node.partition(child)?.state {
        PartitionState::Available(data) => Ok(encode_partition(data)),
        state => Err(FtError::InvalidState(format!(
            "partition {} is {}, not available",
            child,
            state.name()
        ))),
    }
}

pub(crate) fn encode_partition(data: &PartitionData) -> Vec<u8> {
    let mut wb = WriteBuffer::new(partition_size(data));
    wb.start_checksum();
    match data {
        PartitionData::Leaf(basement) => {
            wb.put_u8(LEAF_PARTITION_TAG);
            wb.put_u32(basement.len() as u32);
            basement.write_entries(&mut wb);
        }
        PartitionData::Internal(buffer) => {
            wb.put_u8(INTERNAL_PARTITION_TAG);
            wb.put_u32(buffer.len() as u32);
            for message in buffer.messages() {
                write_message(&mut wb, message);
            }
        }
    }
    wb.put_checksum();
    wb.finish()
}

/// Decode a partition payload.
///
/// Message buffers are indexed only when `cmp` is given.
pub fn deserialize_partition(
    raw: &[u8],
    is_leaf: bool,
    schema: &LayoutSchema,
    cmp: Option<&Comparator>,
) -> Result<PartitionData> {
    let body = verify_trailing(raw, "partition")?;
    let mut rb = ReadBuffer::new(body);
    let tag = rb.get_u8()?;
    let count = rb.get_u32()? as usize;

    match (tag, is_leaf) {
        (LEAF_PARTITION_TAG, true) => {
            let packed = rb.rest();
            let mut pool = try_alloc(packed.len())?;
            pool.extend_from_slice(packed);
            Ok(PartitionData::Leaf(Basement::from_packed(pool, count)?))
        }
        (INTERNAL_PARTITION_TAG, false) => {
            let messages = read_messages(&mut rb, count, schema)?;
            rb.expect_end("message buffer")?;
            Ok(PartitionData::Internal(MessageBuffer::from_messages(messages, cmp)))
        }
        (tag, is_leaf) => Err(FtError::BadFormat(format!(
            "partition tag {:#04x} in a {} node",
            tag,
            if is_leaf { "leaf" } else { "internal" }
        ))),
    }
}

// =============================================================================
// Messages
// =============================================================================

pub(crate) fn write_message(wb: &mut WriteBuffer, message: &Message) {
    wb.put_u8(message.kind as u8);
    wb.put_u8(message.fresh as u8);
    wb.put_u64(message.msn.0);
    wb.put_u8(message.xids.depth() as u8);
    for xid in message.xids.ids() {
        wb.put_u64(xid.0);
    }
    wb.put_len_prefixed(&message.key);
    wb.put_len_prefixed(&message.value);
}

fn min_message_size(schema: &LayoutSchema) -> usize {
    let mut size = 1 + 1 + 4 + 4;
    if schema.message_fresh {
        size += 1;
    }
    if schema.message_msn {
        size += 8;
    }
    size
}

/// Read `count` messages laid out per `schema`
pub(crate) fn read_messages(
    rb: &mut ReadBuffer<'_>,
    count: usize,
    schema: &LayoutSchema,
) -> Result<Vec<Message>> {
    if count > rb.remaining() / min_message_size(schema) {
        return Err(FtError::BadFormat(format!(
            "message buffer claims {} messages in {} bytes",
            count,
            rb.remaining()
        )));
    }
    let mut messages = Vec::with_capacity(count);
    for _ in 0..count {
        messages.push(read_message(rb, schema)?);
    }
    Ok(messages)
}

fn read_message(rb: &mut ReadBuffer<'_>, schema: &LayoutSchema) -> Result<Message> {
    let kind = MessageKind::from_u8(rb.get_u8()?)?;
    let fresh = if schema.message_fresh {
        match rb.get_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(FtError::BadFormat(format!("bad fresh flag {}", other)));
            }
        }
    } else {
        true
    };
    let msn = if schema.message_msn {
        Msn(rb.get_u64()?)
    } else {
        Msn::ZERO
    };
    let depth = rb.get_u8()? as usize;
    let mut ids = Vec::with_capacity(depth);
    for _ in 0..depth {
        ids.push(TxnId(rb.get_u64()?));
    }
    let key = rb.get_len_prefixed()?.to_vec();
    let value = rb.get_len_prefixed()?.to_vec();
    Ok(Message {
        kind,
        msn,
        xids: Xids::new(ids)?,
        key,
        value,
        fresh,
    })
}
