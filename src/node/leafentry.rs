//! Leaf Entries
//!
//! One leaf entry holds everything a leaf knows about a key. Its packed form
//! is a persisted contract and is copied byte-for-byte through the partition
//! codec.
//!
//! ```text
//! LE_CLEAN: ┌─────┬────────────┬────────────┬─────┬───────┐
//!           │ 0u8 │ keylen u32 │ vallen u32 │ key │ value │
//!           └─────┴────────────┴────────────┴─────┴───────┘
//!
//! LE_MVCC:  ┌─────┬────────────┬──────────────┬─────────────┬─────┬─────────────┐
//!           │ 1u8 │ keylen u32 │ num_cxrs u32 │ num_pxrs u8 │ key │ records ... │
//!           └─────┴────────────┴──────────────┴─────────────┴─────┴─────────────┘
//!
//! record:   xid u64 | op u8 (1 = insert, 2 = delete) | insert only: vallen u32 | value
//! ```
//!
//! Committed records come first (outermost first), then provisional ones.
//! An MVCC entry always carries at least one committed record.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{FtError, Result};

use super::TxnId;

pub const LE_CLEAN: u8 = 0;
pub const LE_MVCC: u8 = 1;

const OP_INSERT: u8 = 1;
const OP_DELETE: u8 = 2;

pub(crate) const CLEAN_HEADER: usize = 1 + 4 + 4;
pub(crate) const MVCC_HEADER: usize = 1 + 4 + 4 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Insert(Vec<u8>),
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnRecord {
    pub xid: TxnId,
    pub op: TxnOp,
}

impl TxnRecord {
    pub fn insert(xid: u64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            xid: TxnId(xid),
            op: TxnOp::Insert(value.into()),
        }
    }

    pub fn delete(xid: u64) -> Self {
        Self {
            xid: TxnId(xid),
            op: TxnOp::Delete,
        }
    }

    fn disk_size(&self) -> usize {
        match &self.op {
            TxnOp::Insert(value) => 8 + 1 + 4 + value.len(),
            TxnOp::Delete => 8 + 1,
        }
    }
}

/// Owned leaf entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafEntry {
    Clean {
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Mvcc {
        key: Vec<u8>,
        committed: Vec<TxnRecord>,
        provisional: Vec<TxnRecord>,
    },
}

impl LeafEntry {
    pub fn clean(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        LeafEntry::Clean {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn mvcc(
        key: impl Into<Vec<u8>>,
        committed: Vec<TxnRecord>,
        provisional: Vec<TxnRecord>,
    ) -> Result<Self> {
        let entry = LeafEntry::Mvcc {
            key: key.into(),
            committed,
            provisional,
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn key(&self) -> &[u8] {
        match self {
            LeafEntry::Clean { key, .. } | LeafEntry::Mvcc { key, .. } => key,
        }
    }

    /// Value visible to the innermost transaction, `None` if it deleted the key
    pub fn latest_value(&self) -> Option<&[u8]> {
        match self {
            LeafEntry::Clean { value, .. } => Some(value),
            LeafEntry::Mvcc {
                committed,
                provisional,
                ..
            } => match &provisional.last().or(committed.last())?.op {
                TxnOp::Insert(value) => Some(value),
                TxnOp::Delete => None,
            },
        }
    }

    /// Check the limits the packed form can express
    pub fn validate(&self) -> Result<()> {
        if self.key().len() > u32::MAX as usize {
            return Err(FtError::InvalidState("leaf entry key exceeds u32".to_string()));
        }
        if let LeafEntry::Mvcc {
            committed,
            provisional,
            ..
        } = self
        {
            if committed.is_empty() {
                return Err(FtError::InvalidState(
                    "MVCC leaf entry needs at least one committed record".to_string(),
                ));
            }
            if provisional.len() > u8::MAX as usize {
                return Err(FtError::InvalidState(format!(
                    "{} provisional records exceed the limit of {}",
                    provisional.len(),
                    u8::MAX
                )));
            }
        }
        Ok(())
    }

    /// Exact packed size
    pub fn disk_size(&self) -> usize {
        match self {
            LeafEntry::Clean { key, value } => CLEAN_HEADER + key.len() + value.len(),
            LeafEntry::Mvcc {
                key,
                committed,
                provisional,
            } => {
                MVCC_HEADER
                    + key.len()
                    + committed
                        .iter()
                        .chain(provisional)
                        .map(TxnRecord::disk_size)
                        .sum::<usize>()
            }
        }
    }

    pub fn encode_into(&self, wb: &mut WriteBuffer) {
        match self {
            LeafEntry::Clean { key, value } => {
                wb.put_u8(LE_CLEAN);
                wb.put_u32(key.len() as u32);
                wb.put_u32(value.len() as u32);
                wb.put_bytes(key);
                wb.put_bytes(value);
            }
            LeafEntry::Mvcc {
                key,
                committed,
                provisional,
            } => {
                wb.put_u8(LE_MVCC);
                wb.put_u32(key.len() as u32);
                wb.put_u32(committed.len() as u32);
                wb.put_u8(provisional.len() as u8);
                wb.put_bytes(key);
                for record in committed.iter().chain(provisional) {
                    wb.put_u64(record.xid.0);
                    match &record.op {
                        TxnOp::Insert(value) => {
                            wb.put_u8(OP_INSERT);
                            wb.put_len_prefixed(value);
                        }
                        TxnOp::Delete => wb.put_u8(OP_DELETE),
                    }
                }
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let mut wb = WriteBuffer::new(self.disk_size());
        self.encode_into(&mut wb);
        Ok(wb.finish())
    }

    /// Decode exactly one packed entry
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut rb = ReadBuffer::new(bytes);
        let entry = Self::read(&mut rb)?;
        rb.expect_end("leaf entry")?;
        Ok(entry)
    }

    fn read(rb: &mut ReadBuffer<'_>) -> Result<Self> {
        match rb.get_u8()? {
            LE_CLEAN => {
                let keylen = rb.get_u32()? as usize;
                let vallen = rb.get_u32()? as usize;
                let key = rb.get_bytes(keylen)?.to_vec();
                let value = rb.get_bytes(vallen)?.to_vec();
                Ok(LeafEntry::Clean { key, value })
            }
            LE_MVCC => {
                let keylen = rb.get_u32()? as usize;
                let num_cxrs = rb.get_u32()? as usize;
                let num_pxrs = rb.get_u8()? as usize;
                check_record_count(num_cxrs, rb.remaining())?;
                let key = rb.get_bytes(keylen)?.to_vec();
                let mut committed = Vec::with_capacity(num_cxrs);
                for _ in 0..num_cxrs {
                    committed.push(read_record(rb)?);
                }
                let mut provisional = Vec::with_capacity(num_pxrs);
                for _ in 0..num_pxrs {
                    provisional.push(read_record(rb)?);
                }
                Ok(LeafEntry::Mvcc {
                    key,
                    committed,
                    provisional,
                })
            }
            tag => Err(FtError::BadFormat(format!("unknown leaf entry tag {}", tag))),
        }
    }
}

fn check_record_count(num_cxrs: usize, remaining: usize) -> Result<()> {
    if num_cxrs == 0 {
        return Err(FtError::BadFormat(
            "MVCC leaf entry without committed records".to_string(),
        ));
    }
    // Each record takes at least 9 bytes; reject counts the buffer cannot hold.
    if num_cxrs > remaining / 9 {
        return Err(FtError::BadFormat(format!(
            "MVCC leaf entry claims {} committed records in {} bytes",
            num_cxrs, remaining
        )));
    }
    Ok(())
}

fn read_record(rb: &mut ReadBuffer<'_>) -> Result<TxnRecord> {
    let xid = TxnId(rb.get_u64()?);
    let op = match rb.get_u8()? {
        OP_INSERT => TxnOp::Insert(rb.get_len_prefixed()?.to_vec()),
        OP_DELETE => TxnOp::Delete,
        op => {
            return Err(FtError::BadFormat(format!(
                "unknown transaction record op {}",
                op
            )))
        }
    };
    Ok(TxnRecord { xid, op })
}

fn skip_record(rb: &mut ReadBuffer<'_>) -> Result<()> {
    rb.get_u64()?;
    match rb.get_u8()? {
        OP_INSERT => {
            rb.get_len_prefixed()?;
            Ok(())
        }
        OP_DELETE => Ok(()),
        op => Err(FtError::BadFormat(format!(
            "unknown transaction record op {}",
            op
        ))),
    }
}

/// Extent of one packed entry inside a larger buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryExtent {
    pub len: usize,
    pub key_offset: usize,
    pub key_len: usize,
}

/// Walk the packed entry starting at the cursor without copying it.
///
/// Offsets in the returned extent are relative to where the entry starts.
pub(crate) fn scan_entry(rb: &mut ReadBuffer<'_>) -> Result<EntryExtent> {
    let start = rb.position();
    let (key_offset, key_len) = match rb.get_u8()? {
        LE_CLEAN => {
            let keylen = rb.get_u32()? as usize;
            let vallen = rb.get_u32()? as usize;
            rb.get_bytes(keylen)?;
            rb.get_bytes(vallen)?;
            (CLEAN_HEADER, keylen)
        }
        LE_MVCC => {
            let keylen = rb.get_u32()? as usize;
            let num_cxrs = rb.get_u32()? as usize;
            let num_pxrs = rb.get_u8()? as usize;
            check_record_count(num_cxrs, rb.remaining())?;
            rb.get_bytes(keylen)?;
            for _ in 0..num_cxrs + num_pxrs {
                skip_record(rb)?;
            }
            (MVCC_HEADER, keylen)
        }
        tag => return Err(FtError::BadFormat(format!("unknown leaf entry tag {}", tag))),
    };
    Ok(EntryExtent {
        len: rb.position() - start,
        key_offset,
        key_len,
    })
}
