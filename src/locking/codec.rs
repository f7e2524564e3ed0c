//! On-store encoding of lock claims.
//!
//! All claims on a target `(key, column)` live in one row, the lock key,
//! derived as `u32 BE len(key) ‖ key ‖ column`. The length prefix keeps lock
//! keys of distinct targets distinct even when one target's key is a prefix
//! of another's.
//!
//! Each claim is one column `u64 BE raw timestamp ‖ rid` with an empty value.
//! Because the timestamp is fixed-width and big-endian, byte order of lock
//! columns equals claim order, so a slice over
//! `[LOCK_COL_START, LOCK_COL_END)` returns claims oldest first.

use crate::core::error::{LockFailure, LockResult, LockingError};
use crate::core::time::{Timestamp, TimestampProvider, TimestampResolution};
use crate::locking::claim::TimestampRid;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Width of the encoded timestamp.
pub const TIMESTAMP_LEN: usize = 8;

/// Inclusive lower bound of the lock column range.
pub const LOCK_COL_START: &[u8] = &[0x00];

/// Exclusive upper bound of the lock column range. Sorts after every
/// timestamp prefix.
pub const LOCK_COL_END: &[u8] = &[0xFF; TIMESTAMP_LEN + 1];

/// Converts claims and targets to and from their stored form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsistentKeyLockerSerializer;

impl ConsistentKeyLockerSerializer {
    /// Row holding every claim on `(key, column)`.
    pub fn to_lock_key(&self, key: &[u8], column: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + key.len() + column.len());
        buf.put_u32(key.len() as u32);
        buf.put_slice(key);
        buf.put_slice(column);
        buf.freeze()
    }

    /// Column for a claim written at `timestamp` by `rid`.
    pub fn to_lock_column(&self, timestamp: Timestamp, rid: &[u8], times: &dyn TimestampProvider) -> Bytes {
        self.encode_with(timestamp, rid, times.resolution())
    }

    /// Column for `claim`.
    pub fn to_lock_column_of(&self, claim: &TimestampRid, times: &dyn TimestampProvider) -> Bytes {
        self.to_lock_column(claim.timestamp(), claim.rid(), times)
    }

    /// Decode a lock column written with the same resolution as `times`.
    pub fn from_lock_column(&self, column: &[u8], times: &dyn TimestampProvider) -> LockResult<TimestampRid> {
        self.decode_with(column, times.resolution())
    }

    /// Encode with an explicit resolution.
    pub fn encode_with(&self, timestamp: Timestamp, rid: &[u8], resolution: TimestampResolution) -> Bytes {
        let mut buf = BytesMut::with_capacity(TIMESTAMP_LEN + rid.len());
        buf.put_u64(resolution.to_raw(timestamp));
        buf.put_slice(rid);
        buf.freeze()
    }

    /// Decode with an explicit resolution.
    pub fn decode_with(&self, column: &[u8], resolution: TimestampResolution) -> LockResult<TimestampRid> {
        if column.len() < TIMESTAMP_LEN {
            return Err(LockingError::permanent(LockFailure::MalformedClaim {
                column: format!("0x{}", hex::encode(column)),
            }));
        }
        let mut buf = column;
        let raw = buf.get_u64();
        Ok(TimestampRid::new(
            resolution.from_raw(raw),
            Bytes::copy_from_slice(buf),
        ))
    }
}
