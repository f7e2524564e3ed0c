//! Lock targets and lock claims.

use crate::core::time::Timestamp;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The (row, column) position a lock protects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyColumn {
    key: Bytes,
    column: Bytes,
}

impl KeyColumn {
    pub fn new(key: impl Into<Bytes>, column: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            column: column.into(),
        }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn column(&self) -> &Bytes {
        &self.column
    }
}

impl fmt::Display for KeyColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KeyColumn[k=0x{}, c=0x{}]",
            hex::encode(&self.key),
            hex::encode(&self.column)
        )
    }
}

/// One attempt to take a lock: when it was written and by whom.
///
/// Claims are totally ordered by timestamp, then by requester id compared
/// byte-wise. For any target the smallest claim holds the lock.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimestampRid {
    timestamp: Timestamp,
    #[serde(with = "hex_bytes")]
    rid: Bytes,
}

impl TimestampRid {
    pub fn new(timestamp: Timestamp, rid: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            rid: rid.into(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn rid(&self) -> &Bytes {
        &self.rid
    }
}

impl fmt::Display for TimestampRid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", display_rid(&self.rid), self.timestamp)
    }
}

/// Render a requester id as text when printable, hex otherwise.
pub fn display_rid(rid: &[u8]) -> String {
    match std::str::from_utf8(rid) {
        Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) && !s.is_empty() => s.to_string(),
        _ => format!("0x{}", hex::encode(rid)),
    }
}

mod hex_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_rid_printable() {
        assert_eq!(display_rid(b"node-a"), "node-a");
    }

    #[test]
    fn test_display_rid_binary_as_hex() {
        assert_eq!(display_rid(b"\x00\x01"), "0x0001");
        assert_eq!(display_rid(b"two words"), "0x74776f20776f726473");
        assert_eq!(display_rid(b""), "0x");
    }

    #[test]
    fn test_claims_order_by_timestamp_then_rid() {
        let early = TimestampRid::new(Timestamp::from_micros(1), &b"z"[..]);
        let late_a = TimestampRid::new(Timestamp::from_micros(2), &b"a"[..]);
        let late_b = TimestampRid::new(Timestamp::from_micros(2), &b"b"[..]);
        assert!(early < late_a);
        assert!(late_a < late_b);
    }
}
