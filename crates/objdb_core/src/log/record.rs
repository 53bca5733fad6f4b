//! Commit log records.
//!
//! ```text
//! | magic "OL" | version: u8 | kind: u8 | len: u32 LE | payload: len bytes | crc32: u32 LE |
//! ```
//!
//! The checksum covers everything before it.

use crate::error::CoreError;
use crate::types::{CollectionIndex, SequenceNumber};
use std::sync::Arc;

/// Magic prefix of every record.
pub const LOG_MAGIC: [u8; 2] = *b"OL";

/// Current record format version.
pub const LOG_VERSION: u8 = 1;

pub(crate) const HEADER_LEN: usize = 8;
pub(crate) const TRAILER_LEN: usize = 4;

/// Bytes a `Put` record adds on top of its body.
pub(crate) const PUT_OVERHEAD: u64 = (HEADER_LEN + 2 + 8 + TRAILER_LEN) as u64;

/// Record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Insert or replace an object.
    Put = 1,
    /// Remove an object.
    Delete = 2,
    /// Remove every object of a collection.
    Clear = 3,
    /// Ends a batch; everything since the previous commit becomes durable.
    Commit = 4,
}

impl RecordKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Delete),
            3 => Some(Self::Clear),
            4 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// One logged mutation or commit marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Insert or replace.
    Put {
        /// Collection.
        collection: CollectionIndex,
        /// Object id.
        id: i64,
        /// Encoded object.
        body: Arc<[u8]>,
    },
    /// Removal.
    Delete {
        /// Collection.
        collection: CollectionIndex,
        /// Object id.
        id: i64,
    },
    /// Removal of all objects.
    Clear {
        /// Collection.
        collection: CollectionIndex,
    },
    /// Batch terminator.
    Commit {
        /// Sequence number of the committed transaction.
        sequence: SequenceNumber,
    },
}

/// Result of decoding at some offset.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A record and the number of bytes it occupied.
    Record(LogRecord, usize),
    /// Too short or not starting with the magic: the tail of an
    /// interrupted write.
    Torn,
    /// Complete frame of the given length whose checksum does not match.
    Damaged(usize),
    /// A well-formed record that cannot be interpreted.
    Invalid(CoreError),
}

impl LogRecord {
    /// Kind tag.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Put { .. } => RecordKind::Put,
            Self::Delete { .. } => RecordKind::Delete,
            Self::Clear { .. } => RecordKind::Clear,
            Self::Commit { .. } => RecordKind::Commit,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::Put { body, .. } => 2 + 8 + body.len(),
            Self::Delete { .. } => 2 + 8,
            Self::Clear { .. } => 2,
            Self::Commit { .. } => 8,
        }
    }

    /// Bytes this record occupies in the log.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload_len() + TRAILER_LEN
    }

    /// Appends the framed record to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&LOG_MAGIC);
        out.push(LOG_VERSION);
        out.push(self.kind() as u8);
        out.extend_from_slice(&(self.payload_len() as u32).to_le_bytes());
        match self {
            Self::Put {
                collection,
                id,
                body,
            } => {
                out.extend_from_slice(&collection.to_le_bytes());
                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(body);
            }
            Self::Delete { collection, id } => {
                out.extend_from_slice(&collection.to_le_bytes());
                out.extend_from_slice(&id.to_le_bytes());
            }
            Self::Clear { collection } => out.extend_from_slice(&collection.to_le_bytes()),
            Self::Commit { sequence } => out.extend_from_slice(&sequence.0.to_le_bytes()),
        }
        let crc = crc32fast::hash(&out[start..]);
        out.extend_from_slice(&crc.to_le_bytes());
    }

    /// Decodes the record at the start of `bytes`.
    pub(crate) fn decode(bytes: &[u8]) -> Decoded {
        if bytes.len() < HEADER_LEN || bytes[..2] != LOG_MAGIC {
            return Decoded::Torn;
        }
        let version = bytes[2];
        if version > LOG_VERSION {
            return Decoded::Invalid(CoreError::version(format!(
                "log record version {version} is newer than supported {LOG_VERSION}"
            )));
        }
        let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let total = HEADER_LEN + len + TRAILER_LEN;
        if bytes.len() < total {
            return Decoded::Torn;
        }
        let body_end = HEADER_LEN + len;
        let stored = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        if crc32fast::hash(&bytes[..body_end]) != stored {
            return Decoded::Damaged(total);
        }

        let payload = &bytes[HEADER_LEN..body_end];
        match Self::decode_payload(bytes[3], payload) {
            Some(record) => Decoded::Record(record, total),
            None => Decoded::Invalid(CoreError::corrupted(format!(
                "record kind {} with {len} byte payload",
                bytes[3]
            ))),
        }
    }

    fn decode_payload(kind: u8, payload: &[u8]) -> Option<Self> {
        let collection = || payload.get(..2).map(|b| u16::from_le_bytes([b[0], b[1]]));
        let id = || {
            payload
                .get(2..10)
                .and_then(|b| b.try_into().ok())
                .map(i64::from_le_bytes)
        };
        match RecordKind::from_byte(kind)? {
            RecordKind::Put => Some(Self::Put {
                collection: collection()?,
                id: id()?,
                body: Arc::from(payload.get(10..)?),
            }),
            RecordKind::Delete if payload.len() == 10 => Some(Self::Delete {
                collection: collection()?,
                id: id()?,
            }),
            RecordKind::Clear if payload.len() == 2 => Some(Self::Clear {
                collection: collection()?,
            }),
            RecordKind::Commit => {
                let seq: [u8; 8] = payload.try_into().ok()?;
                Some(Self::Commit {
                    sequence: SequenceNumber(u64::from_le_bytes(seq)),
                })
            }
            _ => None,
        }
    }
}
