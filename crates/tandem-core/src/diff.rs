//! Diff file naming and binary container.
//!
//! A diff file is a magic + version prefix followed by checksummed frames:
//!
//! ```text
//! "TDIF" | version u16 LE | frame*
//! frame = tag u8 | len u32 LE | xxh3-64(body) u64 LE | body
//! ```
//!
//! The first frame is the header (tag 1), every following frame one
//! transaction (tag 2), in commit order.

use crate::error::{Result, TandemError};
use crate::registry::KindRegistry;
use crate::types::{Checkpoint, Transaction};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

pub const DIFF_FILE_PREFIX: &str = "commit_diff_until_";
pub const DIFF_FILE_MAGIC: &[u8; 4] = b"TDIF";
pub const DIFF_FILE_VERSION: u16 = 1;

/// Blob metadata keys written alongside every diff file.
pub const LOWER_BOUND_CHECKPOINT: &str = "lower_bound_checkpoint";
pub const UPPER_BOUND_CHECKPOINT: &str = "upper_bound_checkpoint";
pub const TRANSACTION_COUNT: &str = "transaction_count";

const TAG_HEADER: u8 = 1;
const TAG_TRANSACTION: u8 = 2;
const FRAME_OVERHEAD: usize = 1 + 4 + 8;

/// Blob name of the diff file ending at an upper checkpoint.
///
/// Times are rendered with fixed millisecond width in UTC, so name order is
/// time order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiffFileName {
    upper: DateTime<Utc>,
}

impl DiffFileName {
    pub fn for_checkpoint(upper: DateTime<Utc>) -> Self {
        Self { upper }
    }

    pub fn parse(name: &str) -> Result<Self> {
        let stamp = name.strip_prefix(DIFF_FILE_PREFIX).ok_or_else(|| {
            TandemError::InvalidArgument(format!("{name} is not a diff file name"))
        })?;
        let upper = DateTime::parse_from_rfc3339(stamp)
            .map_err(|e| TandemError::InvalidArgument(format!("{name}: {e}")))?
            .with_timezone(&Utc);
        let parsed = Self { upper };
        if parsed.to_string() != name {
            return Err(TandemError::InvalidArgument(format!(
                "{name} is not in canonical form, expected {parsed}"
            )));
        }
        Ok(parsed)
    }

    pub fn upper(&self) -> DateTime<Utc> {
        self.upper
    }
}

impl fmt::Display for DiffFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DIFF_FILE_PREFIX}{}", format_time(self.upper))
    }
}

/// Canonical text form of an instant used in names and blob metadata.
pub fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TandemError::Deserialization(format!("bad timestamp {text:?}: {e}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffFileHeader {
    /// Upper time of the previous diff file (start of time for the first).
    pub lower: DateTime<Utc>,
    pub upper: Checkpoint,
}

/// Decoded contents of one diff file.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffFile {
    pub header: DiffFileHeader,
    pub transactions: Vec<Transaction>,
}

impl DiffFile {
    pub fn new(header: DiffFileHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn name(&self) -> DiffFileName {
        DiffFileName::for_checkpoint(self.header.upper.checkpoint_time)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64 + self.transactions.len() * 256);
        out.extend_from_slice(DIFF_FILE_MAGIC);
        out.extend_from_slice(&DIFF_FILE_VERSION.to_le_bytes());

        let header = serde_json::to_vec(&self.header)
            .map_err(|e| TandemError::Serialization(e.to_string()))?;
        write_frame(&mut out, TAG_HEADER, &header)?;
        for tx in &self.transactions {
            write_frame(&mut out, TAG_TRANSACTION, &tx.to_bytes()?)?;
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8], registry: &KindRegistry) -> Result<Self> {
        let mut reader = FrameReader { bytes, pos: 0 };

        if reader.take(4)? != DIFF_FILE_MAGIC {
            return Err(TandemError::Deserialization(
                "not a diff file: bad magic".to_string(),
            ));
        }
        let raw = reader.take(2)?;
        let version = u16::from_le_bytes([raw[0], raw[1]]);
        if version != DIFF_FILE_VERSION {
            return Err(TandemError::Deserialization(format!(
                "unsupported diff file version {version}"
            )));
        }

        let mut header: Option<DiffFileHeader> = None;
        let mut transactions = Vec::new();
        while let Some((tag, body)) = reader.next_frame()? {
            match (tag, &header) {
                (TAG_HEADER, None) => {
                    header = Some(serde_json::from_slice(body).map_err(|e| {
                        TandemError::Deserialization(format!("diff file header: {e}"))
                    })?);
                }
                (TAG_HEADER, Some(_)) => {
                    return Err(TandemError::Deserialization(
                        "duplicate diff file header".to_string(),
                    ));
                }
                (TAG_TRANSACTION, Some(_)) => {
                    transactions.push(Transaction::from_bytes(body, registry)?);
                }
                (TAG_TRANSACTION, None) => {
                    return Err(TandemError::Deserialization(
                        "transaction before diff file header".to_string(),
                    ));
                }
                (other, _) => {
                    return Err(TandemError::Deserialization(format!(
                        "unknown frame tag {other}"
                    )));
                }
            }
        }

        let header = header.ok_or_else(|| {
            TandemError::Deserialization("diff file has no header".to_string())
        })?;
        Ok(Self {
            header,
            transactions,
        })
    }
}

fn write_frame(out: &mut Vec<u8>, tag: u8, body: &[u8]) -> Result<()> {
    let len = u32::try_from(body.len())
        .map_err(|_| TandemError::Serialization(format!("frame of {} bytes", body.len())))?;
    out.push(tag);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&xxh3_64(body).to_le_bytes());
    out.extend_from_slice(body);
    Ok(())
}

struct FrameReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                TandemError::Deserialization(format!(
                    "diff file truncated at byte {} (wanted {n} more)",
                    self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn next_frame(&mut self) -> Result<Option<(u8, &'a [u8])>> {
        if self.pos == self.bytes.len() {
            return Ok(None);
        }
        let head = self.take(FRAME_OVERHEAD)?;
        let tag = head[0];
        let len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]) as usize;
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&head[5..13]);
        let body = self.take(len)?;
        if xxh3_64(body) != u64::from_le_bytes(checksum) {
            return Err(TandemError::Deserialization(format!(
                "checksum mismatch in frame ending at byte {}",
                self.pos
            )));
        }
        Ok(Some((tag, body)))
    }
}
