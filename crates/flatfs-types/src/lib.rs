#![forbid(unsafe_code)]
//! Shared newtypes, parse errors, and on-disk constants for FlatFS.
//!
//! Pure data crate — no I/O, no dependencies on the rest of the workspace.
//! Everything that both the on-disk layer and the volume layer need to
//! agree on lives here.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Magic number at the start of the superblock region.
pub const FLATFS_MAGIC: u32 = 0xF1A7_F500;

/// Fixed block size in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Inode slots per block; one inode record occupies one sector.
pub const SECTORS_PER_BLOCK: usize = 32;

/// Inode record slot granularity in bytes.
pub const SECTOR_SIZE: usize = BLOCK_SIZE / SECTORS_PER_BLOCK;

/// Maximum directory-entry name length in bytes.
pub const NAME_MAX: usize = 120;

/// Total size of a FlatFS image in bytes.
pub const IMAGE_SIZE: usize = 1_000_000;

/// Total blocks addressable in the image (truncating division).
pub const TOTAL_BLOCKS: usize = IMAGE_SIZE / BLOCK_SIZE;

/// Serialized superblock record length in bytes.
pub const SUPERBLOCK_RECORD_SIZE: usize = 44;

/// Serialized inode record length in bytes (padded to `SECTOR_SIZE` on disk).
pub const INODE_RECORD_SIZE: usize = 40;

/// Serialized directory entry record length in bytes.
pub const DIR_ENTRY_RECORD_SIZE: usize = NAME_MAX + 8;

/// Directory entries that fit in one data block.
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIR_ENTRY_RECORD_SIZE;

/// Inode number (identity of an inode record, stable for its lifetime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u64);

/// Data block number, relative to the start of the data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

impl InodeNumber {
    /// Bitmap/free-list index for this inode number.
    pub fn to_index(self) -> Result<u32, ParseError> {
        u32::try_from(self.0).map_err(|_| ParseError::IntegerConversion {
            field: "inode_number",
        })
    }
}

impl BlockNumber {
    /// Bitmap/free-list index for this block number.
    pub fn to_index(self) -> Result<u32, ParseError> {
        u32::try_from(self.0).map_err(|_| ParseError::IntegerConversion {
            field: "block_number",
        })
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-disk format violation detected while parsing a byte slice.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

/// Borrow `len` bytes at `offset`, or report how much was missing.
#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

/// Decode a NUL-padded fixed-width name field.
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}
