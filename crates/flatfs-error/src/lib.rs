#![forbid(unsafe_code)]
//! Error types for FlatFS.
//!
//! FlatFS uses a two-layer error model:
//!
//! | Layer   | Type          | Crate          | Purpose |
//! |---------|---------------|----------------|---------|
//! | Parsing | `ParseError`  | `flatfs-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `FlatFsError` | this crate     | User-facing errors for the shell and API consumers |
//!
//! `flatfs-error` is intentionally independent of `flatfs-types` to avoid
//! cyclic dependencies; the conversion from `ParseError` happens in
//! `flatfs-core`, which depends on both.
//!
//! Free-list exhaustion and over-long names are typed variants rather than
//! process-terminating conditions, so the calling session decides whether
//! to continue:
//!
//! - recoverable operator errors: `NotFound`, `Exists`, `NameTooLong`,
//!   `InvalidName`, `FileTooLarge`, `DirectoryFull`, `NoSpace`
//! - startup/mount failures: `Format`, `InvalidGeometry`, `Parse`
//! - invariant violations in a live volume: `Corruption`

use thiserror::Error;

/// Unified error type for all FlatFS operations.
///
/// Internal crate-specific errors (e.g. `ParseError` from `flatfs-types`)
/// are converted into `FlatFsError` at crate boundaries.
#[derive(Debug, Error)]
pub enum FlatFsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid on-disk format (bad magic, malformed superblock).
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Region sizes or record layout out of range for the image.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Parse-layer error surfaced to the user.
    ///
    /// Carries the string representation of a `ParseError` from
    /// `flatfs-types`. Prefer `Format` or `Corruption` when the
    /// mount-validation or image-offset context is known.
    #[error("parse error: {0}")]
    Parse(String),

    /// Allocation state contradiction detected on a live volume
    /// (double free, bitmap/free-list disagreement, truncated record slot).
    #[error("corrupt volume state at index {index}: {detail}")]
    Corruption { index: u64, detail: String },

    /// No free inodes or data blocks remain.
    #[error("no space left on volume")]
    NoSpace,

    /// File name not present in the directory.
    #[error("not found: {0}")]
    NotFound(String),

    /// Target name already exists in the directory.
    #[error("already exists: {0}")]
    Exists(String),

    /// Name exceeds the fixed directory-entry name width.
    #[error("name too long: {len} bytes exceeds limit of {max}")]
    NameTooLong { len: usize, max: usize },

    /// Name is empty or otherwise unrepresentable in an entry record.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// The directory's single data block has no free entry slot.
    #[error("directory full: all {capacity} entry slots in use")]
    DirectoryFull { capacity: usize },

    /// Write larger than a file's single data block.
    #[error("file too large: {size} bytes exceeds block capacity of {max}")]
    FileTooLarge { size: usize, max: usize },
}

impl FlatFsError {
    /// Whether the session can continue after reporting this error.
    ///
    /// Recoverable errors leave the volume unchanged; the read loop keeps
    /// going. Everything else indicates a broken image or broken invariant
    /// and the caller should stop trusting the volume.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoSpace
                | Self::NotFound(_)
                | Self::Exists(_)
                | Self::NameTooLong { .. }
                | Self::InvalidName(_)
                | Self::DirectoryFull { .. }
                | Self::FileTooLarge { .. }
        )
    }
}

/// Result alias using `FlatFsError`.
pub type Result<T> = std::result::Result<T, FlatFsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formatting() {
        let err = FlatFsError::Corruption {
            index: 42,
            detail: "double free".into(),
        };
        assert_eq!(err.to_string(), "corrupt volume state at index 42: double free");

        assert_eq!(
            FlatFsError::NameTooLong { len: 140, max: 120 }.to_string(),
            "name too long: 140 bytes exceeds limit of 120"
        );
        assert_eq!(
            FlatFsError::NotFound("missing".into()).to_string(),
            "not found: missing"
        );
        assert_eq!(FlatFsError::NoSpace.to_string(), "no space left on volume");
    }

    #[test]
    fn recoverability_split_matches_taxonomy() {
        let recoverable = [
            FlatFsError::NoSpace,
            FlatFsError::NotFound("a".into()),
            FlatFsError::Exists("a".into()),
            FlatFsError::NameTooLong { len: 1, max: 0 },
            FlatFsError::InvalidName("".into()),
            FlatFsError::DirectoryFull { capacity: 32 },
            FlatFsError::FileTooLarge { size: 5000, max: 4096 },
        ];
        for err in recoverable {
            assert!(err.is_recoverable(), "{err} should be recoverable");
        }

        let fatal = [
            FlatFsError::Format("bad magic".into()),
            FlatFsError::InvalidGeometry("regions exceed image".into()),
            FlatFsError::Parse("truncated".into()),
            FlatFsError::Corruption {
                index: 0,
                detail: "bitmap disagreement".into(),
            },
            FlatFsError::Io(std::io::Error::other("boom")),
        ];
        for err in fatal {
            assert!(!err.is_recoverable(), "{err} should not be recoverable");
        }
    }
}
