#![forbid(unsafe_code)]
//! FlatFS public API facade.
//!
//! Re-exports the volume operations from `flatfs-core` together with the
//! error and record types a consumer needs, so downstream users (the CLI
//! shell included) depend on one crate.

pub use flatfs_core::*;
pub use flatfs_error::{FlatFsError, Result};
pub use flatfs_ondisk::{DirEntryRecord, DiskInode, FileKind, ImageLayout, Superblock};
pub use flatfs_types::{BLOCK_SIZE, BlockNumber, IMAGE_SIZE, InodeNumber, NAME_MAX};
