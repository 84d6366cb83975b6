#![forbid(unsafe_code)]
//! FlatFS volume operations.
//!
//! [`Volume`] exclusively owns the in-memory image buffer, the parsed
//! superblock, the derived region layout, and the two free lists. File
//! operations hold no state across calls; they read or mutate the volume
//! and return. The whole image lives in memory for the process lifetime
//! and is persisted all-or-nothing by an explicit [`Volume::save_to`] —
//! there is no incremental flush, so mutations made after the last save
//! are lost if the process dies (accepted single-user tradeoff).
//!
//! Error policy: operator-level misses (`NotFound`, `Exists`, name and
//! capacity limits, `NoSpace`) are typed recoverable errors that leave the
//! volume unchanged. Contradictions in live allocation state surface as
//! `Corruption`.

use flatfs_alloc::{FreeList, allocate, bitmap_get, release};
use flatfs_error::{FlatFsError, Result};
use flatfs_ondisk::{
    DirEntryRecord, DiskInode, FileKind, ImageLayout, Superblock, dir_capacity, entry_slot_range,
};
use flatfs_types::{
    BlockNumber, IMAGE_SIZE, InodeNumber, NAME_MAX, ParseError, SUPERBLOCK_RECORD_SIZE,
};
use std::fs;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

/// Path spelling that makes `ls` list the whole root directory.
pub const ROOT_PATH: &str = "/";

/// Convert a mount-time `ParseError` into the startup error taxonomy:
/// a wrong magic or truncated record is a format problem, out-of-range
/// region fields are a geometry problem.
fn mount_parse_error(e: &ParseError) -> FlatFsError {
    match e {
        ParseError::InvalidField { field, .. }
            if matches!(
                *field,
                "region_blocks"
                    | "data_bytes"
                    | "root_inode"
                    | "super_blocks"
                    | "inode_bitmap_blocks"
                    | "data_bitmap_blocks"
            ) =>
        {
            FlatFsError::InvalidGeometry(e.to_string())
        }
        _ => FlatFsError::Format(e.to_string()),
    }
}

/// Convert a `ParseError` hit while reading live metadata (not mount-time).
fn live_parse_error(e: &ParseError) -> FlatFsError {
    FlatFsError::Parse(e.to_string())
}

fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name.bytes().any(|b| b == 0) {
        return Err(FlatFsError::InvalidName(name.to_owned()));
    }
    if name.len() > NAME_MAX {
        return Err(FlatFsError::NameTooLong {
            len: name.len(),
            max: NAME_MAX,
        });
    }
    Ok(())
}

/// A mounted (or freshly formatted) single-volume filesystem image.
#[derive(Debug, Clone)]
pub struct Volume {
    image: Vec<u8>,
    superblock: Superblock,
    layout: ImageLayout,
    free_inodes: FreeList,
    free_blocks: FreeList,
}

impl Volume {
    // ── Volume lifecycle ────────────────────────────────────────────────

    /// Build a fresh volume: zeroed image, superblock written, free lists
    /// seeded all-free, root directory inode created.
    pub fn format() -> Result<Self> {
        let superblock = Superblock::new_default();
        let layout = ImageLayout::from_superblock(&superblock, IMAGE_SIZE)
            .map_err(|e| mount_parse_error(&e))?;

        let mut image = vec![0u8; IMAGE_SIZE];
        superblock
            .write_to_bytes(&mut image[layout.superblock.range()])
            .map_err(|e| mount_parse_error(&e))?;

        let free_inodes = FreeList::rebuild(
            &image[layout.inode_bitmap.range()],
            superblock.inode_capacity(),
        );
        let free_blocks = FreeList::rebuild(
            &image[layout.data_bitmap.range()],
            layout.data_block_count,
        );

        let mut volume = Self {
            image,
            superblock,
            layout,
            free_inodes,
            free_blocks,
        };

        let root = volume.create_inode(FileKind::Directory)?;
        if root.i_number != volume.superblock.root_inode {
            return Err(FlatFsError::Corruption {
                index: root.i_number.0,
                detail: "fresh volume allocated a root inode other than the declared one".into(),
            });
        }

        info!(
            inodes = volume.superblock.inode_capacity(),
            data_blocks = volume.layout.data_block_count,
            "formatted volume"
        );
        Ok(volume)
    }

    /// Reconstruct a volume from a persisted image: validate the
    /// superblock, derive the layout, and rebuild both free lists by
    /// scanning the persisted bitmaps (the lists themselves are never
    /// stored on disk).
    pub fn mount(image: Vec<u8>) -> Result<Self> {
        if image.len() != IMAGE_SIZE {
            return Err(FlatFsError::Format(format!(
                "image is {} bytes, expected {IMAGE_SIZE}",
                image.len()
            )));
        }

        let superblock = Superblock::parse_from_bytes(&image[..SUPERBLOCK_RECORD_SIZE])
            .map_err(|e| mount_parse_error(&e))?;
        let layout = ImageLayout::from_superblock(&superblock, IMAGE_SIZE)
            .map_err(|e| mount_parse_error(&e))?;

        let root_idx = superblock
            .root_inode
            .to_index()
            .map_err(|e| mount_parse_error(&e))?;
        if !bitmap_get(&image[layout.inode_bitmap.range()], root_idx) {
            return Err(FlatFsError::Format(
                "root inode is not allocated in the inode bitmap".into(),
            ));
        }

        let free_inodes = FreeList::rebuild(
            &image[layout.inode_bitmap.range()],
            superblock.inode_capacity(),
        );
        let free_blocks = FreeList::rebuild(
            &image[layout.data_bitmap.range()],
            layout.data_block_count,
        );

        let volume = Self {
            image,
            superblock,
            layout,
            free_inodes,
            free_blocks,
        };

        let root = volume.root_inode()?;
        if root.kind != FileKind::Directory {
            return Err(FlatFsError::Format(
                "root inode record is not a directory".into(),
            ));
        }

        info!(
            free_inodes = volume.free_inodes.len(),
            free_blocks = volume.free_blocks.len(),
            "mounted volume"
        );
        Ok(volume)
    }

    /// Mount the image at `path`, or format a fresh volume when no backing
    /// image exists yet.
    pub fn open_or_format(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::mount(fs::read(path)?)
        } else {
            info!(path = %path.display(), "no backing image, formatting fresh volume");
            Self::format()
        }
    }

    /// Persist the entire image buffer verbatim, region order preserved.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, &self.image)?;
        info!(path = %path.display(), bytes = self.image.len(), "saved volume image");
        Ok(())
    }

    /// The raw image bytes, exactly as they would be persisted.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Free inode addresses remaining.
    #[must_use]
    pub fn free_inode_count(&self) -> usize {
        self.free_inodes.len()
    }

    /// Free data-block addresses remaining.
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        self.free_blocks.len()
    }

    // ── Region addressing ───────────────────────────────────────────────

    fn inode_slot_range(&self, ino: InodeNumber) -> Result<Range<usize>> {
        let idx = ino.to_index().map_err(|e| live_parse_error(&e))?;
        if idx >= self.superblock.inode_capacity() {
            return Err(FlatFsError::Corruption {
                index: u64::from(idx),
                detail: "inode number outside the inode table".into(),
            });
        }
        let sector = self.superblock.sector_size as usize;
        let start = self.layout.inode_table.offset + idx as usize * sector;
        Ok(start..start + sector)
    }

    fn data_block_range(&self, block: BlockNumber) -> Result<Range<usize>> {
        let idx = block.to_index().map_err(|e| live_parse_error(&e))?;
        if idx >= self.layout.data_block_count {
            return Err(FlatFsError::Corruption {
                index: u64::from(idx),
                detail: "block number outside the data region".into(),
            });
        }
        let block_size = self.superblock.block_size as usize;
        let start = self.layout.data.offset + idx as usize * block_size;
        Ok(start..start + block_size)
    }

    // ── Inode table ─────────────────────────────────────────────────────

    /// Deserialize the record at slot `ino`. No existence check happens at
    /// this layer; the bitmap tracks which slots are live.
    pub fn read_inode(&self, ino: InodeNumber) -> Result<DiskInode> {
        let slot = self.inode_slot_range(ino)?;
        DiskInode::parse_from_bytes(&self.image[slot]).map_err(|e| live_parse_error(&e))
    }

    /// Serialize the full record into its slot, replacing prior content.
    pub fn write_inode(&mut self, inode: &DiskInode) -> Result<()> {
        let slot = self.inode_slot_range(inode.i_number)?;
        let buf = &mut self.image[slot];
        buf.fill(0);
        inode.write_to_bytes(buf).map_err(|e| live_parse_error(&e))
    }

    /// Allocate an inode number and a data block as a pair, mark both
    /// bitmap bits, and persist a zero-content record.
    ///
    /// The pairing is atomic: if no data block is available the inode
    /// address goes straight back to its free list and nothing is marked.
    pub fn create_inode(&mut self, kind: FileKind) -> Result<DiskInode> {
        let inode_bitmap = self.layout.inode_bitmap.range();
        let data_bitmap = self.layout.data_bitmap.range();

        let ino_idx = allocate(&mut self.image[inode_bitmap.clone()], &mut self.free_inodes)?;
        let block_idx = match allocate(&mut self.image[data_bitmap], &mut self.free_blocks) {
            Ok(idx) => idx,
            Err(err) => {
                release(
                    &mut self.image[inode_bitmap],
                    &mut self.free_inodes,
                    ino_idx,
                )?;
                return Err(err);
            }
        };

        let inode = DiskInode {
            i_number: InodeNumber(u64::from(ino_idx)),
            size: 0,
            sub_entries: 0,
            kind,
            first_block: BlockNumber(u64::from(block_idx)),
        };
        self.write_inode(&inode)?;
        debug!(ino = %inode.i_number, block = %inode.first_block, ?kind, "created inode");
        Ok(inode)
    }

    /// Zero the inode's record slot and its data block, then return both
    /// addresses to their free lists. Zeroing happens before release so a
    /// reused address never exposes stale bytes.
    pub fn delete_inode(&mut self, ino: InodeNumber) -> Result<()> {
        let inode = self.read_inode(ino)?;

        let block = self.data_block_range(inode.first_block)?;
        self.image[block].fill(0);
        let slot = self.inode_slot_range(ino)?;
        self.image[slot].fill(0);

        let block_idx = inode
            .first_block
            .to_index()
            .map_err(|e| live_parse_error(&e))?;
        let data_bitmap = self.layout.data_bitmap.range();
        release(&mut self.image[data_bitmap], &mut self.free_blocks, block_idx)?;
        let inode_bitmap = self.layout.inode_bitmap.range();
        let ino_idx = ino.to_index().map_err(|e| live_parse_error(&e))?;
        release(&mut self.image[inode_bitmap], &mut self.free_inodes, ino_idx)?;

        debug!(ino = %ino, block = %inode.first_block, "deleted inode");
        Ok(())
    }

    // ── Directory layer ─────────────────────────────────────────────────

    fn require_directory(dir: &DiskInode) -> Result<()> {
        if dir.kind == FileKind::Directory {
            Ok(())
        } else {
            Err(FlatFsError::Corruption {
                index: dir.i_number.0,
                detail: "expected a directory inode".into(),
            })
        }
    }

    fn entry_count(dir: &DiskInode) -> Result<usize> {
        let count = usize::try_from(dir.sub_entries).map_err(|_| FlatFsError::Corruption {
            index: dir.i_number.0,
            detail: "directory entry count overflows".into(),
        })?;
        if count > dir_capacity() {
            return Err(FlatFsError::Corruption {
                index: dir.i_number.0,
                detail: "directory entry count exceeds one block of slots".into(),
            });
        }
        Ok(count)
    }

    /// Deserialize the first `sub_entries` records of the directory's
    /// single data block, in insertion order.
    pub fn list_entries(&self, dir: &DiskInode) -> Result<Vec<DirEntryRecord>> {
        Self::require_directory(dir)?;
        let count = Self::entry_count(dir)?;
        let block = &self.image[self.data_block_range(dir.first_block)?];
        (0..count)
            .map(|slot| {
                DirEntryRecord::parse_from_bytes(&block[entry_slot_range(slot)])
                    .map_err(|e| live_parse_error(&e))
            })
            .collect()
    }

    /// Linear scan for an exact, case-sensitive name match.
    pub fn find_entry(&self, dir: &DiskInode, name: &str) -> Result<Option<DirEntryRecord>> {
        Ok(self
            .list_entries(dir)?
            .into_iter()
            .find(|entry| entry.name == name))
    }

    /// Write `entry` at slot `sub_entries` and persist the bumped counter.
    fn append_entry(&mut self, dir: &mut DiskInode, entry: &DirEntryRecord) -> Result<()> {
        Self::require_directory(dir)?;
        let slot = Self::entry_count(dir)?;
        if slot >= dir_capacity() {
            return Err(FlatFsError::DirectoryFull {
                capacity: dir_capacity(),
            });
        }
        let range = self.data_block_range(dir.first_block)?;
        let block = &mut self.image[range];
        entry
            .write_to_bytes(&mut block[entry_slot_range(slot)])
            .map_err(|e| live_parse_error(&e))?;
        dir.sub_entries += 1;
        self.write_inode(dir)
    }

    /// Remove the named entry, shifting every later entry left one slot so
    /// the record sequence stays gap-free in its original relative order.
    fn remove_entry(&mut self, dir: &mut DiskInode, name: &str) -> Result<DirEntryRecord> {
        let entries = self.list_entries(dir)?;
        let pos = entries
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| FlatFsError::NotFound(name.to_owned()))?;
        let removed = entries[pos].clone();

        let range = self.data_block_range(dir.first_block)?;
        let block = &mut self.image[range];
        for slot in pos..entries.len() - 1 {
            entries[slot + 1]
                .write_to_bytes(&mut block[entry_slot_range(slot)])
                .map_err(|e| live_parse_error(&e))?;
        }
        block[entry_slot_range(entries.len() - 1)].fill(0);

        dir.sub_entries -= 1;
        self.write_inode(dir)?;
        Ok(removed)
    }

    // ── File operations ─────────────────────────────────────────────────

    /// The root directory's inode record.
    pub fn root_inode(&self) -> Result<DiskInode> {
        self.read_inode(self.superblock.root_inode)
    }

    /// Create an empty file named `name` in the root directory.
    pub fn touch(&mut self, name: &str) -> Result<InodeNumber> {
        validate_file_name(name)?;
        let mut root = self.root_inode()?;
        if self.find_entry(&root, name)?.is_some() {
            return Err(FlatFsError::Exists(name.to_owned()));
        }
        // Check the slot before allocating, so a full directory cannot
        // strand a freshly allocated inode/block pair.
        if Self::entry_count(&root)? >= dir_capacity() {
            return Err(FlatFsError::DirectoryFull {
                capacity: dir_capacity(),
            });
        }

        let inode = self.create_inode(FileKind::File)?;
        let entry = DirEntryRecord {
            name: name.to_owned(),
            i_number: inode.i_number,
        };
        if let Err(err) = self.append_entry(&mut root, &entry) {
            self.delete_inode(inode.i_number)?;
            return Err(err);
        }
        debug!(name, ino = %inode.i_number, "touch");
        Ok(inode.i_number)
    }

    /// List the root directory (`"/"`), or look up one named entry.
    pub fn ls(&self, path: &str) -> Result<Vec<DirEntryRecord>> {
        let root = self.root_inode()?;
        if path == ROOT_PATH {
            return self.list_entries(&root);
        }
        match self.find_entry(&root, path)? {
            Some(entry) => Ok(vec![entry]),
            None => Err(FlatFsError::NotFound(path.to_owned())),
        }
    }

    /// Read the file's resident bytes (up to `inode.size`).
    pub fn cat(&self, name: &str) -> Result<Vec<u8>> {
        let root = self.root_inode()?;
        let entry = self
            .find_entry(&root, name)?
            .ok_or_else(|| FlatFsError::NotFound(name.to_owned()))?;
        let inode = self.read_inode(entry.i_number)?;

        let range = self.data_block_range(inode.first_block)?;
        let size = usize::try_from(inode.size).map_err(|_| FlatFsError::Corruption {
            index: inode.i_number.0,
            detail: "inode size overflows".into(),
        })?;
        if size > range.len() {
            return Err(FlatFsError::Corruption {
                index: inode.i_number.0,
                detail: "inode size exceeds its single data block".into(),
            });
        }
        Ok(self.image[range][..size].to_vec())
    }

    /// Replace the file's contents with `data`, byte-for-byte from offset
    /// zero, and set `inode.size = data.len()`.
    ///
    /// Data longer than one block is rejected before any state changes;
    /// nothing is truncated silently.
    pub fn echo(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let max = self.superblock.block_size as usize;
        if data.len() > max {
            return Err(FlatFsError::FileTooLarge {
                size: data.len(),
                max,
            });
        }

        let root = self.root_inode()?;
        let entry = self
            .find_entry(&root, name)?
            .ok_or_else(|| FlatFsError::NotFound(name.to_owned()))?;
        let mut inode = self.read_inode(entry.i_number)?;

        let range = self.data_block_range(inode.first_block)?;
        let block = &mut self.image[range];
        block[..data.len()].copy_from_slice(data);
        block[data.len()..].fill(0);

        inode.size = data.len() as u64;
        self.write_inode(&inode)?;
        debug!(name, bytes = data.len(), "echo");
        Ok(())
    }

    /// Delete the named file: remove its directory entry, then free its
    /// inode/block pair.
    ///
    /// The entry goes first, so an interruption between the two steps can
    /// only orphan resources (recoverable by a scan), never leave a name
    /// pointing at a freed inode.
    pub fn rm(&mut self, name: &str) -> Result<()> {
        let mut root = self.root_inode()?;
        let removed = self.remove_entry(&mut root, name)?;
        self.delete_inode(removed.i_number)?;
        debug!(name, ino = %removed.i_number, "rm");
        Ok(())
    }
}
