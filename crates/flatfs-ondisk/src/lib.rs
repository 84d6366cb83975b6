#![forbid(unsafe_code)]
//! On-disk format parsing and serialization for FlatFS structures.
//!
//! Pure record crate — no I/O, no side effects. Every record type has an
//! explicit little-endian field layout with `parse_from_bytes` /
//! `write_to_bytes` pairs that round-trip byte-for-byte; nothing relies on
//! native struct layout or padding.
//!
//! An image is laid out as five contiguous regions in fixed order:
//!
//! ```text
//! [superblock][inode bitmap][data bitmap][inode table][data]
//! ```
//!
//! [`ImageLayout`] derives the byte span of each region from the
//! superblock's block-count fields; it is recomputed identically on every
//! mount, so nothing beyond the superblock needs to be persisted.

use flatfs_types::{
    BLOCK_SIZE, BlockNumber, DIR_ENTRY_RECORD_SIZE, ENTRIES_PER_BLOCK, FLATFS_MAGIC, IMAGE_SIZE,
    INODE_RECORD_SIZE, InodeNumber, NAME_MAX, ParseError, SECTOR_SIZE, SUPERBLOCK_RECORD_SIZE,
    ensure_slice, read_le_u32, read_le_u64, trim_nul_padded, u64_to_usize,
};
use serde::{Deserialize, Serialize};
use std::ops::Range;

fn write_le_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    let end = offset.checked_add(4).ok_or(ParseError::InvalidField {
        field: "offset",
        reason: "overflow",
    })?;
    if end > buf.len() {
        return Err(ParseError::InsufficientData {
            needed: 4,
            offset,
            actual: buf.len().saturating_sub(offset),
        });
    }
    buf[offset..end].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

fn write_le_u64(buf: &mut [u8], offset: usize, value: u64) -> Result<(), ParseError> {
    let end = offset.checked_add(8).ok_or(ParseError::InvalidField {
        field: "offset",
        reason: "overflow",
    })?;
    if end > buf.len() {
        return Err(ParseError::InsufficientData {
            needed: 8,
            offset,
            actual: buf.len().saturating_sub(offset),
        });
    }
    buf[offset..end].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

// ── Superblock ──────────────────────────────────────────────────────────────

/// Volume metadata record at the start of region 0.
///
/// Field layout (little-endian):
///
/// ```text
/// 0x00  magic                u32
/// 0x04  block_size           u32
/// 0x08  sector_size          u32
/// 0x0C  super_blocks         u32
/// 0x10  inode_bitmap_blocks  u32
/// 0x14  data_bitmap_blocks   u32
/// 0x18  inode_table_blocks   u32
/// 0x1C  root_inode           u64
/// 0x24  data_bytes           u64
/// ```
///
/// Region sizes are fixed for the lifetime of an image; mount rejects any
/// superblock whose geometry disagrees with the image it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub block_size: u32,
    pub sector_size: u32,
    pub super_blocks: u32,
    pub inode_bitmap_blocks: u32,
    pub data_bitmap_blocks: u32,
    pub inode_table_blocks: u32,
    pub root_inode: InodeNumber,
    /// Usable length of the data region in bytes (whole blocks only).
    pub data_bytes: u64,
}

impl Superblock {
    /// The fixed geometry every freshly formatted volume uses.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn new_default() -> Self {
        let metadata_blocks = 1 + 1 + 1 + 5;
        let data_blocks = IMAGE_SIZE / BLOCK_SIZE - metadata_blocks;
        Self {
            block_size: BLOCK_SIZE as u32,
            sector_size: SECTOR_SIZE as u32,
            super_blocks: 1,
            inode_bitmap_blocks: 1,
            data_bitmap_blocks: 1,
            inode_table_blocks: 5,
            root_inode: InodeNumber(0),
            data_bytes: (data_blocks * BLOCK_SIZE) as u64,
        }
    }

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(bytes, 0x00)?;
        if magic != FLATFS_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: FLATFS_MAGIC,
                actual: magic,
            });
        }

        let block_size = read_le_u32(bytes, 0x04)?;
        let sector_size = read_le_u32(bytes, 0x08)?;
        if block_size == 0 {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be non-zero",
            });
        }
        if sector_size == 0 || block_size % sector_size != 0 {
            return Err(ParseError::InvalidField {
                field: "sector_size",
                reason: "must be non-zero and divide block_size",
            });
        }

        Ok(Self {
            block_size,
            sector_size,
            super_blocks: read_le_u32(bytes, 0x0C)?,
            inode_bitmap_blocks: read_le_u32(bytes, 0x10)?,
            data_bitmap_blocks: read_le_u32(bytes, 0x14)?,
            inode_table_blocks: read_le_u32(bytes, 0x18)?,
            root_inode: InodeNumber(read_le_u64(bytes, 0x1C)?),
            data_bytes: read_le_u64(bytes, 0x24)?,
        })
    }

    pub fn write_to_bytes(&self, buf: &mut [u8]) -> Result<(), ParseError> {
        if buf.len() < SUPERBLOCK_RECORD_SIZE {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_RECORD_SIZE,
                offset: 0,
                actual: buf.len(),
            });
        }
        write_le_u32(buf, 0x00, FLATFS_MAGIC)?;
        write_le_u32(buf, 0x04, self.block_size)?;
        write_le_u32(buf, 0x08, self.sector_size)?;
        write_le_u32(buf, 0x0C, self.super_blocks)?;
        write_le_u32(buf, 0x10, self.inode_bitmap_blocks)?;
        write_le_u32(buf, 0x14, self.data_bitmap_blocks)?;
        write_le_u32(buf, 0x18, self.inode_table_blocks)?;
        write_le_u64(buf, 0x1C, self.root_inode.0)?;
        write_le_u64(buf, 0x24, self.data_bytes)?;
        Ok(())
    }

    /// Inode records that fit in the inode-table region.
    #[must_use]
    pub fn inode_capacity(&self) -> u32 {
        self.inode_table_blocks * (self.block_size / self.sector_size)
    }
}

// ── Image layout ────────────────────────────────────────────────────────────

/// One contiguous byte span of the image dedicated to a structural purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub offset: usize,
    pub len: usize,
}

impl Region {
    /// Index range of this region inside the image buffer.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Byte offsets and lengths of the five regions, derived from the
/// superblock's block-count fields and the fixed image size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLayout {
    pub superblock: Region,
    pub inode_bitmap: Region,
    pub data_bitmap: Region,
    pub inode_table: Region,
    pub data: Region,
    /// Whole data blocks available; the image tail past the last whole
    /// block is never addressed.
    pub data_block_count: u32,
}

impl ImageLayout {
    /// Derive the layout for an image of `image_size` bytes.
    ///
    /// Fails if the metadata regions exceed the image, leave no room for
    /// data, or the declared `data_bytes` exceeds what actually fits.
    #[expect(clippy::cast_possible_truncation)]
    pub fn from_superblock(sb: &Superblock, image_size: usize) -> Result<Self, ParseError> {
        let block_size = sb.block_size as usize;

        let mut offset = 0usize;
        let mut take = |blocks: u32| -> Result<Region, ParseError> {
            let len = (blocks as usize)
                .checked_mul(block_size)
                .ok_or(ParseError::InvalidField {
                    field: "region_blocks",
                    reason: "region length overflows",
                })?;
            let region = Region { offset, len };
            offset = offset
                .checked_add(len)
                .ok_or(ParseError::InvalidField {
                    field: "region_blocks",
                    reason: "region offset overflows",
                })?;
            Ok(region)
        };

        let superblock = take(sb.super_blocks)?;
        let inode_bitmap = take(sb.inode_bitmap_blocks)?;
        let data_bitmap = take(sb.data_bitmap_blocks)?;
        let inode_table = take(sb.inode_table_blocks)?;

        if offset >= image_size {
            return Err(ParseError::InvalidField {
                field: "region_blocks",
                reason: "metadata regions leave no data area",
            });
        }
        if superblock.len < SUPERBLOCK_RECORD_SIZE {
            return Err(ParseError::InvalidField {
                field: "super_blocks",
                reason: "superblock region smaller than its record",
            });
        }
        // Each bitmap must hold one bit per addressable unit; an undersized
        // bitmap would silently drop allocation state past its end.
        if u64::from(sb.inode_capacity()) > inode_bitmap.len as u64 * 8 {
            return Err(ParseError::InvalidField {
                field: "inode_bitmap_blocks",
                reason: "inode bitmap smaller than the inode table's index space",
            });
        }

        // Only whole blocks are addressable; the ragged tail is dead space.
        let data_block_count = ((image_size - offset) / block_size) as u32;
        if data_block_count == 0 {
            return Err(ParseError::InvalidField {
                field: "region_blocks",
                reason: "data area smaller than one block",
            });
        }
        if u64::from(data_block_count) > data_bitmap.len as u64 * 8 {
            return Err(ParseError::InvalidField {
                field: "data_bitmap_blocks",
                reason: "data bitmap smaller than the data region's index space",
            });
        }
        let data = Region {
            offset,
            len: data_block_count as usize * block_size,
        };

        if u64_to_usize(sb.data_bytes, "data_bytes")? > data.len {
            return Err(ParseError::InvalidField {
                field: "data_bytes",
                reason: "declared data region exceeds image capacity",
            });
        }
        if sb.root_inode.0 >= u64::from(sb.inode_capacity()) {
            return Err(ParseError::InvalidField {
                field: "root_inode",
                reason: "root inode outside inode table",
            });
        }

        Ok(Self {
            superblock,
            inode_bitmap,
            data_bitmap,
            inode_table,
            data,
            data_block_count,
        })
    }
}

// ── Inode record ────────────────────────────────────────────────────────────

/// What an inode describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FileKind {
    File = 0,
    Directory = 1,
}

impl FileKind {
    fn from_byte(byte: u8) -> Result<Self, ParseError> {
        match byte {
            0 => Ok(Self::File),
            1 => Ok(Self::Directory),
            _ => Err(ParseError::InvalidField {
                field: "kind",
                reason: "unknown file kind byte",
            }),
        }
    }
}

/// Fixed-size inode record; slot `n` lives at byte `n * sector_size` of the
/// inode table region.
///
/// Field layout (little-endian):
///
/// ```text
/// 0x00  i_number     u64
/// 0x08  size         u64
/// 0x10  sub_entries  u64
/// 0x18  kind         u8
/// 0x19  reserved     [u8; 7] (zero)
/// 0x20  first_block  u64
/// ```
///
/// An inode always owns exactly one data block, allocated together with the
/// inode number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInode {
    pub i_number: InodeNumber,
    /// Bytes of resident data in the single data block.
    pub size: u64,
    /// Entry count; meaningful only for directories.
    pub sub_entries: u64,
    pub kind: FileKind,
    pub first_block: BlockNumber,
}

impl DiskInode {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let kind_byte = ensure_slice(bytes, 0x18, 1)?[0];
        Ok(Self {
            i_number: InodeNumber(read_le_u64(bytes, 0x00)?),
            size: read_le_u64(bytes, 0x08)?,
            sub_entries: read_le_u64(bytes, 0x10)?,
            kind: FileKind::from_byte(kind_byte)?,
            first_block: BlockNumber(read_le_u64(bytes, 0x20)?),
        })
    }

    pub fn write_to_bytes(&self, buf: &mut [u8]) -> Result<(), ParseError> {
        if buf.len() < INODE_RECORD_SIZE {
            return Err(ParseError::InsufficientData {
                needed: INODE_RECORD_SIZE,
                offset: 0,
                actual: buf.len(),
            });
        }
        write_le_u64(buf, 0x00, self.i_number.0)?;
        write_le_u64(buf, 0x08, self.size)?;
        write_le_u64(buf, 0x10, self.sub_entries)?;
        buf[0x18] = self.kind as u8;
        buf[0x19..0x20].fill(0);
        write_le_u64(buf, 0x20, self.first_block.0)?;
        Ok(())
    }
}

// ── Directory entry record ──────────────────────────────────────────────────

/// Fixed-size {name, inode number} record inside a directory's data block.
///
/// The name occupies a NUL-padded 120-byte field; the inode number follows
/// as a u64 at offset 120. Records are packed gap-free in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryRecord {
    pub name: String,
    pub i_number: InodeNumber,
}

impl DirEntryRecord {
    /// Validate a prospective entry name against the fixed field width.
    pub fn validate_name(name: &str) -> Result<(), ParseError> {
        if name.is_empty() {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "cannot be empty",
            });
        }
        if name.len() > NAME_MAX {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "exceeds fixed name field width",
            });
        }
        if name.bytes().any(|b| b == 0) {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "interior NUL byte",
            });
        }
        Ok(())
    }

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let name_field = ensure_slice(bytes, 0, NAME_MAX)?;
        Ok(Self {
            name: trim_nul_padded(name_field),
            i_number: InodeNumber(read_le_u64(bytes, NAME_MAX)?),
        })
    }

    pub fn write_to_bytes(&self, buf: &mut [u8]) -> Result<(), ParseError> {
        Self::validate_name(&self.name)?;
        if buf.len() < DIR_ENTRY_RECORD_SIZE {
            return Err(ParseError::InsufficientData {
                needed: DIR_ENTRY_RECORD_SIZE,
                offset: 0,
                actual: buf.len(),
            });
        }
        buf[..NAME_MAX].fill(0);
        buf[..self.name.len()].copy_from_slice(self.name.as_bytes());
        write_le_u64(buf, NAME_MAX, self.i_number.0)?;
        Ok(())
    }
}

/// Byte range of entry slot `slot` within a directory data block.
#[must_use]
pub fn entry_slot_range(slot: usize) -> Range<usize> {
    let start = slot * DIR_ENTRY_RECORD_SIZE;
    start..start + DIR_ENTRY_RECORD_SIZE
}

/// Entry slots that fit in one data block.
#[must_use]
pub fn dir_capacity() -> usize {
    ENTRIES_PER_BLOCK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_round_trips_byte_for_byte() {
        let sb = Superblock::new_default();
        let mut buf = vec![0u8; SUPERBLOCK_RECORD_SIZE];
        sb.write_to_bytes(&mut buf).unwrap();

        let parsed = Superblock::parse_from_bytes(&buf).unwrap();
        assert_eq!(parsed, sb);

        let mut rewritten = vec![0u8; SUPERBLOCK_RECORD_SIZE];
        parsed.write_to_bytes(&mut rewritten).unwrap();
        assert_eq!(rewritten, buf);
    }

    #[test]
    fn superblock_rejects_wrong_magic() {
        let sb = Superblock::new_default();
        let mut buf = vec![0u8; SUPERBLOCK_RECORD_SIZE];
        sb.write_to_bytes(&mut buf).unwrap();
        buf[0] ^= 0xFF;

        let err = Superblock::parse_from_bytes(&buf).unwrap_err();
        assert!(matches!(err, ParseError::InvalidMagic { .. }));
    }

    #[test]
    fn superblock_rejects_bad_sector_size() {
        let mut sb = Superblock::new_default();
        sb.sector_size = 100; // does not divide 4096
        let mut buf = vec![0u8; SUPERBLOCK_RECORD_SIZE];
        sb.write_to_bytes(&mut buf).unwrap();
        assert!(matches!(
            Superblock::parse_from_bytes(&buf),
            Err(ParseError::InvalidField {
                field: "sector_size",
                ..
            })
        ));
    }

    #[test]
    fn default_layout_matches_fixed_geometry() {
        let sb = Superblock::new_default();
        let layout = ImageLayout::from_superblock(&sb, IMAGE_SIZE).unwrap();

        assert_eq!(layout.superblock.offset, 0);
        assert_eq!(layout.inode_bitmap.offset, 4096);
        assert_eq!(layout.data_bitmap.offset, 8192);
        assert_eq!(layout.inode_table.offset, 12288);
        assert_eq!(layout.data.offset, 32768);
        assert_eq!(layout.data_block_count, 236);
        assert_eq!(sb.inode_capacity(), 160);
        assert_eq!(sb.data_bytes, 236 * 4096);

        // Regions are contiguous and non-overlapping in fixed order.
        assert_eq!(
            layout.superblock.offset + layout.superblock.len,
            layout.inode_bitmap.offset
        );
        assert_eq!(
            layout.inode_table.offset + layout.inode_table.len,
            layout.data.offset
        );
        assert!(layout.data.offset + layout.data.len <= IMAGE_SIZE);
    }

    #[test]
    fn layout_rejects_regions_exceeding_image() {
        let mut sb = Superblock::new_default();
        sb.inode_table_blocks = 10_000;
        assert!(matches!(
            ImageLayout::from_superblock(&sb, IMAGE_SIZE),
            Err(ParseError::InvalidField { .. })
        ));
    }

    #[test]
    fn layout_rejects_undersized_bitmaps() {
        // No data bitmap at all: every block would always look free.
        let mut sb = Superblock::new_default();
        sb.data_bitmap_blocks = 0;
        assert!(matches!(
            ImageLayout::from_superblock(&sb, IMAGE_SIZE),
            Err(ParseError::InvalidField {
                field: "data_bitmap_blocks",
                ..
            })
        ));

        // No inode bitmap, likewise.
        let mut sb = Superblock::new_default();
        sb.inode_bitmap_blocks = 0;
        assert!(matches!(
            ImageLayout::from_superblock(&sb, IMAGE_SIZE),
            Err(ParseError::InvalidField {
                field: "inode_bitmap_blocks",
                ..
            })
        ));

        // One bitmap block, but a sector size packing more inode slots
        // into the table than the bitmap has bits (33 * 1024 > 32768).
        let mut sb = Superblock::new_default();
        sb.sector_size = 4;
        sb.inode_table_blocks = 33;
        assert!(matches!(
            ImageLayout::from_superblock(&sb, IMAGE_SIZE),
            Err(ParseError::InvalidField {
                field: "inode_bitmap_blocks",
                ..
            })
        ));
    }

    #[test]
    fn layout_rejects_oversized_data_bytes() {
        let mut sb = Superblock::new_default();
        sb.data_bytes = IMAGE_SIZE as u64;
        assert!(matches!(
            ImageLayout::from_superblock(&sb, IMAGE_SIZE),
            Err(ParseError::InvalidField {
                field: "data_bytes",
                ..
            })
        ));
    }

    #[test]
    fn layout_rejects_root_inode_out_of_table() {
        let mut sb = Superblock::new_default();
        sb.root_inode = InodeNumber(u64::from(sb.inode_capacity()));
        assert!(matches!(
            ImageLayout::from_superblock(&sb, IMAGE_SIZE),
            Err(ParseError::InvalidField {
                field: "root_inode",
                ..
            })
        ));
    }

    #[test]
    fn inode_record_round_trips() {
        let inode = DiskInode {
            i_number: InodeNumber(7),
            size: 1234,
            sub_entries: 0,
            kind: FileKind::File,
            first_block: BlockNumber(42),
        };
        let mut buf = vec![0u8; SECTOR_SIZE];
        inode.write_to_bytes(&mut buf).unwrap();
        assert_eq!(DiskInode::parse_from_bytes(&buf).unwrap(), inode);

        let dir = DiskInode {
            i_number: InodeNumber(0),
            size: 0,
            sub_entries: 3,
            kind: FileKind::Directory,
            first_block: BlockNumber(0),
        };
        let mut buf = vec![0u8; SECTOR_SIZE];
        dir.write_to_bytes(&mut buf).unwrap();
        assert_eq!(DiskInode::parse_from_bytes(&buf).unwrap(), dir);
    }

    #[test]
    fn inode_record_rejects_unknown_kind() {
        let inode = DiskInode {
            i_number: InodeNumber(1),
            size: 0,
            sub_entries: 0,
            kind: FileKind::File,
            first_block: BlockNumber(1),
        };
        let mut buf = vec![0u8; SECTOR_SIZE];
        inode.write_to_bytes(&mut buf).unwrap();
        buf[0x18] = 9;
        assert!(matches!(
            DiskInode::parse_from_bytes(&buf),
            Err(ParseError::InvalidField { field: "kind", .. })
        ));
    }

    #[test]
    fn dir_entry_round_trips_and_pads_with_nul() {
        let entry = DirEntryRecord {
            name: "main".into(),
            i_number: InodeNumber(3),
        };
        let mut buf = vec![0xAAu8; DIR_ENTRY_RECORD_SIZE];
        entry.write_to_bytes(&mut buf).unwrap();

        // Name field is fully NUL-padded past the name bytes.
        assert_eq!(&buf[..4], b"main");
        assert!(buf[4..NAME_MAX].iter().all(|b| *b == 0));

        assert_eq!(DirEntryRecord::parse_from_bytes(&buf).unwrap(), entry);
    }

    #[test]
    fn dir_entry_name_at_field_width_boundary() {
        let name = "x".repeat(NAME_MAX);
        let entry = DirEntryRecord {
            name: name.clone(),
            i_number: InodeNumber(9),
        };
        let mut buf = vec![0u8; DIR_ENTRY_RECORD_SIZE];
        entry.write_to_bytes(&mut buf).unwrap();
        let parsed = DirEntryRecord::parse_from_bytes(&buf).unwrap();
        assert_eq!(parsed.name, name);

        let too_long = DirEntryRecord {
            name: "x".repeat(NAME_MAX + 1),
            i_number: InodeNumber(9),
        };
        assert!(too_long.write_to_bytes(&mut buf).is_err());
    }

    #[test]
    fn dir_entry_rejects_empty_and_nul_names() {
        assert!(DirEntryRecord::validate_name("").is_err());
        assert!(DirEntryRecord::validate_name("a\0b").is_err());
        assert!(DirEntryRecord::validate_name("ok").is_ok());
    }

    #[test]
    fn entry_slots_tile_the_block() {
        assert_eq!(entry_slot_range(0), 0..128);
        assert_eq!(entry_slot_range(1), 128..256);
        assert_eq!(entry_slot_range(31).end, BLOCK_SIZE);
        assert_eq!(dir_capacity(), 32);
    }
}
