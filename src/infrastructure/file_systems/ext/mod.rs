//! ext2/3/4 detection
//!
//! Deleted ext inodes have their block pointers zeroed, so metadata
//! recovery is not attempted. The superblock is still read to label the
//! volume and log its geometry before signature scanning.

use byteorder::{ByteOrder, LittleEndian};

/// ext superblock magic number
const EXT_SUPER_MAGIC: u16 = 0xEF53;
const SUPERBLOCK_SIZE: usize = 1024;

/// Geometry read from an ext superblock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtSuperblock {
    pub inode_count: u32,
    pub block_count: u64,
    pub block_size: u32,
    /// INCOMPAT_EXTENTS, set on ext4
    pub uses_extents: bool,
}

impl ExtSuperblock {
    /// Parses the superblock found 1024 bytes into the volume
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < SUPERBLOCK_SIZE || LittleEndian::read_u16(&data[56..58]) != EXT_SUPER_MAGIC {
            return None;
        }
        let log_block_size = LittleEndian::read_u32(&data[24..28]);
        if log_block_size > 6 {
            return None;
        }
        let incompat = LittleEndian::read_u32(&data[96..100]);
        let blocks_lo = LittleEndian::read_u32(&data[4..8]) as u64;
        // 64-bit feature stores the high half of the block count at 0x150
        let blocks_hi = if incompat & 0x80 != 0 {
            LittleEndian::read_u32(&data[0x150..0x154]) as u64
        } else {
            0
        };
        Some(Self {
            inode_count: LittleEndian::read_u32(&data[0..4]),
            block_count: blocks_hi << 32 | blocks_lo,
            block_size: 1024 << log_block_size,
            uses_extents: incompat & 0x40 != 0,
        })
    }
}

/// True when `data` holds an ext superblock
pub fn probe_superblock(data: &[u8]) -> bool {
    match ExtSuperblock::parse(data) {
        Some(sb) => {
            tracing::debug!(
                "ext superblock: {} blocks of {} bytes, {} inodes{}",
                sb.block_count,
                sb.block_size,
                sb.inode_count,
                if sb.uses_extents { ", extents" } else { "" }
            );
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_superblock() {
        let mut sb = vec![0u8; SUPERBLOCK_SIZE];
        LittleEndian::write_u32(&mut sb[0..4], 128);
        LittleEndian::write_u32(&mut sb[4..8], 4096);
        LittleEndian::write_u32(&mut sb[24..28], 2);
        LittleEndian::write_u16(&mut sb[56..58], EXT_SUPER_MAGIC);
        LittleEndian::write_u32(&mut sb[96..100], 0x40);

        let parsed = ExtSuperblock::parse(&sb).unwrap();
        assert_eq!(parsed.block_size, 4096);
        assert_eq!(parsed.block_count, 4096);
        assert!(parsed.uses_extents);
        assert!(probe_superblock(&sb));

        sb[56] = 0;
        assert!(!probe_superblock(&sb));
    }
}
