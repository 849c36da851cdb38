pub const SB_MAGIC: u32 = 0x4646_5342; // FFSB

/// Bytes occupied by the encoded super block at the head of block 0.
pub const SB_SIZE: usize = 16;

/// The header of block 0 recording the geometry chosen at format time, so
/// mounting needs nothing but the device itself.
///
/// The free block bitmap follows directly after the header in the same block.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct SuperBlock {
    /// A 32-bit identifying string, in this case FFSB.
    pub sb_magic: u32,
    /// Blocks under management, including the two metadata blocks.
    pub blocks_count: u32,
    /// Slots in the inode table, the upper bound on live files.
    pub inodes_count: u32,
    /// Bytes per block of the device the file system was formatted on.
    pub block_size: u32,
}

impl SuperBlock {
    pub fn new(blocks_count: u32, inodes_count: u32, block_size: u32) -> Self {
        Self {
            sb_magic: SB_MAGIC,
            blocks_count,
            inodes_count,
            block_size,
        }
    }

    /// Reads a super block from the head of `buf`. Returns `None` when the
    /// buffer is too short or the magic constant is missing, which is what an
    /// unformatted device looks like.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < SB_SIZE {
            return None;
        }
        let word = |at: usize| u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        if word(0) != SB_MAGIC {
            return None;
        }
        Some(Self {
            sb_magic: SB_MAGIC,
            blocks_count: word(4),
            inodes_count: word(8),
            block_size: word(12),
        })
    }

    /// Serializes the SuperBlock into its `SB_SIZE` byte header.
    /// The encoding is a series of struct fields with big endian alignment.
    pub fn serialize(&self) -> [u8; SB_SIZE] {
        let mut sb_encoded = [0; SB_SIZE];
        sb_encoded[0..4].copy_from_slice(&self.sb_magic.to_be_bytes());
        sb_encoded[4..8].copy_from_slice(&self.blocks_count.to_be_bytes());
        sb_encoded[8..12].copy_from_slice(&self.inodes_count.to_be_bytes());
        sb_encoded[12..16].copy_from_slice(&self.block_size.to_be_bytes());
        sb_encoded
    }
}
