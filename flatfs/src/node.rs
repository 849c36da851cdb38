use std::mem::size_of;

use zerocopy::{AsBytes, FromBytes};

/// Files are named by number only.
pub type FileId = i32;

/// The id carried by inode slots that hold no file.
pub const FREE_ID: FileId = -1;

/// Bytes occupied by one inode in the on-disk table.
pub const NODE_SIZE: usize = size_of::<DiskInode>();

/// Metadata for one file slot.
///
/// Inodes are plain records owned by the table that holds them; they carry no
/// reference back to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    /// The file id, `FREE_ID` while the slot is free.
    pub id: FileId,
    /// Free slots are handed out again by file creation.
    pub is_free: bool,
    /// The single block holding the file content. Meaningless while free.
    pub block_number: usize,
    /// Bytes of valid content in the block, never more than the block size.
    pub file_size: usize,
}

impl Default for Inode {
    fn default() -> Self {
        Self {
            id: FREE_ID,
            is_free: true,
            block_number: 0,
            file_size: 0,
        }
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone)]
/// The inode as laid out in block 1. Fields are stored in native byte order.
struct DiskInode {
    id: i32,
    /// Non-zero when the slot is free.
    free: u32,
    block_number: u32,
    file_size: u32,
}

impl From<&Inode> for DiskInode {
    fn from(node: &Inode) -> Self {
        Self {
            id: node.id,
            free: node.is_free as u32,
            block_number: node.block_number as u32,
            file_size: node.file_size as u32,
        }
    }
}

impl From<DiskInode> for Inode {
    fn from(disk: DiskInode) -> Self {
        Self {
            id: disk.id,
            is_free: disk.free != 0,
            block_number: disk.block_number as usize,
            file_size: disk.file_size as usize,
        }
    }
}

/// The fixed-size table of every inode slot on the device.
#[derive(Debug, Clone, PartialEq)]
pub struct InodeTable {
    nodes: Vec<Inode>,
}

impl InodeTable {
    /// A table of `slots` free inodes.
    pub fn new(slots: usize) -> Self {
        Self {
            nodes: vec![Inode::default(); slots],
        }
    }

    /// The number of bytes a table of `slots` inodes serializes to, `None`
    /// if that does not fit in a `usize`.
    pub fn encoded_len(slots: usize) -> Option<usize> {
        slots.checked_mul(NODE_SIZE)
    }

    /// Decodes `slots` inodes from the head of `buf`. Returns `None` if the
    /// buffer is too short.
    pub fn parse(buf: &[u8], slots: usize) -> Option<Self> {
        if buf.len() < Self::encoded_len(slots)? {
            return None;
        }
        let nodes = buf
            .chunks_exact(NODE_SIZE)
            .take(slots)
            .map(|chunk| DiskInode::read_from(chunk).map(Inode::from))
            .collect::<Option<Vec<_>>>()?;
        Some(Self { nodes })
    }

    /// Serializes the whole table into a zero padded buffer of `block_size`
    /// bytes, ready to be written to disk.
    pub fn serialize_block(&self, block_size: usize) -> Vec<u8> {
        let mut block_buf = vec![0; block_size];
        for (node, chunk) in self.nodes.iter().zip(block_buf.chunks_exact_mut(NODE_SIZE)) {
            chunk.copy_from_slice(DiskInode::from(node).as_bytes());
        }
        block_buf
    }

    pub fn slots(&self) -> usize {
        self.nodes.len()
    }

    /// Index of the live inode carrying `id`. Every slot is scanned.
    pub fn find(&self, id: FileId) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| !node.is_free && node.id == id)
    }

    /// Index of the lowest numbered free slot.
    pub fn first_free(&self) -> Option<usize> {
        self.nodes.iter().position(|node| node.is_free)
    }

    pub fn live_count(&self) -> usize {
        self.iter_live().count()
    }

    pub fn iter_live(&self) -> impl Iterator<Item = &Inode> {
        self.nodes.iter().filter(|node| !node.is_free)
    }

    pub fn get(&self, index: usize) -> Option<&Inode> {
        self.nodes.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Inode> {
        self.nodes.get_mut(index)
    }
}
