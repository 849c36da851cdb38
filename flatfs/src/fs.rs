use crate::alloc::{Bitmap, State};
use crate::file::FileHandle;
use crate::io::{BlockNumber, BlockStorage};
use crate::node::{FileId, Inode, InodeTable, FREE_ID};
use crate::sb::{SuperBlock, SB_SIZE};

use log::{debug, info, trace, warn};
use thiserror::Error;

/// Inode slots created by `MetadataStore::format` unless configured otherwise.
pub const DEFAULT_MAX_INODES: usize = 16;

/// Known locations.
const BITMAP_BLOCK: BlockNumber = 0;
const INODE_BLOCK: BlockNumber = 1;
/// Blocks below this index hold metadata and are never handed out to files.
const FIRST_DATA_BLOCK: BlockNumber = 2;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no file with id {0}")]
    NotFound(FileId),
    #[error("a file with id {0} already exists")]
    AlreadyExists(FileId),
    #[error("no free inode slot left")]
    OutOfInodes,
    #[error("no free data block left")]
    OutOfBlocks,
    #[error("block capacity exceeded, only {written} bytes written")]
    CapacityExceeded { written: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("device does not hold a formatted file system")]
    Unformatted,
    #[error("block device failure")]
    DeviceError(#[from] std::io::Error),
}

impl From<FsError> for std::io::Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::DeviceError(inner) => inner,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Geometry chosen when formatting a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    max_inodes: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            max_inodes: DEFAULT_MAX_INODES,
        }
    }
}

impl FormatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of inode slots, the upper bound on live files. The
    /// whole table has to fit in one block.
    pub fn max_inodes(mut self, slots: usize) -> Self {
        self.max_inodes = slots;
        self
    }

    /// Writes an empty file system covering the first `size` bytes of `dev`.
    ///
    /// Only the persisted image is touched: a store already mounted from the
    /// same device keeps its in-memory state until it is mounted again.
    ///
    /// # Layout
    /// ==========================================================
    /// | SuperBlock + Bitmap | Inode table | Data blocks ...    |
    /// ==========================================================
    pub fn format<T: BlockStorage>(&self, dev: &mut T, size: usize) -> Result<()> {
        let block_size = dev.block_size();
        if block_size == 0 {
            return Err(FsError::InvalidArgument("device reports zero sized blocks".to_string()));
        }
        let blocks = size / block_size;
        info!(
            "Formatting {} blocks of {} bytes with {} inode slots.",
            blocks, block_size, self.max_inodes
        );
        check_geometry(dev, blocks, self.max_inodes).map_err(FsError::InvalidArgument)?;

        let sb = SuperBlock::new(blocks as u32, self.max_inodes as u32, block_size as u32);
        let mut free_blocks = Bitmap::new(blocks);
        // Reserve blocks for metadata.
        free_blocks.set_reserved(BITMAP_BLOCK);
        free_blocks.set_reserved(INODE_BLOCK);
        dev.write_block(BITMAP_BLOCK, &encode_bitmap_block(&sb, &free_blocks, block_size))?;

        let inodes = InodeTable::new(self.max_inodes);
        dev.write_block(INODE_BLOCK, &inodes.serialize_block(block_size))?;
        dev.sync_disk()?;

        info!("Format complete.");
        Ok(())
    }
}

/// Explains why a device cannot hold `blocks` blocks with `slots` inodes.
fn check_geometry<T: BlockStorage>(
    dev: &T,
    blocks: usize,
    slots: usize,
) -> std::result::Result<(), String> {
    let block_size = dev.block_size();
    if blocks > u32::MAX as usize || slots > u32::MAX as usize || block_size > u32::MAX as usize {
        return Err("geometry exceeds on-disk field width".to_string());
    }
    if blocks < FIRST_DATA_BLOCK {
        return Err(format!(
            "{} blocks leave no room for the {} metadata blocks",
            blocks, FIRST_DATA_BLOCK
        ));
    }
    if blocks > dev.block_count() {
        return Err(format!(
            "{} blocks requested but the device has {}",
            blocks,
            dev.block_count()
        ));
    }
    if block_size < SB_SIZE || blocks > Bitmap::capacity(block_size - SB_SIZE) {
        return Err(format!(
            "{} blocks do not fit a bitmap in one {} byte block",
            blocks, block_size
        ));
    }
    match InodeTable::encoded_len(slots) {
        Some(len) if len <= block_size => Ok(()),
        _ => Err(format!(
            "{} inodes do not fit in one {} byte block",
            slots, block_size
        )),
    }
}

/// Explains why a live inode does not fit the blocks tracked by
/// `free_blocks`.
fn check_inodes(
    inodes: &InodeTable,
    free_blocks: &Bitmap,
    block_size: usize,
) -> std::result::Result<(), String> {
    for node in inodes.iter_live() {
        if node.block_number < FIRST_DATA_BLOCK || node.block_number >= free_blocks.len() {
            return Err(format!(
                "file {} points at block {} outside the data region",
                node.id, node.block_number
            ));
        }
        if free_blocks.get(node.block_number) != State::Used {
            return Err(format!(
                "file {} points at block {} which the bitmap marks free",
                node.id, node.block_number
            ));
        }
        if node.file_size > block_size {
            return Err(format!(
                "file {} claims {} bytes in a {} byte block",
                node.id, node.file_size, block_size
            ));
        }
    }
    Ok(())
}

fn encode_bitmap_block(sb: &SuperBlock, bitmap: &Bitmap, block_size: usize) -> Vec<u8> {
    let mut block_buf = vec![0; block_size];
    block_buf[0..SB_SIZE].copy_from_slice(&sb.serialize());
    let end = SB_SIZE + bitmap.encoded_len();
    block_buf[SB_SIZE..end].copy_from_slice(bitmap.serialize());
    block_buf
}

/// The metadata engine of a flat, single-block-per-file file system.
///
/// Files are named by integer id. Each live file owns one inode slot and
/// exactly one data block. The free block bitmap and inode table held here
/// are the live copies; blocks 0 and 1 on the device are snapshots that
/// only change on `flush`, `unmount` and when a `FileHandle` is closed.
///
/// The bitmap and the inode table are written by two independent block
/// writes, so a failure between them leaves the persisted copies out of step
/// with each other. So does closing a handle and dropping the store without
/// `flush`. Such a device no longer mounts.
pub struct MetadataStore<T: BlockStorage> {
    dev: T,
    super_block: SuperBlock,
    free_blocks: Bitmap,
    inodes: InodeTable,
    /// Running count of live inodes.
    live_files: usize,
}

impl<T: BlockStorage> MetadataStore<T> {
    /// Formats `dev` with default options, see `FormatOptions::format`.
    pub fn format(dev: &mut T, size: usize) -> Result<()> {
        FormatOptions::default().format(dev, size)
    }

    /// Loads the bitmap and inode table from a formatted device.
    ///
    /// A device formatted with another block size, or whose inode table
    /// references blocks the bitmap does not hold as used, is `Unformatted`.
    pub fn mount(mut dev: T) -> Result<Self> {
        info!("Mounting file system.");
        let block_size = dev.block_size();
        let mut block_buf = vec![0; block_size];

        dev.read_block(BITMAP_BLOCK, &mut block_buf)?;
        let super_block = SuperBlock::parse(&block_buf).ok_or(FsError::Unformatted)?;
        let blocks = super_block.blocks_count as usize;
        let slots = super_block.inodes_count as usize;
        if super_block.block_size as usize != block_size {
            warn!(
                "Refusing to mount, formatted with {} byte blocks but the device uses {}.",
                super_block.block_size, block_size
            );
            return Err(FsError::Unformatted);
        }
        if let Err(reason) = check_geometry(&dev, blocks, slots) {
            warn!("Refusing to mount, recorded geometry is unusable: {}.", reason);
            return Err(FsError::Unformatted);
        }
        let free_blocks =
            Bitmap::parse(&block_buf[SB_SIZE..], blocks).ok_or(FsError::Unformatted)?;

        dev.read_block(INODE_BLOCK, &mut block_buf)?;
        let inodes = InodeTable::parse(&block_buf, slots).ok_or(FsError::Unformatted)?;
        if let Err(reason) = check_inodes(&inodes, &free_blocks, block_size) {
            warn!("Refusing to mount, inode table is inconsistent: {}.", reason);
            return Err(FsError::Unformatted);
        }

        let live_files = inodes.live_count();
        info!(
            "Mounted {} blocks, {} of {} inode slots in use.",
            blocks, live_files, slots
        );
        Ok(Self {
            dev,
            super_block,
            free_blocks,
            inodes,
            live_files,
        })
    }

    /// Finds the live inode for `id`, scanning the entire table.
    pub fn lookup_file(&self, id: FileId) -> Result<&Inode> {
        trace!("Looking up file {}.", id);
        self.find_index(id)
            .and_then(|index| self.inodes.get(index))
            .ok_or(FsError::NotFound(id))
    }

    /// Binds `id` to the lowest free inode slot and the lowest free data
    /// block. Nothing is written to the device.
    pub fn create_file(&mut self, id: FileId) -> Result<&Inode> {
        info!("Creating file {}.", id);
        if id == FREE_ID {
            return Err(FsError::InvalidArgument(format!(
                "{} marks unused inodes and cannot name a file",
                FREE_ID
            )));
        }
        if self.find_index(id).is_some() {
            warn!("File {} already exists.", id);
            return Err(FsError::AlreadyExists(id));
        }
        let slot = self.inodes.first_free().ok_or(FsError::OutOfInodes)?;
        let block_number = self.free_blocks.first_free().ok_or(FsError::OutOfBlocks)?;

        self.free_blocks.set_reserved(block_number);
        self.live_files += 1;
        let node = self.inodes.get_mut(slot).ok_or(FsError::OutOfInodes)?;
        *node = Inode {
            id,
            is_free: false,
            block_number,
            file_size: 0,
        };
        debug!(
            "File {} bound to inode slot {} and block {}.",
            id, slot, block_number
        );
        Ok(&*node)
    }

    /// Releases the inode and data block of `id`. The block content stays on
    /// the device until the block is reused.
    pub fn delete_file(&mut self, id: FileId) -> Result<()> {
        info!("Deleting file {}.", id);
        let index = self.find_index(id).ok_or(FsError::NotFound(id))?;
        let node = self.inodes.get_mut(index).ok_or(FsError::NotFound(id))?;
        let block_number = node.block_number;
        *node = Inode::default();
        self.live_files -= 1;

        if block_number >= FIRST_DATA_BLOCK && block_number < self.free_blocks.len() {
            self.free_blocks.set_free(block_number);
        } else {
            warn!(
                "File {} referenced block {} outside the data region.",
                id, block_number
            );
        }
        Ok(())
    }

    /// Opens a handle on the file `id`.
    pub fn open(&mut self, id: FileId) -> Result<FileHandle<'_, T>> {
        FileHandle::open(self, id)
    }

    /// Persists the bitmap, then the inode table.
    pub fn flush(&mut self) -> Result<()> {
        debug!("Flushing free block bitmap and inode table.");
        let block_size = self.dev.block_size();
        let block_buf = encode_bitmap_block(&self.super_block, &self.free_blocks, block_size);
        self.dev.write_block(BITMAP_BLOCK, &block_buf)?;
        self.write_inode_table()
    }

    /// Flushes all metadata and returns the device.
    pub fn unmount(mut self) -> Result<T> {
        info!("Unmounting and saving metadata.");
        self.flush()?;
        self.dev.sync_disk()?;
        Ok(self.dev)
    }

    pub fn block_size(&self) -> usize {
        self.dev.block_size()
    }

    /// Blocks under management, including the metadata blocks.
    pub fn block_count(&self) -> usize {
        self.free_blocks.len()
    }

    pub fn max_inodes(&self) -> usize {
        self.inodes.slots()
    }

    pub fn live_files(&self) -> usize {
        self.live_files
    }

    /// Allocation state of block `blocknr`, `None` past the end of the
    /// file system.
    pub fn block_state(&self, blocknr: BlockNumber) -> Option<State> {
        if blocknr < self.free_blocks.len() {
            Some(self.free_blocks.get(blocknr))
        } else {
            None
        }
    }

    pub fn free_blocks(&self) -> usize {
        self.free_blocks.count_free()
    }

    /// Every live inode in slot order.
    pub fn files(&self) -> impl Iterator<Item = &Inode> {
        self.inodes.iter_live()
    }

    pub(crate) fn find_index(&self, id: FileId) -> Option<usize> {
        if id == FREE_ID {
            return None;
        }
        self.inodes.find(id)
    }

    pub(crate) fn inode(&self, index: usize) -> Option<&Inode> {
        self.inodes.get(index)
    }

    pub(crate) fn inode_mut(&mut self, index: usize) -> Option<&mut Inode> {
        self.inodes.get_mut(index)
    }

    pub(crate) fn device(&mut self) -> &mut T {
        &mut self.dev
    }

    pub(crate) fn write_inode_table(&mut self) -> Result<()> {
        let block_buf = self.inodes.serialize_block(self.dev.block_size());
        self.dev.write_block(INODE_BLOCK, &block_buf)?;
        Ok(())
    }
}
