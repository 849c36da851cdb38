use std::path::Path;

/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// Fixed-size block transfer to and from a storage medium.
///
/// Block 0 and block 1 of a formatted device are owned by the metadata store,
/// every other block is handed out to at most one file at a time.
pub trait BlockStorage {
    /// Opens a disk at the specified path. This method does not validate the
    /// storage blocks, it is up for clients to ensure disks are appropriately initialized.
    fn open_disk<P: AsRef<Path>>(path: P, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    /// The number of bytes transferred by a single block read or write.
    fn block_size(&self) -> usize;
    /// The total number of blocks on the medium.
    fn block_count(&self) -> usize;
    /// Reads disk block number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or into a buffer shorter than
    /// one block, will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified block number. A buffer
    /// shorter than a block is zero padded, a longer one is truncated.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}
