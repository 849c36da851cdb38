use crate::fs::{FsError, MetadataStore, Result};
use crate::io::{BlockNumber, BlockStorage};
use crate::node::FileId;

use log::{debug, error, trace};

/// A session on one open file.
///
/// The whole file lives in a single block, which the handle caches in memory
/// from open until close. Reads and writes move a cursor through the cache;
/// nothing reaches the device until `flush` or `close`, or the handle is
/// dropped.
///
/// The handle borrows its store mutably, so at most one file is open at a
/// time.
pub struct FileHandle<'a, T: BlockStorage> {
    store: &'a mut MetadataStore<T>,
    inode_index: usize,
    id: FileId,
    block_number: BlockNumber,
    file_size: usize,
    /// Cursor into `block_cache`, never past `file_size`.
    curr: usize,
    block_cache: Vec<u8>,
    closed: bool,
}

impl<'a, T: BlockStorage> FileHandle<'a, T> {
    /// Resolves `id` and loads its block into the cache.
    pub fn open(store: &'a mut MetadataStore<T>, id: FileId) -> Result<Self> {
        debug!("Opening file {}.", id);
        let inode_index = store.find_index(id).ok_or(FsError::NotFound(id))?;
        let node = *store.inode(inode_index).ok_or(FsError::NotFound(id))?;

        let block_size = store.block_size();
        let mut block_cache = vec![0; block_size];
        store.device().read_block(node.block_number, &mut block_cache)?;

        Ok(Self {
            store,
            inode_index,
            id,
            block_number: node.block_number,
            file_size: std::cmp::min(node.file_size, block_size),
            curr: 0,
            block_cache,
            closed: false,
        })
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn block_number(&self) -> BlockNumber {
        self.block_number
    }

    /// Bytes of valid content.
    pub fn size(&self) -> usize {
        self.file_size
    }

    pub fn position(&self) -> usize {
        self.curr
    }

    /// The most bytes the file can ever hold.
    pub fn capacity(&self) -> usize {
        self.block_cache.len()
    }

    /// Copies bytes from the cursor into `buf`, stopping at the end of the
    /// file. Returns the count copied, 0 once the cursor is at the end.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let remaining = self.file_size.saturating_sub(self.curr);
        let count = std::cmp::min(buf.len(), remaining);
        buf[..count].copy_from_slice(&self.block_cache[self.curr..self.curr + count]);
        self.curr += count;
        trace!("Read {} bytes from file {}.", count, self.id);
        count
    }

    /// Copies bytes from `buf` into the file at the cursor. Writing stops at
    /// the end of the block, so the returned count may be short. Overwriting
    /// existing bytes leaves the size unchanged; the size only grows as far as
    /// the cursor does.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let room = self.capacity() - self.curr;
        let count = std::cmp::min(buf.len(), room);
        self.block_cache[self.curr..self.curr + count].copy_from_slice(&buf[..count]);
        self.curr += count;
        self.file_size = std::cmp::max(self.file_size, self.curr);
        if count < buf.len() {
            debug!(
                "File {} full, wrote {} of {} bytes.",
                self.id,
                count,
                buf.len()
            );
        } else {
            trace!("Wrote {} bytes to file {}.", count, self.id);
        }
        count
    }

    /// Like `write`, but a short write is reported as `CapacityExceeded`.
    /// The bytes that fit stay written.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let written = self.write(buf);
        if written < buf.len() {
            return Err(FsError::CapacityExceeded { written });
        }
        Ok(())
    }

    /// Moves the cursor back to the start of the file.
    pub fn reset(&mut self) {
        trace!("Resetting file {}.", self.id);
        self.curr = 0;
    }

    /// True once every byte has been read.
    pub fn at_end(&self) -> bool {
        self.curr >= self.file_size
    }

    /// Writes the cached block to the device, records the size in the inode
    /// and writes the whole inode table.
    pub fn flush(&mut self) -> Result<()> {
        debug!("Flushing file {} to block {}.", self.id, self.block_number);
        self.store
            .device()
            .write_block(self.block_number, &self.block_cache)?;
        let inode_index = self.inode_index;
        let node = self
            .store
            .inode_mut(inode_index)
            .ok_or(FsError::NotFound(self.id))?;
        node.file_size = self.file_size;
        self.store.write_inode_table()
    }

    /// Flushes and releases the handle.
    pub fn close(mut self) -> Result<()> {
        debug!("Closing file {}.", self.id);
        self.closed = true;
        self.flush()
    }
}

impl<'a, T: BlockStorage> Drop for FileHandle<'a, T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        debug!("Closing file {}.", self.id);
        if let Err(err) = self.flush() {
            error!("Failed to persist file {} on close: {}.", self.id, err);
        }
    }
}

impl<'a, T: BlockStorage> std::io::Read for FileHandle<'a, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(FileHandle::read(self, buf))
    }
}

/// A full block makes `write` return `Ok(0)`, which `write_all` turns into
/// `ErrorKind::WriteZero`.
impl<'a, T: BlockStorage> std::io::Write for FileHandle<'a, T> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(FileHandle::write(self, buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        FileHandle::flush(self).map_err(Into::into)
    }
}
