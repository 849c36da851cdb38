use crate::io::block::{BlockNumber, BlockStorage};
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

/// Small blocks keep the whole inode table and the free block bitmap inside a
/// single block each, matching the sector size of most disks.
pub const BLOCK_SIZE: usize = 512;

/// Emulates block disk/flash storage in userspace using a file as block storage.
/// This is only meant to be used for file system development and testing.
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// The number of bytes in every block.
    block_size: usize,
    /// The total number of blocks available in the file store.
    block_count: usize,
}

impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, blocknr: BlockNumber) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("block {} out of range", blocknr),
            ));
        }
        Ok(())
    }

    fn seek_to(&mut self, blocknr: BlockNumber) -> std::io::Result<()> {
        self.fd
            .seek(SeekFrom::Start((blocknr * self.block_size) as u64))?;
        Ok(())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn open_disk<P: AsRef<Path>>(dest: P, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        // Return error if the file does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(dest)?;
        let emu = FileBlockEmulator {
            fd: file,
            block_size: BLOCK_SIZE,
            block_count: nblocks,
        };

        Ok(emu)
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        if buf.len() < self.block_size {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read block",
            ));
        }
        self.seek_to(blocknr)?;

        // Limit the read to just the block specified.
        let block_size = self.block_size;
        self.fd.read_exact(&mut buf[0..block_size])
    }

    /// Short buffers are zero padded, long buffers are truncated to one block.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        self.seek_to(blocknr)?;

        let max = std::cmp::min(self.block_size, buf.len());
        self.fd.write_all(&buf[0..max])?;
        if max < self.block_size {
            self.fd.write_all(&vec![0x00; self.block_size - max])?;
        }
        Ok(())
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()?;
        Ok(())
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_size: usize,
    block_count: usize,
    clear_medium: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            block_size: BLOCK_SIZE,
            // A better default here might be the size of the file rounded down
            // to the nearest block.
            block_count: 0,
            clear_medium: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of bytes per block.
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the number of desired blocks in the block store device.
    pub fn with_blocks(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Whether to zero the medium on build. Turn this off to reopen an image
    /// that already holds a file system.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear_medium = clear;
        self
    }

    /// This builder assumed ownership of the file descriptor used and does
    /// destructive things to prepare the file for use. Additionally, ownership
    /// of the file is transfered to the emulator meaning this builder can only
    /// be used to create one emulator.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.block_count == 0 || self.block_size == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "device geometry must be non-zero",
            ));
        }
        if self.clear_medium {
            self.zero_blocks()?;
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            block_size: self.block_size,
            block_count: self.block_count,
        })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk" block, buffering each write to prevent excessive reads.
        let zeroes = vec![0x00; self.block_size];
        for _ in 0..self.block_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()
    }
}
