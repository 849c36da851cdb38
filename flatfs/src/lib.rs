//! A flat file system for small block devices.
//!
//! Files are named by integer id and hold at most one block of data. Block 0
//! of the device carries a super block and the free block bitmap, block 1 the
//! inode table, and every other block belongs to at most one file.
//!
//! ```no_run
//! use flatfs::io::FileBlockEmulatorBuilder;
//! use flatfs::{MetadataStore, BLOCK_SIZE};
//!
//! let mut dev = FileBlockEmulatorBuilder::from(std::fs::File::create("disk.img")?)
//!     .with_blocks(16)
//!     .build()?;
//! MetadataStore::format(&mut dev, 16 * BLOCK_SIZE)?;
//!
//! let mut fs = MetadataStore::mount(dev)?;
//! fs.create_file(7)?;
//! let mut file = fs.open(7)?;
//! file.write_all(b"hello")?;
//! file.close()?;
//! fs.unmount()?;
//! # Ok::<(), flatfs::FsError>(())
//! ```
mod alloc;
mod file;
mod fs;
pub mod io;
mod node;
mod sb;

pub use crate::alloc::State;
pub use crate::file::FileHandle;
pub use crate::fs::{FormatOptions, FsError, MetadataStore, Result, DEFAULT_MAX_INODES};
pub use crate::io::BLOCK_SIZE;
pub use crate::node::{FileId, Inode, FREE_ID};
