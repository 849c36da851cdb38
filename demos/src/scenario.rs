mod logging;

use flatfs::io::FileBlockEmulatorBuilder;
use flatfs::{FormatOptions, FsError, MetadataStore, BLOCK_SIZE};
use log::info;

const BLOCKS: usize = 4;
const INODE_SLOTS: usize = 8;

/// Formats a four block device, fills file 7 past its single block, reads it
/// back, then deletes it and shows file 9 reusing the freed block.
pub fn main() -> Result<(), FsError> {
    logging::init();

    let tmp = tempfile::tempfile()?;
    let mut dev = FileBlockEmulatorBuilder::from(tmp)
        .with_block_size(BLOCK_SIZE)
        .with_blocks(BLOCKS)
        .build()?;
    FormatOptions::new()
        .max_inodes(INODE_SLOTS)
        .format(&mut dev, BLOCKS * BLOCK_SIZE)?;

    let mut fs = MetadataStore::mount(dev)?;
    let block = fs.create_file(7)?.block_number;
    info!("file 7 lives in block {}", block);

    let pattern: Vec<u8> = b"0123456789".iter().cycle().take(600).copied().collect();
    let mut file = fs.open(7)?;
    match file.write_all(&pattern) {
        Err(FsError::CapacityExceeded { written }) => {
            info!("wrote {} of {} bytes, file size {}", written, pattern.len(), file.size())
        }
        other => other?,
    }

    file.reset();
    let mut read_back = vec![0; BLOCK_SIZE];
    let count = file.read(&mut read_back);
    info!(
        "read {} bytes back, matches pattern: {}",
        count,
        read_back[..count] == pattern[..count]
    );
    file.close()?;

    fs.delete_file(7)?;
    let block = fs.create_file(9)?.block_number;
    info!("file 9 reuses block {}", block);

    fs.unmount()?;
    Ok(())
}
