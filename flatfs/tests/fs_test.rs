use std::io::ErrorKind;
use std::path::Path;

use flatfs::io::{BlockNumber, BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
use flatfs::{FormatOptions, FsError, MetadataStore, State, BLOCK_SIZE};
use tempfile::NamedTempFile;

/// Passes block IO through to a real device, failing on request.
struct FaultyDevice<T> {
    inner: T,
    fail_write_to: Option<BlockNumber>,
    fail_reads: bool,
}

impl<T: BlockStorage> FaultyDevice<T> {
    fn new(inner: T) -> Self {
        Self {
            inner,
            fail_write_to: None,
            fail_reads: false,
        }
    }

    fn injected() -> std::io::Error {
        std::io::Error::new(ErrorKind::Other, "injected fault")
    }
}

impl<T: BlockStorage> BlockStorage for FaultyDevice<T> {
    fn open_disk<P: AsRef<Path>>(path: P, nblocks: usize) -> std::io::Result<Self> {
        T::open_disk(path, nblocks).map(Self::new)
    }

    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn block_count(&self) -> usize {
        self.inner.block_count()
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        if self.fail_reads {
            return Err(Self::injected());
        }
        self.inner.read_block(blocknr, buf)
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        if self.fail_write_to == Some(blocknr) {
            return Err(Self::injected());
        }
        self.inner.write_block(blocknr, buf)
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.inner.sync_disk()
    }
}

fn new_device(disk: &NamedTempFile, blocks: usize) -> FileBlockEmulator {
    FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
        .with_blocks(blocks)
        .build()
        .unwrap()
}

fn existing_device(disk: &NamedTempFile, blocks: usize) -> FileBlockEmulator {
    FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
        .with_blocks(blocks)
        .clear_medium(false)
        .build()
        .unwrap()
}

fn formatted(disk: &NamedTempFile, blocks: usize, slots: usize) -> FileBlockEmulator {
    let mut dev = new_device(disk, blocks);
    FormatOptions::new()
        .max_inodes(slots)
        .format(&mut dev, blocks * BLOCK_SIZE)
        .unwrap();
    dev
}

#[test]
fn format_then_mount_round_trip() {
    let disk = NamedTempFile::new().unwrap();
    let fs = MetadataStore::mount(formatted(&disk, 32, 8)).unwrap();

    assert_eq!(fs.live_files(), 0);
    assert_eq!(fs.free_blocks(), 30);
    assert_eq!(fs.block_state(0), Some(State::Used));
    assert_eq!(fs.block_state(1), Some(State::Used));
    assert!((2..32).all(|n| fs.block_state(n) == Some(State::Free)));
}

#[test]
fn single_block_file_scenario() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(formatted(&disk, 4, 8)).unwrap();

    assert_eq!(fs.create_file(7).unwrap().block_number, 2);

    let pattern: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
    let mut file = fs.open(7).unwrap();
    assert_eq!(file.write(&pattern), 512);
    assert_eq!(file.size(), 512);

    file.reset();
    let mut read_back = vec![0; 512];
    assert_eq!(file.read(&mut read_back), 512);
    assert_eq!(read_back, &pattern[..512]);
    file.close().unwrap();

    fs.delete_file(7).unwrap();
    assert_eq!(fs.create_file(9).unwrap().block_number, 2);
}

#[test]
fn files_survive_unmount_and_remount() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(formatted(&disk, 8, 8)).unwrap();
    for id in 1..=3 {
        fs.create_file(id).unwrap();
        let mut file = fs.open(id).unwrap();
        file.write_all(format!("file number {}", id).as_bytes()).unwrap();
        file.close().unwrap();
    }
    fs.unmount().unwrap();

    let mut fs = MetadataStore::mount(existing_device(&disk, 8)).unwrap();
    assert_eq!(fs.live_files(), 3);
    assert_eq!(fs.free_blocks(), 3);
    let mut ids: Vec<_> = fs.files().map(|node| node.id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3]);

    let mut file = fs.open(2).unwrap();
    let mut content = vec![0; file.size()];
    file.read(&mut content);
    assert_eq!(content, b"file number 2");
}

#[test]
fn reopen_by_path() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(formatted(&disk, 4, 4)).unwrap();
    fs.create_file(1).unwrap();
    fs.unmount().unwrap();

    let dev = FileBlockEmulator::open_disk(disk.path(), 4).unwrap();
    let fs = MetadataStore::mount(dev).unwrap();
    assert!(fs.lookup_file(1).is_ok());
}

#[test]
fn exhausting_inodes_leaves_existing_files_intact() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(formatted(&disk, 16, 4)).unwrap();
    for id in 0..4 {
        fs.create_file(id * 10).unwrap();
    }
    assert!(matches!(fs.create_file(99), Err(FsError::OutOfInodes)));

    for id in 0..4 {
        let node = fs.lookup_file(id * 10).unwrap();
        assert_eq!(node.block_number, 2 + id as usize);
    }
}

#[test]
fn exhausting_blocks_leaves_existing_files_intact() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(formatted(&disk, 5, 8)).unwrap();
    for id in 0..3 {
        fs.create_file(id).unwrap();
    }
    assert!(matches!(fs.create_file(3), Err(FsError::OutOfBlocks)));
    assert_eq!(fs.live_files(), 3);
    assert_eq!(fs.free_blocks(), 0);

    fs.delete_file(1).unwrap();
    assert_eq!(fs.create_file(3).unwrap().block_number, 3);
}

#[test]
fn deleted_content_is_not_zeroed() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(formatted(&disk, 4, 4)).unwrap();
    fs.create_file(1).unwrap();
    fs.open(1).unwrap().write_all(b"leftover").unwrap();
    fs.delete_file(1).unwrap();

    // The new file starts empty even though the old bytes are still on disk.
    fs.create_file(2).unwrap();
    let mut file = fs.open(2).unwrap();
    assert_eq!(file.size(), 0);
    assert!(file.at_end());
    file.close().unwrap();

    let mut dev = fs.unmount().unwrap();
    let mut raw = vec![0; BLOCK_SIZE];
    dev.read_block(2, &mut raw).unwrap();
    assert_eq!(&raw[..8], b"leftover");
}

#[test]
fn format_does_not_touch_a_mounted_store() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(formatted(&disk, 4, 4)).unwrap();
    fs.create_file(1).unwrap();

    let mut other = existing_device(&disk, 4);
    MetadataStore::format(&mut other, 4 * BLOCK_SIZE).unwrap();

    assert!(fs.lookup_file(1).is_ok());
    assert_eq!(MetadataStore::mount(other).unwrap().live_files(), 0);
}

#[test]
fn mount_propagates_read_failures() {
    let disk = NamedTempFile::new().unwrap();
    let mut dev = FaultyDevice::new(formatted(&disk, 4, 4));
    dev.fail_reads = true;
    assert!(matches!(
        MetadataStore::mount(dev),
        Err(FsError::DeviceError(_))
    ));
}

#[test]
fn close_propagates_write_failures() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(FaultyDevice::new(formatted(&disk, 4, 4))).unwrap();
    fs.create_file(1).unwrap();
    fs.unmount().unwrap();

    let mut dev = FaultyDevice::<FileBlockEmulator>::open_disk(disk.path(), 4).unwrap();
    dev.fail_write_to = Some(2);
    let mut fs = MetadataStore::mount(dev).unwrap();
    let mut file = fs.open(1).unwrap();
    file.write_all(b"lost").unwrap();
    assert!(matches!(file.close(), Err(FsError::DeviceError(_))));
}

// A closed handle persists the inode table but not the bitmap, so a store
// dropped without `flush` leaves a live file on a free block behind.
#[test]
fn close_without_flush_leaves_bitmap_behind() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(formatted(&disk, 4, 4)).unwrap();
    fs.create_file(1).unwrap();
    fs.open(1).unwrap().close().unwrap();
    drop(fs);

    assert!(matches!(
        MetadataStore::mount(existing_device(&disk, 4)),
        Err(FsError::Unformatted)
    ));
}

#[test]
fn flush_after_close_keeps_device_mountable() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(formatted(&disk, 4, 4)).unwrap();
    fs.create_file(1).unwrap();
    fs.open(1).unwrap().close().unwrap();
    fs.flush().unwrap();
    drop(fs);

    let fs = MetadataStore::mount(existing_device(&disk, 4)).unwrap();
    assert_eq!(fs.lookup_file(1).unwrap().block_number, 2);
    assert_eq!(fs.block_state(2), Some(State::Used));
}

// Format writes the bitmap and the inode table separately; losing the second
// write leaves a fresh bitmap next to the previous inode table.
#[test]
fn torn_format_mixes_old_and_new_metadata() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(formatted(&disk, 4, 4)).unwrap();
    fs.create_file(1).unwrap();
    fs.unmount().unwrap();

    let mut dev = FaultyDevice::new(existing_device(&disk, 4));
    dev.fail_write_to = Some(1);
    assert!(matches!(
        MetadataStore::format(&mut dev, 4 * BLOCK_SIZE),
        Err(FsError::DeviceError(_))
    ));

    // The fresh bitmap frees block 2 while the old table still uses it.
    assert!(matches!(
        MetadataStore::mount(existing_device(&disk, 4)),
        Err(FsError::Unformatted)
    ));
}

#[test]
fn unformatted_device_does_not_mount() {
    let disk = NamedTempFile::new().unwrap();
    let dev = new_device(&disk, 4);
    assert!(matches!(
        MetadataStore::mount(dev),
        Err(FsError::Unformatted)
    ));
}

#[test]
fn device_with_other_block_size_does_not_mount() {
    let disk = NamedTempFile::new().unwrap();
    let mut dev = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
        .with_block_size(1024)
        .with_blocks(4)
        .build()
        .unwrap();
    MetadataStore::format(&mut dev, 4 * 1024).unwrap();
    let mut fs = MetadataStore::mount(dev).unwrap();
    fs.create_file(1).unwrap();
    fs.unmount().unwrap();

    let dev = existing_device(&disk, 4);
    assert_eq!(dev.block_size(), BLOCK_SIZE);
    assert!(matches!(
        MetadataStore::mount(dev),
        Err(FsError::Unformatted)
    ));
}

#[test]
fn same_id_can_be_recreated_after_delete() {
    let disk = NamedTempFile::new().unwrap();
    let mut fs = MetadataStore::mount(formatted(&disk, 4, 4)).unwrap();
    fs.create_file(3).unwrap();
    fs.delete_file(3).unwrap();
    let block = fs.create_file(3).unwrap().block_number;
    fs.unmount().unwrap();

    let fs = MetadataStore::mount(existing_device(&disk, 4)).unwrap();
    assert_eq!(fs.lookup_file(3).unwrap().block_number, block);
    assert_eq!(fs.block_state(block), Some(State::Used));
}

#[test]
fn device_smaller_than_recorded_geometry_does_not_mount() {
    let disk = NamedTempFile::new().unwrap();
    formatted(&disk, 8, 4);
    let dev = existing_device(&disk, 4);
    assert!(matches!(
        MetadataStore::mount(dev),
        Err(FsError::Unformatted)
    ));
}
