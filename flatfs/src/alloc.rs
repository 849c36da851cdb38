use zerocopy::{AsBytes, FromBytes};

const WORD_BITS: usize = 64;
const WORD_BYTES: usize = WORD_BITS / 8;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum State {
    Free,
    Used,
}

/// One bit per block on the device, a set bit marks the block as used.
///
/// The bitmap is sized from the device geometry when it is formatted or
/// mounted. Its serialized form is the raw word array, which must fit in
/// what remains of block 0 after the super block.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// A bitmap tracking `len` blocks, all initially free.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; (len + WORD_BITS - 1) / WORD_BITS],
            len,
        }
    }

    /// The number of blocks a bitmap serialized into `bytes` bytes can track.
    pub fn capacity(bytes: usize) -> usize {
        (bytes / WORD_BYTES) * WORD_BITS
    }

    /// The number of bytes `serialize` produces.
    pub fn encoded_len(&self) -> usize {
        self.words.len() * WORD_BYTES
    }

    /// Rebuilds a bitmap of `len` blocks from its serialized words. Returns
    /// `None` if `buf` is too short to hold them.
    pub fn parse(buf: &[u8], len: usize) -> Option<Self> {
        let mut bmp = Self::new(len);
        let encoded_len = bmp.encoded_len();
        if buf.len() < encoded_len {
            return None;
        }
        for (word, chunk) in bmp
            .words
            .iter_mut()
            .zip(buf[..encoded_len].chunks_exact(WORD_BYTES))
        {
            *word = u64::read_from(chunk)?;
        }
        Some(bmp)
    }

    pub fn serialize(&self) -> &[u8] {
        self.words.as_slice().as_bytes()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Panics if `blocknr` is outside the bitmap.
    pub fn get(&self, blocknr: usize) -> State {
        assert!(blocknr < self.len, "block {} outside bitmap", blocknr);
        // Grab of the u64 containing the significant bit.
        let word = self.words[blocknr / WORD_BITS];
        let mask = 0b01_u64 << (blocknr % WORD_BITS);
        if word & mask == 0 {
            State::Free
        } else {
            State::Used
        }
    }

    pub fn set_reserved(&mut self, blocknr: usize) {
        assert!(blocknr < self.len, "block {} outside bitmap", blocknr);
        self.words[blocknr / WORD_BITS] |= 0b01_u64 << (blocknr % WORD_BITS);
    }

    pub fn set_free(&mut self, blocknr: usize) {
        assert!(blocknr < self.len, "block {} outside bitmap", blocknr);
        self.words[blocknr / WORD_BITS] &= !(0b01_u64 << (blocknr % WORD_BITS));
    }

    /// The lowest numbered free block, if any.
    pub fn first_free(&self) -> Option<usize> {
        self.iter_free().next()
    }

    pub fn count_free(&self) -> usize {
        self.iter_free().count()
    }

    /// Free blocks in ascending order.
    pub fn iter_free(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.get(i) == State::Free)
    }
}
