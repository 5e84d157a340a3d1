use std::collections::HashMap;
use std::io::{self, Read};

use crate::rolling_hash::RollingHash;

/// Weak checksum of every full `block_size` block of a source, mapped to the
/// block's starting offset.
///
/// Only the first block seen for a given checksum is kept. A colliding block
/// that is never proposed costs a missed match, not a wrong one, since every
/// candidate is verified byte by byte during extension.
#[derive(Debug)]
pub struct BlockChecksumIndex {
    block_size: usize,
    offsets: HashMap<u32, u64>,
}

impl BlockChecksumIndex {
    /// Read `source` from its current position to the end and index it.
    /// A trailing partial block is not indexed.
    pub fn build<R: Read>(source: &mut R, block_size: usize) -> io::Result<Self> {
        if block_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block size must be at least 1",
            ));
        }

        let mut offsets = HashMap::new();
        let mut block = vec![0u8; block_size];
        let mut offset = 0u64;

        while read_block(source, &mut block)? {
            offsets
                .entry(RollingHash::over(&block).digest())
                .or_insert(offset);
            offset += block_size as u64;
        }

        Ok(Self {
            block_size,
            offsets,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Offset of the source block whose checksum equals `digest`, if any.
    pub fn find(&self, digest: u32) -> Option<u64> {
        self.offsets.get(&digest).copied()
    }

    /// Number of distinct checksums indexed.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Fill `block` completely. Returns false if the source ran out first.
fn read_block<R: Read>(source: &mut R, block: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < block.len() {
        match source.read(&mut block[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
