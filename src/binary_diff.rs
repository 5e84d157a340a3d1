use std::io::{self, BufRead, Cursor, Read, Seek, SeekFrom};

use crate::checksum_index::BlockChecksumIndex;
use crate::diff_writer::{DiffOp, DiffWriter, OpCollector};
use crate::rolling_hash::RollingHash;

/// Default block size for binary content. Entries no larger than this are
/// never diffed.
pub const DEFAULT_BLOCK_SIZE: usize = 32;

/// Compute a delta between `source` and `target`, streaming operations to `output`.
///
/// Block-matching, single pass over the target:
/// 1. Index every aligned `block_size` block of the source by weak checksum
/// 2. Slide a `block_size` window over the target, rolling its checksum
/// 3. On a checksum hit, extend the match byte by byte from the candidate offset
/// 4. Matches of at least one block become Copy; everything else is emitted as Literal
///
/// Only one source offset is tried per checksum. `output` is closed on success.
pub fn compute_diff<S, T, W>(
    source: &mut S,
    target: T,
    block_size: usize,
    mut output: W,
) -> io::Result<()>
where
    S: BufRead + Seek,
    T: Read,
    W: DiffWriter,
{
    source.seek(SeekFrom::Start(0))?;
    let index = BlockChecksumIndex::build(source, block_size)?;
    let mut target = TargetState::new(target, block_size);

    while !target.eof {
        if let Some(offset) = target.find(&index)? {
            source.seek(SeekFrom::Start(offset))?;
            let matched = target.longest_match(source)?;
            if matched >= block_size as u64 {
                output.add_copy(offset, matched)?;
                target.reset_window();
                continue;
            }
            // Weak checksum collision: give the partially matched bytes back.
            target.unread(matched as usize);
        }
        if let Some(byte) = target.read_byte()? {
            output.add_data(&[byte])?;
        }
    }

    output.close()
}

/// Convenience wrapper over in-memory data.
pub fn diff_bytes(
    source: &[u8],
    target: &[u8],
    block_size: usize,
) -> io::Result<Vec<DiffOp>> {
    let mut collector = OpCollector::new();
    compute_diff(&mut Cursor::new(source), target, block_size, &mut collector)?;
    Ok(collector.into_ops())
}

/// Lookahead buffer over the target stream holding the current window.
struct TargetState<R> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
    end: usize,
    block_size: usize,
    hash: RollingHash,
    /// The checksum covers `buf[pos..pos + block_size]`.
    hash_valid: bool,
    exhausted: bool,
    eof: bool,
}

impl<R: Read> TargetState<R> {
    fn new(reader: R, block_size: usize) -> Self {
        let capacity = (8 * 1024).max(block_size * 4);
        Self {
            reader,
            buf: vec![0u8; capacity],
            pos: 0,
            end: 0,
            block_size,
            hash: RollingHash::over(&[]),
            hash_valid: false,
            exhausted: false,
            eof: false,
        }
    }

    fn remaining(&self) -> usize {
        self.end - self.pos
    }

    /// Move unread bytes to the front and top the buffer up from the reader.
    fn refill(&mut self) -> io::Result<()> {
        if self.exhausted {
            return Ok(());
        }
        self.buf.copy_within(self.pos..self.end, 0);
        self.end -= self.pos;
        self.pos = 0;
        while self.end < self.buf.len() {
            match self.reader.read(&mut self.buf[self.end..]) {
                Ok(0) => {
                    self.exhausted = true;
                    break;
                }
                Ok(n) => self.end += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Source offset proposed by the index for the current window, if any.
    fn find(&mut self, index: &BlockChecksumIndex) -> io::Result<Option<u64>> {
        if !self.hash_valid {
            if self.remaining() < self.block_size {
                self.refill()?;
            }
            if self.remaining() < self.block_size {
                return Ok(None);
            }
            self.hash = RollingHash::over(&self.buf[self.pos..self.pos + self.block_size]);
            self.hash_valid = true;
        }
        Ok(index.find(self.hash.digest()))
    }

    /// Consume one target byte, sliding the window and its checksum along.
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.remaining() <= self.block_size {
            self.refill()?;
        }
        if self.remaining() == 0 {
            self.eof = true;
            return Ok(None);
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        if self.hash_valid {
            if self.remaining() >= self.block_size {
                let entering = self.buf[self.pos + self.block_size - 1];
                self.hash.roll(byte, entering);
            } else {
                self.hash_valid = false;
            }
        }
        Ok(Some(byte))
    }

    /// Consume target bytes while they equal the source bytes read from its
    /// current position. Returns the number of bytes consumed.
    fn longest_match<S: BufRead>(&mut self, source: &mut S) -> io::Result<u64> {
        let mut matched = 0u64;
        loop {
            let chunk = source.fill_buf()?;
            if chunk.is_empty() {
                return Ok(matched);
            }
            let mut used = 0;
            let mut stop = false;
            for &expected in chunk {
                if self.pos == self.end {
                    self.refill()?;
                    if self.pos == self.end {
                        stop = true;
                        break;
                    }
                }
                if self.buf[self.pos] != expected {
                    stop = true;
                    break;
                }
                self.pos += 1;
                used += 1;
            }
            source.consume(used);
            matched += used as u64;
            if stop {
                return Ok(matched);
            }
        }
    }

    /// Step back over `n` bytes consumed by a rejected match. The window's
    /// checksum is unchanged by the round trip.
    fn unread(&mut self, n: usize) {
        debug_assert!(n <= self.pos, "cannot unread past the buffer start");
        self.pos -= n;
    }

    /// The cursor jumped; the next window is checksummed from scratch.
    fn reset_window(&mut self) {
        self.hash_valid = false;
    }
}
