//! Growable in-memory byte sink for a single archive entry.
//!
//! Data lives in one contiguous `Vec<u8>` until a write would push it past one
//! page. From then on it is kept as a list of fixed-size pages addressed with
//! `page = pos >> page_bits` and `offset = pos & page_mask`, so an entry of any
//! size can be buffered without a single giant allocation.

use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};

/// Page size exponent used by [`SegmentedBuffer::new`] (1 GiB pages).
pub const DEFAULT_PAGE_BITS: u32 = 30;

/// Initial capacity hint for buffering one archive entry.
pub const DEFAULT_INITIAL_CAPACITY: usize = 1 << 20;

#[derive(Debug)]
enum Storage {
    Contiguous(Vec<u8>),
    Paged(Vec<Vec<u8>>),
}

#[derive(Debug)]
pub struct SegmentedBuffer {
    storage: Storage,
    len: u64,
    page_bits: u32,
}

impl SegmentedBuffer {
    pub fn new(initial_capacity: usize) -> Self {
        Self::with_page_bits(initial_capacity, DEFAULT_PAGE_BITS)
    }

    /// Create a buffer whose contiguous limit and page size are `1 << page_bits`.
    pub fn with_page_bits(initial_capacity: usize, page_bits: u32) -> Self {
        let page_size = 1usize << page_bits;
        Self {
            storage: Storage::Contiguous(Vec::with_capacity(initial_capacity.min(page_size))),
            len: 0,
            page_bits,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True once the buffer has switched to the paged representation.
    pub fn is_segmented(&self) -> bool {
        matches!(self.storage, Storage::Paged(_))
    }

    fn page_size(&self) -> usize {
        1usize << self.page_bits
    }

    fn page_mask(&self) -> u64 {
        (1u64 << self.page_bits) - 1
    }

    /// Append `data` at the end of the buffer.
    pub fn append(&mut self, data: &[u8]) {
        let page_size = self.page_size();
        if let Storage::Contiguous(block) = &mut self.storage {
            if block.len() + data.len() <= page_size {
                block.extend_from_slice(data);
                self.len += data.len() as u64;
                return;
            }
            // The contiguous block never exceeds one page, so it becomes page zero.
            let mut first = std::mem::take(block);
            first.reserve_exact(page_size - first.len());
            self.storage = Storage::Paged(vec![first]);
        }

        if let Storage::Paged(pages) = &mut self.storage {
            let mut rest = data;
            while !rest.is_empty() {
                let needs_page = pages.last().map_or(true, |page| page.len() == page_size);
                if needs_page {
                    pages.push(Vec::with_capacity(page_size));
                }
                if let Some(page) = pages.last_mut() {
                    let n = (page_size - page.len()).min(rest.len());
                    page.extend_from_slice(&rest[..n]);
                    rest = &rest[n..];
                }
            }
        }
        self.len += data.len() as u64;
    }

    /// Longest contiguous run of bytes starting at `pos`; empty at or past the end.
    pub fn chunk_at(&self, pos: u64) -> &[u8] {
        if pos >= self.len {
            return &[];
        }
        match &self.storage {
            Storage::Contiguous(block) => &block[pos as usize..],
            Storage::Paged(pages) => {
                let page = (pos >> self.page_bits) as usize;
                let offset = (pos & self.page_mask()) as usize;
                &pages[page][offset..]
            }
        }
    }

    /// Byte at absolute position `pos`.
    pub fn byte_at(&self, pos: u64) -> Option<u8> {
        self.chunk_at(pos).first().copied()
    }

    /// Byte-for-byte comparison, rejecting on length before touching content.
    pub fn content_eq(&self, other: &SegmentedBuffer) -> bool {
        if self.len != other.len {
            return false;
        }
        let mut pos = 0u64;
        while pos < self.len {
            let a = self.chunk_at(pos);
            let b = other.chunk_at(pos);
            let n = a.len().min(b.len());
            if a[..n] != b[..n] {
                return false;
            }
            pos += n as u64;
        }
        true
    }

    /// Sequential and seekable read view over the buffered bytes.
    pub fn reader(&self) -> SegmentedReader<'_> {
        SegmentedReader { buf: self, pos: 0 }
    }
}

impl PartialEq for SegmentedBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.content_eq(other)
    }
}

impl Eq for SegmentedBuffer {}

impl Write for SegmentedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Cursor over a [`SegmentedBuffer`]. Serves as the seekable copy source when
/// computing or applying a delta.
pub struct SegmentedReader<'a> {
    buf: &'a SegmentedBuffer,
    pos: u64,
}

impl SegmentedReader<'_> {
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for SegmentedReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let chunk = self.buf.chunk_at(self.pos);
        let n = chunk.len().min(out.len());
        out[..n].copy_from_slice(&chunk[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl BufRead for SegmentedReader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        Ok(self.buf.chunk_at(self.pos))
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt as u64).min(self.buf.len());
    }
}

impl Seek for SegmentedReader<'_> {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let (base, delta) = match target {
            SeekFrom::Start(n) => {
                self.pos = n;
                return Ok(n);
            }
            SeekFrom::End(delta) => (self.buf.len(), delta),
            SeekFrom::Current(delta) => (self.pos, delta),
        };
        match base.checked_add_signed(delta) {
            Some(pos) => {
                self.pos = pos;
                Ok(pos)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}
