//! GDIFF encoding of the Copy/Literal operation stream.
//!
//! Layout: the five magic bytes `d1 ff d1 ff 04`, then tagged records, then a
//! single `0x00` byte. All multi-byte fields are big-endian.
//!
//! | tag       | record                                          |
//! |-----------|-------------------------------------------------|
//! | 1..=246   | literal, that many bytes follow                 |
//! | 247       | literal, u16 length, data                       |
//! | 248       | literal, u32 length, data                       |
//! | 249..=251 | copy, u16 offset, u8/u16/u32 length             |
//! | 252..=254 | copy, u32 offset, u8/u16/u32 length             |
//! | 255       | copy, u64 offset, u32 length                    |
//!
//! See <http://www.w3.org/TR/NOTE-gdiff-19970901.html>.

use std::io::{self, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::diff_writer::DiffWriter;

pub const MAGIC: [u8; 5] = [0xd1, 0xff, 0xd1, 0xff, 0x04];

pub const EOF: u8 = 0;
/// Largest literal length encoded directly in the tag byte.
pub const DATA_MAX: u8 = 246;
pub const DATA_USHORT: u8 = 247;
pub const DATA_INT: u8 = 248;
pub const COPY_USHORT_UBYTE: u8 = 249;
pub const COPY_USHORT_USHORT: u8 = 250;
pub const COPY_USHORT_INT: u8 = 251;
pub const COPY_INT_UBYTE: u8 = 252;
pub const COPY_INT_USHORT: u8 = 253;
pub const COPY_INT_INT: u8 = 254;
pub const COPY_LONG_INT: u8 = 255;

/// Largest literal record the writer emits.
pub const CHUNK_SIZE: usize = i16::MAX as usize;

/// Streams GDIFF records to `W`, buffering literal bytes so runs of single
/// literals become one record.
pub struct GDiffWriter<W: Write> {
    output: W,
    pending: Vec<u8>,
}

impl<W: Write> GDiffWriter<W> {
    /// Write the magic header and return a writer positioned after it.
    pub fn new(mut output: W) -> io::Result<Self> {
        output.write_all(&MAGIC)?;
        Ok(Self {
            output,
            pending: Vec::with_capacity(CHUNK_SIZE),
        })
    }

    pub fn into_inner(self) -> W {
        self.output
    }

    fn write_data_record(&mut self, len: usize) -> io::Result<()> {
        if len <= DATA_MAX as usize {
            self.output.write_u8(len as u8)?;
        } else if len <= u16::MAX as usize {
            self.output.write_u8(DATA_USHORT)?;
            self.output.write_u16::<BigEndian>(len as u16)?;
        } else {
            self.output.write_u8(DATA_INT)?;
            self.output.write_u32::<BigEndian>(len as u32)?;
        }
        self.output.write_all(&self.pending[..len])
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            self.write_data_record(self.pending.len())?;
            self.pending.clear();
        }
        Ok(())
    }

    fn write_copy_record(&mut self, offset: u64, length: u32) -> io::Result<()> {
        let out = &mut self.output;
        if offset > u32::MAX as u64 {
            out.write_u8(COPY_LONG_INT)?;
            out.write_u64::<BigEndian>(offset)?;
            return out.write_u32::<BigEndian>(length);
        }

        let short_offset = offset <= u16::MAX as u64;
        match (short_offset, length) {
            (true, 0..=0xff) => out.write_u8(COPY_USHORT_UBYTE)?,
            (true, 0x100..=0xffff) => out.write_u8(COPY_USHORT_USHORT)?,
            (true, _) => out.write_u8(COPY_USHORT_INT)?,
            (false, 0..=0xff) => out.write_u8(COPY_INT_UBYTE)?,
            (false, 0x100..=0xffff) => out.write_u8(COPY_INT_USHORT)?,
            (false, _) => out.write_u8(COPY_INT_INT)?,
        }
        if short_offset {
            out.write_u16::<BigEndian>(offset as u16)?;
        } else {
            out.write_u32::<BigEndian>(offset as u32)?;
        }
        if length <= 0xff {
            out.write_u8(length as u8)
        } else if length <= 0xffff {
            out.write_u16::<BigEndian>(length as u16)
        } else {
            out.write_u32::<BigEndian>(length)
        }
    }
}

impl<W: Write> DiffWriter for GDiffWriter<W> {
    fn add_copy(&mut self, mut offset: u64, mut length: u64) -> io::Result<()> {
        self.flush_pending()?;
        // Length fields top out at 32 bits; longer copies become several records.
        while length > 0 {
            let step = length.min(u32::MAX as u64);
            self.write_copy_record(offset, step as u32)?;
            offset += step;
            length -= step;
        }
        Ok(())
    }

    fn add_data(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let room = CHUNK_SIZE - self.pending.len();
            let n = room.min(data.len());
            self.pending.extend_from_slice(&data[..n]);
            data = &data[n..];
            if self.pending.len() == CHUNK_SIZE {
                self.flush_pending()?;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.flush_pending()?;
        self.output.write_u8(EOF)?;
        self.output.flush()
    }
}
