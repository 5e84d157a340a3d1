//! Text analog of GDIFF for content that should stay human-readable.
//!
//! ```text
//! gdiff-text ::= header { copy | data }
//! header     ::= "gdt" LF
//! copy       ::= "y" hex-offset "," hex-length LF
//! data       ::= "i" hex-length LF bytes LF
//! ```
//!
//! `y` and `i` are used instead of `c` and `d` so commands never look like hex digits.

use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};

use crate::diff_writer::DiffWriter;
use crate::error::{PatchError, Result};

pub const HEADER: &[u8] = b"gdt\n";
pub const COPY: u8 = b'y';
pub const DATA: u8 = b'i';

/// Largest data record the writer emits.
pub const CHUNK_SIZE: usize = 32 * 1024;

pub struct GDiffTextWriter<W: Write> {
    output: W,
    pending: Vec<u8>,
}

impl<W: Write> GDiffTextWriter<W> {
    pub fn new(mut output: W) -> io::Result<Self> {
        output.write_all(HEADER)?;
        Ok(Self {
            output,
            pending: Vec::new(),
        })
    }

    pub fn into_inner(self) -> W {
        self.output
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        writeln!(self.output, "{}{:x}", DATA as char, self.pending.len())?;
        self.output.write_all(&self.pending)?;
        self.output.write_all(b"\n")?;
        self.pending.clear();
        Ok(())
    }
}

impl<W: Write> DiffWriter for GDiffTextWriter<W> {
    fn add_copy(&mut self, offset: u64, length: u64) -> io::Result<()> {
        self.flush_pending()?;
        writeln!(self.output, "{}{offset:x},{length:x}", COPY as char)
    }

    fn add_data(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let n = (CHUNK_SIZE - self.pending.len()).min(data.len());
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
        self.output.flush()
    }
}

/// Decode a text delta against `source`, writing the target to `output`.
pub fn apply_gdiff_text<S, P, W>(source: &mut S, patch: &mut P, output: &mut W) -> Result<u64>
where
    S: Read + Seek,
    P: BufRead,
    W: Write,
{
    let mut header = [0u8; 4];
    patch.read_exact(&mut header).map_err(PatchError::from_stream)?;
    if &header[..] != HEADER {
        return Err(PatchError::BadMagic);
    }

    let mut written = 0u64;
    let mut command = [0u8; 1];
    loop {
        if patch.read(&mut command)? == 0 {
            break;
        }
        match command[0] {
            COPY => {
                let line = read_line(patch)?;
                let (offset, length) = line.split_once(',').ok_or_else(|| malformed(&line))?;
                let offset = parse_hex(offset)?;
                let length = parse_hex(length)?;
                source.seek(SeekFrom::Start(offset))?;
                let copied = io::copy(&mut source.by_ref().take(length), output)?;
                if copied != length {
                    return Err(PatchError::CopyOutOfRange { offset, length });
                }
                written += copied;
            }
            DATA => {
                let length = parse_hex(&read_line(patch)?)?;
                let copied = io::copy(&mut patch.by_ref().take(length), output)?;
                if copied != length {
                    return Err(PatchError::Truncated);
                }
                let mut lf = [0u8; 1];
                patch.read_exact(&mut lf).map_err(PatchError::from_stream)?;
                if lf[0] != b'\n' {
                    return Err(malformed("data record without trailing newline"));
                }
                written += copied;
            }
            other => return Err(PatchError::UnknownCommand(other)),
        }
    }

    output.flush()?;
    Ok(written)
}

fn read_line<P: BufRead>(patch: &mut P) -> Result<String> {
    let mut line = Vec::new();
    patch.read_until(b'\n', &mut line)?;
    if line.pop() != Some(b'\n') {
        return Err(PatchError::Truncated);
    }
    String::from_utf8(line).map_err(|e| malformed(&String::from_utf8_lossy(e.as_bytes())))
}

fn parse_hex(field: &str) -> Result<u64> {
    u64::from_str_radix(field, 16).map_err(|_| malformed(field))
}

fn malformed(what: &str) -> PatchError {
    PatchError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed text delta record: {what}"),
    ))
}
