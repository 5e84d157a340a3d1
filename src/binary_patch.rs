use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{PatchError, Result};
use crate::gdiff::{
    COPY_INT_INT, COPY_INT_UBYTE, COPY_INT_USHORT, COPY_LONG_INT, COPY_USHORT_INT,
    COPY_USHORT_UBYTE, COPY_USHORT_USHORT, DATA_INT, DATA_MAX, DATA_USHORT, EOF, MAGIC,
};

/// Reconstruct the target by decoding the GDIFF stream `patch` against `source`,
/// writing the result to `output`.
///
/// Records are consumed strictly in order. Returns the number of bytes written.
pub fn apply_gdiff<S, P, W>(source: &mut S, patch: &mut P, output: &mut W) -> Result<u64>
where
    S: Read + Seek,
    P: Read,
    W: Write,
{
    let mut magic = [0u8; 5];
    patch.read_exact(&mut magic).map_err(PatchError::from_stream)?;
    if magic != MAGIC {
        return Err(PatchError::BadMagic);
    }

    let mut written = 0u64;
    loop {
        let tag = patch.read_u8().map_err(PatchError::from_stream)?;
        let n = match tag {
            EOF => break,
            1..=DATA_MAX => copy_data(patch, output, tag as u64)?,
            DATA_USHORT => {
                let len = patch.read_u16::<BigEndian>().map_err(PatchError::from_stream)?;
                copy_data(patch, output, len as u64)?
            }
            DATA_INT => {
                let len = patch.read_u32::<BigEndian>().map_err(PatchError::from_stream)?;
                copy_data(patch, output, len as u64)?
            }
            COPY_USHORT_UBYTE..=COPY_LONG_INT => {
                let (offset, length) = read_copy(patch, tag).map_err(PatchError::from_stream)?;
                copy_source(source, output, offset, length)?
            }
        };
        written += n;
    }

    output.flush()?;
    Ok(written)
}

fn read_copy<P: Read>(patch: &mut P, tag: u8) -> io::Result<(u64, u64)> {
    let offset = match tag {
        COPY_USHORT_UBYTE | COPY_USHORT_USHORT | COPY_USHORT_INT => {
            patch.read_u16::<BigEndian>()? as u64
        }
        COPY_INT_UBYTE | COPY_INT_USHORT | COPY_INT_INT => patch.read_u32::<BigEndian>()? as u64,
        _ => patch.read_u64::<BigEndian>()?,
    };
    let length = match tag {
        COPY_USHORT_UBYTE | COPY_INT_UBYTE => patch.read_u8()? as u64,
        COPY_USHORT_USHORT | COPY_INT_USHORT => patch.read_u16::<BigEndian>()? as u64,
        _ => patch.read_u32::<BigEndian>()? as u64,
    };
    Ok((offset, length))
}

/// Copy a literal record of `len` bytes from the patch stream.
fn copy_data<P: Read, W: Write>(patch: &mut P, output: &mut W, len: u64) -> Result<u64> {
    let copied = io::copy(&mut patch.by_ref().take(len), output)?;
    if copied != len {
        return Err(PatchError::Truncated);
    }
    Ok(copied)
}

fn copy_source<S, W>(source: &mut S, output: &mut W, offset: u64, length: u64) -> Result<u64>
where
    S: Read + Seek,
    W: Write,
{
    source.seek(SeekFrom::Start(offset))?;
    let copied = io::copy(&mut source.by_ref().take(length), output)?;
    if copied != length {
        return Err(PatchError::CopyOutOfRange { offset, length });
    }
    Ok(copied)
}
