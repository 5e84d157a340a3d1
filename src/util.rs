use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive};

use crate::segmented_buffer::{SegmentedBuffer, DEFAULT_INITIAL_CAPACITY};

/// Entries at or above this size need ZIP64 records.
const LARGE_FILE_THRESHOLD: u64 = u32::MAX as u64;

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> io::Result<Mmap> {
    let file = File::open(path)?;
    // SAFETY: We only read from this mapping; archives are not modified while open.
    unsafe { Mmap::map(&file) }
}

/// Compute the BLAKE3 hash of a byte slice.
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Stream-hash a file using BLAKE3.
/// Uses a 256 KB BufReader to reduce syscall overhead vs the default 8 KB.
pub fn hash_file(path: &Path) -> io::Result<[u8; 32]> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(256 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(*hasher.finalize().as_bytes())
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Options for an output entry: deflated, stamped with `modified` when known,
/// ZIP64 when `size` needs it.
pub fn file_options(modified: Option<DateTime>, size: u64) -> SimpleFileOptions {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(size >= LARGE_FILE_THRESHOLD);
    match modified {
        Some(time) => options.last_modified_time(time),
        None => options,
    }
}

/// Read an entry's content fully into a buffer sized from its declared length.
pub fn buffer_entry<R: Read>(entry: &mut R, size_hint: u64) -> io::Result<SegmentedBuffer> {
    let capacity = size_hint.min(DEFAULT_INITIAL_CAPACITY as u64) as usize;
    let mut buffer = SegmentedBuffer::new(capacity);
    io::copy(entry, &mut buffer)?;
    Ok(buffer)
}

/// Whole content of `name`, or `None` when the archive has no such entry.
pub fn read_optional<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> zip::result::ZipResult<Option<Vec<u8>>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut data)?;
    Ok(Some(data))
}
