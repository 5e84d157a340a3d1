use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;

use tracing::{debug, info};
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::binary_diff::{compute_diff, DEFAULT_BLOCK_SIZE};
use crate::error::{PatchError, Result};
use crate::gdiff::GDiffWriter;
use crate::legacy;
use crate::patch_format::{
    NameAllocator, PatchManifest, BLOB_SUFFIX, CHECKSUM_ENTRY, INPUT_NAME_ENTRY, MANIFEST_ENTRY,
    OUTPUT_NAME_ENTRY, PATCH_PREFIX, RAW_PREFIX,
};
use crate::segmented_buffer::SegmentedBuffer;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    /// Matching granularity. Entries no larger than this on either side are
    /// replaced rather than diffed.
    pub block_size: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl DiffOptions {
    pub(crate) fn checked_block_size(&self) -> Result<usize> {
        match self.block_size {
            0 => Err(PatchError::InvalidBlockSize),
            n => Ok(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    pub diff: DiffOptions,
    /// Record the BLAKE3 digest of the source archive in the patch.
    pub checksum: bool,
    pub input_name: Option<String>,
    pub output_name: Option<String>,
    /// Write the older `META-INF/file.list` layout instead of `patch.info`.
    pub legacy: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            diff: DiffOptions::default(),
            checksum: true,
            input_name: None,
            output_name: None,
            legacy: false,
        }
    }
}

/// Per-category entry counts of a computed diff.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiffSummary {
    pub additions: usize,
    pub removals: usize,
    pub replacements: usize,
    pub patches: usize,
    pub unchanged: usize,
}

/// How a target file relates to its source counterpart.
pub(crate) enum Change {
    Added,
    Unchanged,
    Replaced,
    Patched(SegmentedBuffer),
}

/// Classify a target file given the source content of the same name, if any.
/// Entries no larger than one block on either side are never diffed.
pub(crate) fn classify(
    source: Option<SegmentedBuffer>,
    target: &SegmentedBuffer,
    block_size: usize,
) -> Change {
    match source {
        None => Change::Added,
        Some(source) if source == *target => Change::Unchanged,
        Some(source) if source.len() <= block_size as u64 || target.len() <= block_size as u64 => {
            Change::Replaced
        }
        Some(source) => Change::Patched(source),
    }
}

/// Buffer the content of the file `name` from `archive`, or `None` when it has
/// no such file.
pub(crate) fn buffer_file<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<SegmentedBuffer>> {
    let Some(index) = archive.index_for_name(name) else {
        return Ok(None);
    };
    let mut entry = archive.by_index(index)?;
    if entry.is_dir() {
        return Ok(None);
    }
    let size = entry.size();
    Ok(Some(util::buffer_entry(&mut entry, size)?))
}

/// Write `data` as a new entry `name`.
pub(crate) fn write_blob<W: Write + Seek>(
    output: &mut ZipWriter<W>,
    name: &str,
    data: &SegmentedBuffer,
    modified: Option<DateTime>,
) -> Result<()> {
    output.start_file(name, util::file_options(modified, data.len()))?;
    io::copy(&mut data.reader(), output)?;
    Ok(())
}

/// Write a GDIFF stream turning `source` into `target` as a new entry `name`.
pub(crate) fn write_delta<W: Write + Seek>(
    output: &mut ZipWriter<W>,
    name: &str,
    source: &SegmentedBuffer,
    target: &SegmentedBuffer,
    modified: Option<DateTime>,
    block_size: usize,
) -> Result<()> {
    // A delta stays well within twice the target size.
    let bound = target.len().saturating_mul(2);
    output.start_file(name, util::file_options(modified, bound))?;
    let writer = GDiffWriter::new(&mut *output)?;
    compute_diff(&mut source.reader(), target.reader(), block_size, writer)?;
    Ok(())
}

/// Diff two archives, writing blobs and the manifest into `output`.
///
/// Entries are visited in target order. Blob names come from two counters,
/// `raw/N.bin` for additions and replacements and `patch/N.bin` for deltas,
/// and `patch.info` is written after every blob. The writer is not finished.
pub fn create_patch<R1, R2, W>(
    source: &mut ZipArchive<R1>,
    target: &mut ZipArchive<R2>,
    output: &mut ZipWriter<W>,
    options: &DiffOptions,
) -> Result<DiffSummary>
where
    R1: Read + Seek,
    R2: Read + Seek,
    W: Write + Seek,
{
    let block_size = options.checked_block_size()?;

    let mut manifest = PatchManifest::new();
    let mut summary = DiffSummary::default();
    let mut raw_names = NameAllocator::new(RAW_PREFIX, BLOB_SUFFIX);
    let mut patch_names = NameAllocator::new(PATCH_PREFIX, BLOB_SUFFIX);

    let target_names: HashSet<&str> = target.file_names().collect();
    for name in source.file_names() {
        if !target_names.contains(name) {
            debug!(path = name, "removal");
            manifest.removal(name);
            summary.removals += 1;
        }
    }
    drop(target_names);

    // New directories all point at one empty placeholder.
    let mut directory_blob: Option<String> = None;

    for index in 0..target.len() {
        let mut entry = target.by_index(index)?;
        let name = entry.name().to_owned();
        let modified = entry.last_modified();

        if entry.is_dir() {
            if source.index_for_name(&name).is_some() {
                summary.unchanged += 1;
                continue;
            }
            let blob = match &directory_blob {
                Some(blob) => blob.clone(),
                None => {
                    // Stamped like the first new directory.
                    let blob = raw_names.next_name();
                    let options = util::file_options(modified, 0)
                        .compression_method(CompressionMethod::Stored);
                    output.start_file(blob.as_str(), options)?;
                    directory_blob = Some(blob.clone());
                    blob
                }
            };
            debug!(path = %name, %blob, "directory addition");
            manifest.addition(name, blob);
            summary.additions += 1;
            continue;
        }

        let size = entry.size();
        let target_data = util::buffer_entry(&mut entry, size)?;
        drop(entry);

        match classify(buffer_file(source, &name)?, &target_data, block_size) {
            Change::Unchanged => summary.unchanged += 1,
            Change::Added => {
                let blob = raw_names.next_name();
                write_blob(output, &blob, &target_data, modified)?;
                debug!(path = %name, %blob, "addition");
                manifest.addition(name, blob);
                summary.additions += 1;
            }
            Change::Replaced => {
                let blob = raw_names.next_name();
                write_blob(output, &blob, &target_data, modified)?;
                debug!(path = %name, %blob, "replacement");
                manifest.replacement(name, blob);
                summary.replacements += 1;
            }
            Change::Patched(source_data) => {
                let blob = patch_names.next_name();
                write_delta(output, &blob, &source_data, &target_data, modified, block_size)?;
                debug!(path = %name, %blob, "patch");
                manifest.patch(name, blob);
                summary.patches += 1;
            }
        }
    }

    output.start_file(MANIFEST_ENTRY, util::file_options(None, 0))?;
    manifest.write_to(output)?;

    info!(
        additions = summary.additions,
        removals = summary.removals,
        replacements = summary.replacements,
        patches = summary.patches,
        unchanged = summary.unchanged,
        "diff computed"
    );
    Ok(summary)
}

fn write_aux<W: Write + Seek>(output: &mut ZipWriter<W>, name: &str, data: &[u8]) -> Result<()> {
    output.start_file(name, util::file_options(None, data.len() as u64))?;
    output.write_all(data)?;
    Ok(())
}

/// Diff the archive files `old` and `new` into a patch archive at `output`.
///
/// The auxiliary checksum and name hints go in before any blob.
pub fn create_patch_file(
    old: &Path,
    new: &Path,
    output: &Path,
    options: &CreateOptions,
) -> Result<DiffSummary> {
    let old_map = util::mmap_file(old)?;
    let new_map = util::mmap_file(new)?;
    let mut source = ZipArchive::new(Cursor::new(&old_map[..]))?;
    let mut target = ZipArchive::new(Cursor::new(&new_map[..]))?;

    let file = File::create(output)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));

    if options.checksum {
        write_aux(&mut writer, CHECKSUM_ENTRY, &util::hash_bytes(&old_map))?;
    }
    if let Some(name) = &options.input_name {
        write_aux(&mut writer, INPUT_NAME_ENTRY, name.as_bytes())?;
    }
    if let Some(name) = &options.output_name {
        write_aux(&mut writer, OUTPUT_NAME_ENTRY, name.as_bytes())?;
    }

    let summary = if options.legacy {
        legacy::create_legacy_patch(&mut source, &mut target, &mut writer, &options.diff)?
    } else {
        create_patch(&mut source, &mut target, &mut writer, &options.diff)?
    };
    writer.finish()?.flush()?;
    Ok(summary)
}
