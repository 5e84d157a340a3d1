use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;

use tracing::{debug, info, warn};
use zip::read::{read_zipfile_from_stream, ZipFile};
use zip::result::ZipError;
use zip::{ZipArchive, ZipWriter};

use crate::binary_patch::apply_gdiff;
use crate::error::{Category, PatchError, Result, UnresolvedEntries};
use crate::legacy;
use crate::patch_format::{
    PatchManifest, CHECKSUM_ENTRY, INPUT_NAME_ENTRY, MANIFEST_ENTRY, MANIFEST_ENTRY_NAMES,
    OUTPUT_NAME_ENTRY,
};
use crate::util;

const CENTRAL_HEADER_SIGNATURE: [u8; 4] = *b"PK\x01\x02";
const END_OF_CENTRAL_SIGNATURE: [u8; 4] = *b"PK\x05\x06";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Drop original entries that collide with an addition instead of failing.
    pub ignore_mismatch: bool,
    /// Check the source archive against the digest recorded in the patch.
    pub verify_checksum: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            ignore_mismatch: false,
            verify_checksum: true,
        }
    }
}

/// Counts of what happened to each entry while applying a patch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplySummary {
    pub copied: usize,
    pub removed: usize,
    pub replaced: usize,
    pub patched: usize,
    pub added: usize,
    /// Original entries dropped because an addition supersedes them.
    pub skipped: usize,
}

/// Auxiliary data a patch archive may carry next to its manifest.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatchHints {
    pub checksum: Option<Vec<u8>>,
    pub input_name: Option<String>,
    pub output_name: Option<String>,
}

pub fn read_hints<R: Read + Seek>(patch: &mut ZipArchive<R>) -> Result<PatchHints> {
    let text = |data: Vec<u8>| String::from_utf8_lossy(&data).into_owned();
    Ok(PatchHints {
        checksum: util::read_optional(patch, CHECKSUM_ENTRY)?,
        input_name: util::read_optional(patch, INPUT_NAME_ENTRY)?.map(text),
        output_name: util::read_optional(patch, OUTPUT_NAME_ENTRY)?.map(text),
    })
}

/// Parse the manifest of `patch`, looking for `patch.info` first and then
/// `META-INF/patch.info`. A missing manifest entry is reported as
/// [`PatchError::FormatNotRecognized`].
pub fn read_manifest<R: Read + Seek>(patch: &mut ZipArchive<R>) -> Result<PatchManifest> {
    let Some(name) = MANIFEST_ENTRY_NAMES
        .into_iter()
        .find(|name| patch.index_for_name(name).is_some())
    else {
        return Err(PatchError::FormatNotRecognized {
            entry: MANIFEST_ENTRY,
        });
    };
    let entry = patch.by_name(name)?;
    Ok(PatchManifest::read_from(BufReader::new(entry))?)
}

fn open_blob<'a, R: Read + Seek>(
    patch: &'a mut ZipArchive<R>,
    category: Category,
    path: &str,
    blob: &str,
) -> Result<ZipFile<'a, R>> {
    match patch.by_name(blob) {
        Ok(entry) => Ok(entry),
        Err(ZipError::FileNotFound) => Err(PatchError::MissingBlob {
            category,
            path: path.to_owned(),
            blob: blob.to_owned(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Write blob `blob` verbatim as entry `path`, keeping the blob's timestamp.
fn copy_blob<R, W>(
    patch: &mut ZipArchive<R>,
    output: &mut ZipWriter<W>,
    category: Category,
    path: &str,
    blob: &str,
) -> Result<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut data = open_blob(patch, category, path, blob)?;
    if path.ends_with('/') {
        output.add_directory(path, util::file_options(data.last_modified(), 0))?;
        return Ok(());
    }
    output.start_file(path, util::file_options(data.last_modified(), data.size()))?;
    io::copy(&mut data, output)?;
    Ok(())
}

/// What is left of the manifest while the original entries go by.
struct EntryPatcher {
    additions: BTreeMap<String, String>,
    removals: BTreeSet<String>,
    replacements: BTreeMap<String, String>,
    patches: BTreeMap<String, String>,
    ignore_mismatch: bool,
    summary: ApplySummary,
}

impl EntryPatcher {
    fn new(manifest: PatchManifest, options: &ApplyOptions) -> Self {
        Self {
            additions: manifest.additions().clone(),
            removals: manifest.removals().clone(),
            replacements: manifest.replacements().clone(),
            patches: manifest.patches().clone(),
            ignore_mismatch: options.ignore_mismatch,
            summary: ApplySummary::default(),
        }
    }

    /// Handle one original entry: a pending addition is a conflict, then
    /// removals, directories, replacements and patches apply, and anything
    /// else is copied.
    fn entry<S, P, W>(
        &mut self,
        entry: &mut ZipFile<'_, S>,
        patch: &mut ZipArchive<P>,
        output: &mut ZipWriter<W>,
    ) -> Result<()>
    where
        S: Read,
        P: Read + Seek,
        W: Write + Seek,
    {
        let name = entry.name().to_owned();

        if self.additions.contains_key(&name) {
            if !self.ignore_mismatch {
                return Err(PatchError::AdditionConflict { path: name });
            }
            warn!(path = %name, "original entry superseded by addition");
            self.summary.skipped += 1;
            return Ok(());
        }

        if self.removals.remove(&name) {
            debug!(path = %name, "removed");
            self.summary.removed += 1;
            return Ok(());
        }

        if entry.is_dir() {
            output.add_directory(name.as_str(), util::file_options(entry.last_modified(), 0))?;
            self.summary.copied += 1;
            return Ok(());
        }

        if let Some(blob) = self.replacements.remove(&name) {
            copy_blob(patch, output, Category::Replacement, &name, &blob)?;
            debug!(path = %name, %blob, "replaced");
            self.summary.replaced += 1;
            return Ok(());
        }

        if let Some(blob) = self.patches.remove(&name) {
            let size = entry.size();
            let original = util::buffer_entry(entry, size)?;
            let mut delta = open_blob(patch, Category::Patch, &name, &blob)?;
            let bound = original.len().max(delta.size());
            output.start_file(name.as_str(), util::file_options(delta.last_modified(), bound))?;
            let written = apply_gdiff(&mut original.reader(), &mut delta, output)?;
            debug!(path = %name, %blob, written, "patched");
            self.summary.patched += 1;
            return Ok(());
        }

        output.start_file(name.as_str(), util::file_options(entry.last_modified(), entry.size()))?;
        io::copy(entry, output)?;
        self.summary.copied += 1;
        Ok(())
    }

    /// Append the remaining additions in manifest order, then report whatever
    /// the original never offered.
    fn finish<P, W>(
        self,
        patch: &mut ZipArchive<P>,
        output: &mut ZipWriter<W>,
    ) -> Result<ApplySummary>
    where
        P: Read + Seek,
        W: Write + Seek,
    {
        let mut summary = self.summary;
        for (path, blob) in &self.additions {
            copy_blob(patch, output, Category::Addition, path, blob)?;
            debug!(%path, %blob, "added");
            summary.added += 1;
        }

        let unresolved = UnresolvedEntries {
            removals: self.removals.into_iter().collect(),
            replacements: self.replacements.into_keys().collect(),
            patches: self.patches.into_keys().collect(),
        };
        if !unresolved.is_empty() {
            return Err(PatchError::Unresolved(unresolved));
        }

        info!(
            copied = summary.copied,
            removed = summary.removed,
            replaced = summary.replaced,
            patched = summary.patched,
            added = summary.added,
            skipped = summary.skipped,
            "patch applied"
        );
        Ok(summary)
    }
}

/// Read the next four bytes of `source`. `None` means the local entries are
/// over: the stream ended or the central directory starts.
fn next_signature<R: Read>(source: &mut R) -> io::Result<Option<[u8; 4]>> {
    let mut signature = [0u8; 4];
    let mut filled = 0;
    while filled < signature.len() {
        match source.read(&mut signature[filled..]) {
            Ok(0) => return Ok(None),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    if signature == CENTRAL_HEADER_SIGNATURE || signature == END_OF_CENTRAL_SIGNATURE {
        return Ok(None);
    }
    Ok(Some(signature))
}

/// Rebuild the target archive from a single forward pass over the stream
/// `source`.
///
/// Original entries are handled in stream order. Remaining additions are
/// appended afterwards in manifest order. Removals, replacements or patches
/// whose path never showed up are reported together in one
/// [`PatchError::Unresolved`].
///
/// Entries are read from their local headers, so sizes must be stored there.
/// Archives written with data descriptors (general purpose flag bit 3) need
/// [`apply_patch_archive`].
pub fn apply_patch<R, P, W>(
    mut source: R,
    patch: &mut ZipArchive<P>,
    output: &mut ZipWriter<W>,
    options: &ApplyOptions,
) -> Result<ApplySummary>
where
    R: Read,
    P: Read + Seek,
    W: Write + Seek,
{
    let mut patcher = EntryPatcher::new(read_manifest(patch)?, options);

    while let Some(signature) = next_signature(&mut source)? {
        let mut rest = (&signature[..]).chain(&mut source);
        let Some(mut entry) = read_zipfile_from_stream(&mut rest)? else {
            break;
        };
        patcher.entry(&mut entry, patch, output)?;
    }

    patcher.finish(patch, output)
}

/// Same as [`apply_patch`], walking `source` entry by entry in central
/// directory order. Sizes come from the central directory, so entries written
/// with data descriptors are handled too.
pub fn apply_patch_archive<R, P, W>(
    source: &mut ZipArchive<R>,
    patch: &mut ZipArchive<P>,
    output: &mut ZipWriter<W>,
    options: &ApplyOptions,
) -> Result<ApplySummary>
where
    R: Read + Seek,
    P: Read + Seek,
    W: Write + Seek,
{
    let mut patcher = EntryPatcher::new(read_manifest(patch)?, options);

    for index in 0..source.len() {
        let mut entry = source.by_index(index)?;
        patcher.entry(&mut entry, patch, output)?;
    }

    patcher.finish(patch, output)
}

fn verify_source<R: Read + Seek>(patch: &mut ZipArchive<R>, source: &Path) -> Result<()> {
    let Some(expected) = util::read_optional(patch, CHECKSUM_ENTRY)? else {
        return Ok(());
    };
    let actual = util::hash_file(source)?;
    if expected[..] != actual[..] {
        return Err(PatchError::ChecksumMismatch {
            expected: util::to_hex(&expected),
            actual: util::to_hex(&actual),
        });
    }
    Ok(())
}

fn apply_primary<R: Read + Seek>(
    source: &Path,
    patch: &mut ZipArchive<R>,
    output: &Path,
    options: &ApplyOptions,
) -> Result<ApplySummary> {
    // Fail on the manifest before touching the output.
    read_manifest(patch)?;
    let source_map = util::mmap_file(source)?;
    let mut original = ZipArchive::new(Cursor::new(&source_map[..]))?;
    let mut writer = ZipWriter::new(BufWriter::new(File::create(output)?));
    let summary = apply_patch_archive(&mut original, patch, &mut writer, options)?;
    writer.finish()?.flush()?;
    Ok(summary)
}

fn apply_legacy<R: Read + Seek>(
    source: &Path,
    patch: &mut ZipArchive<R>,
    output: &Path,
) -> Result<ApplySummary> {
    let source_map = util::mmap_file(source)?;
    let mut original = ZipArchive::new(Cursor::new(&source_map[..]))?;
    let mut writer = ZipWriter::new(BufWriter::new(File::create(output)?));
    let summary = legacy::apply_legacy_patch(&mut original, patch, &mut writer)?;
    writer.finish()?.flush()?;
    Ok(summary)
}

/// Apply the patch archive at `patch` to the archive at `source`, writing the
/// result to `output`. The source is walked through its central directory, see
/// [`apply_patch_archive`].
///
/// Patches without `patch.info` but with a legacy entry list are applied with
/// the legacy strategy.
pub fn apply_patch_file(
    source: &Path,
    patch: &Path,
    output: &Path,
    options: &ApplyOptions,
) -> Result<ApplySummary> {
    let patch_map = util::mmap_file(patch)?;
    let mut archive = ZipArchive::new(Cursor::new(&patch_map[..]))?;

    if options.verify_checksum {
        verify_source(&mut archive, source)?;
    }

    match apply_primary(source, &mut archive, output, options) {
        Err(PatchError::FormatNotRecognized { entry }) if legacy::is_legacy(&archive) => {
            warn!(missing = entry, "falling back to the legacy patch format");
            apply_legacy(source, &mut archive, output)
        }
        result => result,
    }
}
