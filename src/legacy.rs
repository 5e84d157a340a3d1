//! Older patch layout: `META-INF/file.list` names every target entry in order,
//! changed files are stored under their own name and deltas under `<name>.gdiff`.
//!
//! Applying it needs random access to the original archive.

use std::collections::HashSet;
use std::io::{self, BufRead, BufReader, Read, Seek, Write};

use tracing::{debug, info};
use zip::result::ZipError;
use zip::{ZipArchive, ZipWriter};

use crate::apply::ApplySummary;
use crate::binary_patch::apply_gdiff;
use crate::create::{buffer_file, classify, write_blob, write_delta, Change, DiffOptions, DiffSummary};
use crate::error::{PatchError, Result};
use crate::util;

pub const LEGACY_LIST: &str = "META-INF/file.list";
const DELTA_SUFFIX: &str = ".gdiff";

/// True when `patch` carries the legacy entry list.
pub fn is_legacy<R: Read + Seek>(patch: &ZipArchive<R>) -> bool {
    patch.index_for_name(LEGACY_LIST).is_some()
}

pub fn create_legacy_patch<R1, R2, W>(
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

    let mut summary = DiffSummary::default();
    let target_names: HashSet<&str> = target.file_names().collect();
    summary.removals = source
        .file_names()
        .filter(|name| !target_names.contains(name))
        .count();
    drop(target_names);

    let mut listing = Vec::with_capacity(target.len());
    for index in 0..target.len() {
        let mut entry = target.by_index(index)?;
        let name = entry.name().to_owned();
        let modified = entry.last_modified();
        listing.push(name.clone());

        if entry.is_dir() {
            if source.index_for_name(&name).is_some() {
                summary.unchanged += 1;
            } else {
                output.add_directory(name.as_str(), util::file_options(modified, 0))?;
                summary.additions += 1;
            }
            continue;
        }

        let size = entry.size();
        let target_data = util::buffer_entry(&mut entry, size)?;
        drop(entry);

        match classify(buffer_file(source, &name)?, &target_data, block_size) {
            Change::Unchanged => summary.unchanged += 1,
            Change::Added => {
                write_blob(output, &name, &target_data, modified)?;
                summary.additions += 1;
            }
            Change::Replaced => {
                write_blob(output, &name, &target_data, modified)?;
                summary.replacements += 1;
            }
            Change::Patched(source_data) => {
                let delta = format!("{name}{DELTA_SUFFIX}");
                write_delta(output, &delta, &source_data, &target_data, modified, block_size)?;
                summary.patches += 1;
            }
        }
        debug!(path = %name, "listed");
    }

    output.start_file(LEGACY_LIST, util::file_options(None, 0))?;
    for name in &listing {
        writeln!(output, "{name}")?;
    }

    info!(entries = listing.len(), "legacy diff computed");
    Ok(summary)
}

fn read_listing<R: Read + Seek>(patch: &mut ZipArchive<R>) -> Result<Vec<String>> {
    let entry = match patch.by_name(LEGACY_LIST) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(PatchError::FormatNotRecognized { entry: LEGACY_LIST })
        }
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for line in BufReader::new(entry).lines() {
        let line = line?;
        if !line.is_empty() {
            names.push(line);
        }
    }
    Ok(names)
}

/// Rebuild the target archive from `source` and a legacy `patch`.
pub fn apply_legacy_patch<R, P, W>(
    source: &mut ZipArchive<R>,
    patch: &mut ZipArchive<P>,
    output: &mut ZipWriter<W>,
) -> Result<ApplySummary>
where
    R: Read + Seek,
    P: Read + Seek,
    W: Write + Seek,
{
    let listing = read_listing(patch)?;
    let mut summary = ApplySummary::default();

    for name in &listing {
        let in_source = source.index_for_name(name).is_some();

        if name.ends_with('/') {
            let modified = match source.by_name(name) {
                Ok(entry) => entry.last_modified(),
                Err(_) => patch.by_name(name).ok().and_then(|entry| entry.last_modified()),
            };
            output.add_directory(name.as_str(), util::file_options(modified, 0))?;
            if in_source {
                summary.copied += 1;
            } else {
                summary.added += 1;
            }
            continue;
        }

        let delta_name = format!("{name}{DELTA_SUFFIX}");
        if patch.index_for_name(&delta_name).is_some() {
            let original = buffer_file(source, name)?.ok_or_else(|| {
                PatchError::MissingSourceEntry { path: name.clone() }
            })?;
            let mut delta = patch.by_name(&delta_name)?;
            let bound = original.len().max(delta.size());
            output.start_file(name.as_str(), util::file_options(delta.last_modified(), bound))?;
            apply_gdiff(&mut original.reader(), &mut delta, output)?;
            summary.patched += 1;
        } else if patch.index_for_name(name).is_some() {
            let mut stored = patch.by_name(name)?;
            output.start_file(name.as_str(), util::file_options(stored.last_modified(), stored.size()))?;
            io::copy(&mut stored, output)?;
            if in_source {
                summary.replaced += 1;
            } else {
                summary.added += 1;
            }
        } else if in_source {
            let mut original = source.by_name(name)?;
            output.start_file(name.as_str(), util::file_options(original.last_modified(), original.size()))?;
            io::copy(&mut original, output)?;
            summary.copied += 1;
        } else {
            return Err(PatchError::MissingSourceEntry { path: name.clone() });
        }
        debug!(path = %name, "restored");
    }

    let listed: HashSet<&str> = listing.iter().map(String::as_str).collect();
    summary.removed = source
        .file_names()
        .filter(|name| !listed.contains(name))
        .count();

    info!(entries = listing.len(), "legacy patch applied");
    Ok(summary)
}
