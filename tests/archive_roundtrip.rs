use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use proptest::prelude::*;
use zip::{DateTime, ZipArchive, ZipWriter};

use zipdelta::patch_format::{MANIFEST_ENTRY, META_MANIFEST_ENTRY};
use zipdelta::util::file_options;
use zipdelta::{
    apply_legacy_patch, apply_patch, apply_patch_archive, apply_patch_file, create_legacy_patch,
    create_patch, read_manifest, ApplyOptions, ApplySummary, DiffOptions, DiffSummary, PatchError,
    PatchManifest,
};

/// `None` content marks a directory entry.
type Entry<'a> = (&'a str, Option<&'a [u8]>);

fn file<'a>(name: &'a str, data: &'a [u8]) -> Entry<'a> {
    (name, Some(data))
}

fn dir(name: &str) -> Entry<'_> {
    (name, None)
}

fn build(entries: &[Entry]) -> Vec<u8> {
    build_at(entries, None)
}

fn build_at(entries: &[Entry], modified: Option<DateTime>) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        match content {
            None => writer.add_directory(*name, file_options(modified, 0)).unwrap(),
            Some(data) => {
                writer
                    .start_file(*name, file_options(modified, data.len() as u64))
                    .unwrap();
                writer.write_all(data).unwrap();
            }
        }
    }
    writer.finish().unwrap().into_inner()
}

fn open(bytes: &[u8]) -> ZipArchive<Cursor<&[u8]>> {
    ZipArchive::new(Cursor::new(bytes)).unwrap()
}

/// Name → (is directory, content), independent of entry order.
fn contents(bytes: &[u8]) -> BTreeMap<String, (bool, Vec<u8>)> {
    let mut archive = open(bytes);
    let mut out = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        out.insert(entry.name().to_owned(), (entry.is_dir(), data));
    }
    out
}

fn diff_with(old: &[u8], new: &[u8], block_size: usize) -> (Vec<u8>, DiffSummary) {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let summary = create_patch(
        &mut open(old),
        &mut open(new),
        &mut writer,
        &DiffOptions { block_size },
    )
    .unwrap();
    (writer.finish().unwrap().into_inner(), summary)
}

fn diff(old: &[u8], new: &[u8]) -> (Vec<u8>, DiffSummary) {
    diff_with(old, new, zipdelta::DEFAULT_BLOCK_SIZE)
}

fn apply_with(old: &[u8], patch: &[u8], options: &ApplyOptions) -> zipdelta::Result<(Vec<u8>, ApplySummary)> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let summary = apply_patch(old, &mut open(patch), &mut writer, options)?;
    Ok((writer.finish()?.into_inner(), summary))
}

fn apply(old: &[u8], patch: &[u8]) -> (Vec<u8>, ApplySummary) {
    apply_with(old, patch, &ApplyOptions::default()).unwrap()
}

/// Apply by walking the central directory of `old` instead of streaming it.
fn apply_indexed(old: &[u8], patch: &[u8]) -> zipdelta::Result<(Vec<u8>, ApplySummary)> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let summary = apply_patch_archive(
        &mut open(old),
        &mut open(patch),
        &mut writer,
        &ApplyOptions::default(),
    )?;
    Ok((writer.finish()?.into_inner(), summary))
}

/// Stored entries whose local headers carry zero sizes and set general purpose
/// flag bit 3, with the real CRC and sizes in a trailing data descriptor, the
/// way `jar` and other streaming writers lay them out.
fn build_streamed(files: &[(&str, &[u8])]) -> Vec<u8> {
    let reference: Vec<Entry> = files.iter().map(|(name, data)| file(name, data)).collect();
    let reference = build(&reference);
    let mut reference = open(&reference);

    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, data) in files {
        let crc = reference.by_name(name).unwrap().crc32();
        let size = data.len() as u32;
        let offset = out.len() as u32;

        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0x0008u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // stored
        out.extend_from_slice(&0u16.to_le_bytes()); // time
        out.extend_from_slice(&0x0021u16.to_le_bytes()); // 1980-01-01
        out.extend_from_slice(&[0u8; 12]);
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(b"PK\x07\x08");
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());

        central.extend_from_slice(b"PK\x01\x02");
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&0x0008u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0x0021u16.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&size.to_le_bytes());
        central.extend_from_slice(&size.to_le_bytes());
        central.extend_from_slice(&(name.len() as u16).to_le_bytes());
        central.extend_from_slice(&[0u8; 12]);
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }

    let central_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(b"PK\x05\x06");
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&central_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

fn manifest(patch: &[u8]) -> PatchManifest {
    read_manifest(&mut open(patch)).unwrap()
}

fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}

#[test]
fn concrete_scenario() {
    let a_old = pseudo_random(1000, 1);
    let mut a_new = a_old[..500].to_vec();
    a_new.extend(pseudo_random(490, 2));

    let old = build(&[
        file("a.txt", &a_old),
        file("b.txt", b"0123456789"),
        dir("dir/"),
    ]);
    let new = build(&[
        file("a.txt", &a_new),
        file("b.txt", b"0123456789"),
        file("c.txt", b"hello"),
    ]);

    let (patch, summary) = diff(&old, &new);
    assert_eq!(
        summary,
        DiffSummary {
            additions: 1,
            removals: 1,
            replacements: 0,
            patches: 1,
            unchanged: 1,
        }
    );

    let m = manifest(&patch);
    assert_eq!(m.removals().iter().collect::<Vec<_>>(), vec!["dir/"]);
    assert_eq!(m.patches().get("a.txt").map(String::as_str), Some("patch/1.bin"));
    assert_eq!(m.additions().get("c.txt").map(String::as_str), Some("raw/1.bin"));
    assert!(m.replacements().is_empty());

    // The delta reuses the unchanged prefix instead of storing the whole file.
    let mut patch_archive = open(&patch);
    let delta_size = patch_archive.by_name("patch/1.bin").unwrap().size();
    assert!(delta_size < a_new.len() as u64 - 400, "delta is {delta_size} bytes");

    // The manifest is the last entry.
    let last = patch_archive.len() - 1;
    assert_eq!(patch_archive.by_index(last).unwrap().name(), MANIFEST_ENTRY);

    let (rebuilt, applied) = apply(&old, &patch);
    assert_eq!(contents(&rebuilt), contents(&new));
    assert_eq!(applied.patched, 1);
    assert_eq!(applied.removed, 1);
    assert_eq!(applied.added, 1);
    assert_eq!(applied.copied, 1);
}

#[test]
fn identical_archives_give_empty_manifest() {
    let archive = build(&[
        dir("META-INF/"),
        file("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
        file("lib/core.bin", &pseudo_random(5000, 7)),
    ]);
    let (patch, summary) = diff(&archive, &archive);
    assert!(manifest(&patch).is_empty());
    assert_eq!(summary.unchanged, 3);

    let (rebuilt, _) = apply(&archive, &patch);
    assert_eq!(contents(&rebuilt), contents(&archive));
}

#[test]
fn small_entries_are_replaced_not_patched() {
    let source = b"0123456789abcdef0123456789abcdef";
    let target = b"0123456789abcdef0123456789abcdeF";
    let old = build(&[file("small.txt", source)]);
    let new = build(&[file("small.txt", target)]);

    let (patch, summary) = diff_with(&old, &new, 32);
    assert_eq!(summary.replacements, 1);
    assert_eq!(summary.patches, 0);
    let m = manifest(&patch);
    assert_eq!(m.replacements().get("small.txt").map(String::as_str), Some("raw/1.bin"));

    let (rebuilt, _) = apply(&old, &patch);
    assert_eq!(contents(&rebuilt), contents(&new));
}

#[test]
fn new_directories_share_one_placeholder() {
    let old = build(&[file("keep.txt", b"keep")]);
    let new = build(&[
        file("keep.txt", b"keep"),
        dir("assets/"),
        dir("assets/icons/"),
    ]);
    let (patch, _) = diff(&old, &new);
    let m = manifest(&patch);
    assert_eq!(m.additions().get("assets/").map(String::as_str), Some("raw/1.bin"));
    assert_eq!(m.additions().get("assets/icons/").map(String::as_str), Some("raw/1.bin"));
    assert_eq!(open(&patch).by_name("raw/1.bin").unwrap().size(), 0);

    let (rebuilt, _) = apply(&old, &patch);
    let rebuilt = contents(&rebuilt);
    assert_eq!(rebuilt, contents(&new));
    assert!(rebuilt["assets/icons/"].0);
}

#[test]
fn added_directories_keep_target_timestamp() {
    let stamp = DateTime::from_date_and_time(2021, 6, 15, 12, 30, 0).unwrap();
    let old = build(&[file("keep.txt", b"keep")]);
    let new = build_at(
        &[file("keep.txt", b"keep"), dir("assets/"), dir("assets/icons/")],
        Some(stamp),
    );

    let (patch, _) = diff(&old, &new);
    let (rebuilt, _) = apply(&old, &patch);
    let mut archive = open(&rebuilt);
    for name in ["assets/", "assets/icons/"] {
        assert_eq!(archive.by_name(name).unwrap().last_modified(), Some(stamp));
    }
}

#[test]
fn changed_entries_keep_target_timestamp() {
    let stamp = DateTime::from_date_and_time(2021, 6, 15, 12, 30, 0).unwrap();
    let body = pseudo_random(4000, 3);
    let mut changed = body.clone();
    changed[2000] ^= 0x55;

    let old = build(&[file("data.bin", &body), file("note.txt", b"x")]);
    let new = build_at(&[file("data.bin", &changed), file("note.txt", b"y")], Some(stamp));

    let (patch, summary) = diff(&old, &new);
    assert_eq!(summary.patches, 1);
    assert_eq!(summary.replacements, 1);

    let (rebuilt, _) = apply(&old, &patch);
    let mut archive = open(&rebuilt);
    for name in ["data.bin", "note.txt"] {
        assert_eq!(archive.by_name(name).unwrap().last_modified(), Some(stamp));
    }
    assert_eq!(contents(&rebuilt), contents(&new));
}

fn handmade_patch(manifest: &str, blobs: &[(&str, &[u8])]) -> Vec<u8> {
    let mut entries: Vec<Entry> = blobs.iter().map(|(name, data)| (*name, Some(*data))).collect();
    entries.push((MANIFEST_ENTRY, Some(manifest.as_bytes())));
    build(&entries)
}

#[test]
fn unresolved_entries_are_reported_together() {
    let old = build(&[file("present.txt", b"still here")]);
    let patch = handmade_patch(
        "-gone.txt\n~x.bin\tpatch/1.bin\n~y.bin\tpatch/2.bin\n",
        &[],
    );
    let err = apply_with(&old, &patch, &ApplyOptions::default()).unwrap_err();
    match err {
        PatchError::Unresolved(unresolved) => {
            assert_eq!(unresolved.len(), 3);
            assert_eq!(unresolved.removals, vec!["gone.txt"]);
            assert_eq!(unresolved.patches, vec!["x.bin", "y.bin"]);
            assert!(unresolved.replacements.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn addition_conflict_is_strict_by_default() {
    let old = build(&[file("c.txt", b"old content"), file("d.txt", b"kept")]);
    let patch = handmade_patch("+c.txt\traw/1.bin\n", &[("raw/1.bin", b"new content")]);

    let err = apply_with(&old, &patch, &ApplyOptions::default()).unwrap_err();
    assert!(matches!(err, PatchError::AdditionConflict { path } if path == "c.txt"));

    let lenient = ApplyOptions {
        ignore_mismatch: true,
        ..ApplyOptions::default()
    };
    let (rebuilt, summary) = apply_with(&old, &patch, &lenient).unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.added, 1);
    let rebuilt = contents(&rebuilt);
    assert_eq!(rebuilt["c.txt"].1, b"new content");
    assert_eq!(rebuilt["d.txt"].1, b"kept");
}

#[test]
fn corrupt_delta_fails() {
    let old = build(&[file("a.bin", &pseudo_random(100, 9))]);
    let patch = handmade_patch("~a.bin\tpatch/1.bin\n", &[("patch/1.bin", b"not a delta")]);
    let err = apply_with(&old, &patch, &ApplyOptions::default()).unwrap_err();
    assert!(matches!(err, PatchError::BadMagic));
}

#[test]
fn empty_original_gets_everything_added() {
    let old = build(&[]);
    assert_eq!(old.len(), 22);
    let new = build(&[file("new.txt", b"fresh"), dir("lib/")]);
    let (patch, _) = diff(&old, &new);

    let (rebuilt, summary) = apply(&old, &patch);
    assert_eq!(contents(&rebuilt), contents(&new));
    assert_eq!(summary.added, 2);
    assert_eq!(summary.copied, 0);

    let (rebuilt, _) = apply_indexed(&old, &patch).unwrap();
    assert_eq!(contents(&rebuilt), contents(&new));
}

#[test]
fn stream_stops_at_central_directory() {
    let old = build(&[file("a.txt", b"a")]);
    let patch = handmade_patch("", &[]);
    let (rebuilt, summary) = apply(&old, &patch);
    assert_eq!(summary.copied, 1);
    assert_eq!(contents(&rebuilt), contents(&old));

    // No bytes at all is an original without entries.
    let (rebuilt, summary) = apply(&[], &patch);
    assert_eq!(summary, ApplySummary::default());
    assert!(contents(&rebuilt).is_empty());
}

#[test]
fn data_descriptor_entries_are_patched() {
    let body = pseudo_random(3000, 21);
    let mut edited = body.clone();
    edited[1500] ^= 0xff;

    let old = build_streamed(&[("a.txt", b"same"), ("b.txt", b"before"), ("lib/core.bin", &body)]);
    assert_eq!(contents(&old)["b.txt"].1, b"before");
    let new = build(&[
        file("a.txt", b"same"),
        file("b.txt", b"after"),
        file("lib/core.bin", &edited),
    ]);
    let (patch, summary) = diff(&old, &new);
    assert_eq!(summary.patches, 1);
    assert_eq!(summary.replacements, 1);

    // Local headers carry no sizes, so the stream path cannot read them.
    assert!(apply_with(&old, &patch, &ApplyOptions::default()).is_err());

    let (rebuilt, applied) = apply_indexed(&old, &patch).unwrap();
    assert_eq!(contents(&rebuilt), contents(&new));
    assert_eq!(applied.copied, 1);
    assert_eq!(applied.patched, 1);
    assert_eq!(applied.replaced, 1);

    let temp = tempfile::tempdir().unwrap();
    let (old_path, patch_path, out_path) = (
        temp.path().join("old.jar"),
        temp.path().join("update.zip"),
        temp.path().join("new.jar"),
    );
    std::fs::write(&old_path, &old).unwrap();
    std::fs::write(&patch_path, &patch).unwrap();
    apply_patch_file(&old_path, &patch_path, &out_path, &ApplyOptions::default()).unwrap();
    assert_eq!(contents(&std::fs::read(&out_path).unwrap()), contents(&new));
}

#[test]
fn manifest_under_meta_inf_is_read() {
    let old = build(&[file("a.txt", b"old"), file("gone.txt", b"x")]);
    let blobs = [("raw/1.bin", &b"new"[..])];
    let mut entries: Vec<Entry> = blobs.iter().map(|(name, data)| file(name, data)).collect();
    entries.push(file(META_MANIFEST_ENTRY, b"!a.txt\traw/1.bin\n-gone.txt\n"));
    let patch = build(&entries);

    assert_eq!(manifest(&patch).replacements().len(), 1);
    let (rebuilt, summary) = apply(&old, &patch);
    assert_eq!(summary.replaced, 1);
    assert_eq!(summary.removed, 1);
    let rebuilt = contents(&rebuilt);
    assert_eq!(rebuilt["a.txt"].1, b"new");
    assert!(!rebuilt.contains_key("gone.txt"));
}

#[test]
fn patch_without_manifest_is_not_recognized() {
    let old = build(&[file("a.txt", b"a")]);
    let patch = build(&[file("raw/1.bin", b"a")]);
    let err = apply_with(&old, &patch, &ApplyOptions::default()).unwrap_err();
    assert!(matches!(err, PatchError::FormatNotRecognized { .. }));
}

#[test]
fn legacy_roundtrip() {
    let base = pseudo_random(3000, 11);
    let mut edited = base.clone();
    edited.splice(1000..1000, b"inserted text".iter().copied());

    let old = build(&[
        dir("app/"),
        file("app/main.bin", &base),
        file("app/version.txt", b"1.0"),
        file("app/old.txt", b"obsolete"),
        file("app/same.txt", b"unchanged content"),
    ]);
    let new = build(&[
        dir("app/"),
        file("app/main.bin", &edited),
        file("app/version.txt", b"1.1"),
        file("app/same.txt", b"unchanged content"),
        dir("app/plugins/"),
        file("app/plugins/extra.txt", b"new plugin"),
    ]);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let summary = create_legacy_patch(
        &mut open(&old),
        &mut open(&new),
        &mut writer,
        &DiffOptions::default(),
    )
    .unwrap();
    let patch = writer.finish().unwrap().into_inner();
    assert_eq!(summary.patches, 1);
    assert_eq!(summary.removals, 1);
    assert!(open(&patch).by_name("app/main.bin.gdiff").is_ok());

    // The primary strategy does not recognize it.
    let err = apply_with(&old, &patch, &ApplyOptions::default()).unwrap_err();
    assert!(matches!(err, PatchError::FormatNotRecognized { .. }));

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let applied = apply_legacy_patch(&mut open(&old), &mut open(&patch), &mut writer).unwrap();
    let rebuilt = writer.finish().unwrap().into_inner();
    assert_eq!(contents(&rebuilt), contents(&new));
    assert_eq!(applied.patched, 1);
    assert_eq!(applied.removed, 1);
}

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-d]{1,2}(/[a-d]{1,2})?\\.bin"
}

fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..40),
        proptest::collection::vec(0u8..3, 0..400),
    ]
}

fn mutate(data: &[u8], at: usize, insert: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let at = at.min(out.len());
    out.splice(at..at, insert.iter().copied());
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn patch_of_diff_rebuilds_target(
        old_files in proptest::collection::btree_map(name_strategy(), content_strategy(), 0..6),
        new_files in proptest::collection::btree_map(name_strategy(), content_strategy(), 0..6),
        edits in proptest::collection::vec((any::<bool>(), 0usize..400, proptest::collection::vec(any::<u8>(), 0..8)), 6),
        block_size in 1usize..40,
    ) {
        // Derive some target entries from source entries so patches show up.
        let mut target: BTreeMap<String, Vec<u8>> = new_files;
        for ((name, data), (keep, at, insert)) in old_files.iter().zip(&edits) {
            if *keep {
                target.insert(name.clone(), mutate(data, *at, insert));
            }
        }

        let old_entries: Vec<Entry> = old_files.iter().map(|(n, d)| (n.as_str(), Some(d.as_slice()))).collect();
        let new_entries: Vec<Entry> = target.iter().map(|(n, d)| (n.as_str(), Some(d.as_slice()))).collect();
        let old = build(&old_entries);
        let new = build(&new_entries);

        let (patch, _) = diff_with(&old, &new, block_size);
        let (rebuilt, _) = apply(&old, &patch);
        prop_assert_eq!(contents(&rebuilt), contents(&new));
        let (rebuilt, _) = apply_indexed(&old, &patch).unwrap();
        prop_assert_eq!(contents(&rebuilt), contents(&new));
    }
}
