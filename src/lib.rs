//! Incremental patches between two versions of a ZIP archive.
//!
//! [`create_patch`] classifies every entry of the new archive against the old
//! one and writes a patch archive holding raw blobs, GDIFF deltas and a
//! `patch.info` manifest. [`apply_patch`] replays such a patch against a single
//! forward pass over the old archive.

pub mod apply;
pub mod binary_diff;
pub mod binary_patch;
pub mod checksum_index;
pub mod create;
pub mod diff_writer;
pub mod error;
pub mod gdiff;
pub mod gdiff_text;
pub mod legacy;
pub mod patch_format;
pub mod rolling_hash;
pub mod segmented_buffer;
pub mod util;

pub use apply::{
    apply_patch, apply_patch_archive, apply_patch_file, read_hints, read_manifest, ApplyOptions,
    ApplySummary, PatchHints,
};
pub use binary_diff::{compute_diff, diff_bytes, DEFAULT_BLOCK_SIZE};
pub use binary_patch::apply_gdiff;
pub use create::{create_patch, create_patch_file, CreateOptions, DiffOptions, DiffSummary};
pub use diff_writer::{DiffOp, DiffWriter};
pub use error::{Category, PatchError, Result, UnresolvedEntries};
pub use gdiff::GDiffWriter;
pub use gdiff_text::{apply_gdiff_text, GDiffTextWriter};
pub use legacy::{apply_legacy_patch, create_legacy_patch};
pub use patch_format::PatchManifest;
pub use segmented_buffer::SegmentedBuffer;
