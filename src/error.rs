use std::fmt;
use std::io;

use thiserror::Error;

/// Result type for diff and patch operations.
pub type Result<T> = std::result::Result<T, PatchError>;

/// Manifest category a path was recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Addition,
    Removal,
    Replacement,
    Patch,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Addition => "addition",
            Category::Removal => "removal",
            Category::Replacement => "replacement",
            Category::Patch => "patch",
        };
        f.write_str(name)
    }
}

/// Manifest obligations that were never met while streaming the original archive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnresolvedEntries {
    pub removals: Vec<String>,
    pub replacements: Vec<String>,
    pub patches: Vec<String>,
}

impl UnresolvedEntries {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.replacements.is_empty() && self.patches.is_empty()
    }

    /// Total number of unmatched paths across all categories.
    pub fn len(&self) -> usize {
        self.removals.len() + self.replacements.len() + self.patches.len()
    }
}

impl fmt::Display for UnresolvedEntries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = [
            ("to remove", &self.removals),
            ("to replace", &self.replacements),
            ("to patch", &self.patches),
        ];
        let mut first = true;
        for (label, paths) in groups {
            if paths.is_empty() {
                continue;
            }
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{label}: {}", paths.join(", "))?;
        }
        Ok(())
    }
}

/// Errors that can occur while creating or applying an archive patch.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Underlying read, write or seek failure.
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),

    /// The container could not be read or written.
    #[error("ZIP error: {0}")]
    Zip(
        #[from]
        #[source]
        zip::result::ZipError,
    ),

    /// The patch archive does not carry the expected manifest entry.
    #[error("patch archive has no {entry} entry")]
    FormatNotRecognized { entry: &'static str },

    /// An addition targets a path that already exists in the original archive.
    #[error("{path} already exists in the source archive (for addition)")]
    AdditionConflict { path: String },

    /// The delta stream does not start with the expected header.
    #[error("delta stream has an invalid header")]
    BadMagic,

    /// The delta stream ended in the middle of a record.
    #[error("delta stream truncated")]
    Truncated,

    /// The text delta stream holds a command byte that is not understood.
    #[error("unknown delta command {0:#04x}")]
    UnknownCommand(u8),

    /// A copy record reaches beyond the end of the source.
    #[error("copy of {length} bytes at offset {offset} exceeds the source")]
    CopyOutOfRange { offset: u64, length: u64 },

    /// The manifest references a blob that is absent from the patch archive.
    #[error("{category} blob {blob} for {path} is missing from the patch archive")]
    MissingBlob {
        category: Category,
        path: String,
        blob: String,
    },

    /// An entry the patch relies on is absent from the original archive.
    #[error("{path} is missing from the source archive")]
    MissingSourceEntry { path: String },

    /// Paths named by the manifest that never appeared in the original archive.
    #[error("entries not found in source archive: {0}")]
    Unresolved(UnresolvedEntries),

    /// Matching granularity of zero bytes.
    #[error("block size must be at least 1")]
    InvalidBlockSize,

    /// The source archive is not the one the patch was created from.
    #[error("source checksum mismatch: required {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

impl PatchError {
    /// Map an I/O error raised while reading a delta stream, turning a premature
    /// end of stream into [`PatchError::Truncated`].
    pub(crate) fn from_stream(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            PatchError::Truncated
        } else {
            PatchError::Io(err)
        }
    }
}
