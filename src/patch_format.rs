use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, BufRead, Write};

/// Manifest entry written last into every patch archive.
pub const MANIFEST_ENTRY: &str = "patch.info";
/// Where older writers of the same format keep the manifest.
pub const META_MANIFEST_ENTRY: &str = "META-INF/patch.info";
/// Manifest locations accepted on read, in lookup order.
pub const MANIFEST_ENTRY_NAMES: [&str; 2] = [MANIFEST_ENTRY, META_MANIFEST_ENTRY];

/// Blob pool for addition and replacement payloads.
pub const RAW_PREFIX: &str = "raw/";
/// Blob pool for GDIFF streams.
pub const PATCH_PREFIX: &str = "patch/";
pub const BLOB_SUFFIX: &str = ".bin";

/// Optional auxiliary entries carried next to the blobs.
pub const CHECKSUM_ENTRY: &str = "META-INF/checksum.bin";
pub const INPUT_NAME_ENTRY: &str = "META-INF/input-file";
pub const OUTPUT_NAME_ENTRY: &str = "META-INF/output-file";

const ADD: char = '+';
const REMOVE: char = '-';
const PATCH: char = '~';
const REPLACE: char = '!';

/// Per-path classification of a diff: what to add, remove, replace or patch.
/// A path absent from all four categories is copied from the source unchanged.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatchManifest {
    additions: BTreeMap<String, String>,
    removals: BTreeSet<String>,
    patches: BTreeMap<String, String>,
    replacements: BTreeMap<String, String>,
}

impl PatchManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `path` from every category so that it ends up in at most one.
    fn forget(&mut self, path: &str) {
        self.additions.remove(path);
        self.removals.remove(path);
        self.patches.remove(path);
        self.replacements.remove(path);
    }

    pub fn addition(&mut self, path: impl Into<String>, blob: impl Into<String>) {
        let path = path.into();
        self.forget(&path);
        self.additions.insert(path, blob.into());
    }

    pub fn removal(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.forget(&path);
        self.removals.insert(path);
    }

    pub fn patch(&mut self, path: impl Into<String>, blob: impl Into<String>) {
        let path = path.into();
        self.forget(&path);
        self.patches.insert(path, blob.into());
    }

    pub fn replacement(&mut self, path: impl Into<String>, blob: impl Into<String>) {
        let path = path.into();
        self.forget(&path);
        self.replacements.insert(path, blob.into());
    }

    pub fn additions(&self) -> &BTreeMap<String, String> {
        &self.additions
    }

    pub fn removals(&self) -> &BTreeSet<String> {
        &self.removals
    }

    pub fn patches(&self) -> &BTreeMap<String, String> {
        &self.patches
    }

    pub fn replacements(&self) -> &BTreeMap<String, String> {
        &self.replacements
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty()
            && self.removals.is_empty()
            && self.patches.is_empty()
            && self.replacements.is_empty()
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write!(out, "{self}")
    }

    pub fn to_text(&self) -> String {
        self.to_string()
    }

    /// Read a manifest, skipping blank lines, `#` comments, unknown sigils and
    /// lines with the wrong number of tokens.
    pub fn read_from<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut manifest = Self::new();
        for line in reader.lines() {
            manifest.parse_line(&line?);
        }
        Ok(manifest)
    }

    pub fn parse(text: &str) -> Self {
        let mut manifest = Self::new();
        for line in text.lines() {
            manifest.parse_line(line);
        }
        manifest
    }

    fn parse_line(&mut self, line: &str) {
        let line = line.trim();
        let mut chars = line.chars();
        let Some(sigil) = chars.next() else {
            return;
        };
        let tokens = read_tokens(chars.as_str());
        match (sigil, tokens.as_slice()) {
            (ADD, [path, blob]) => self.addition(path.as_str(), blob.as_str()),
            (REMOVE, [path]) => self.removal(path.as_str()),
            (PATCH, [path, blob]) => self.patch(path.as_str(), blob.as_str()),
            (REPLACE, [path, blob]) => self.replacement(path.as_str(), blob.as_str()),
            _ => {}
        }
    }
}

/// One line per record: additions, removals, patches, then replacements, each
/// sorted by path.
impl fmt::Display for PatchManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (path, blob) in &self.additions {
            write_line(f, ADD, &[path, blob])?;
        }
        for path in &self.removals {
            write_line(f, REMOVE, &[path])?;
        }
        for (path, blob) in &self.patches {
            write_line(f, PATCH, &[path, blob])?;
        }
        for (path, blob) in &self.replacements {
            write_line(f, REPLACE, &[path, blob])?;
        }
        Ok(())
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, sigil: char, tokens: &[&String]) -> fmt::Result {
    let escaped: Vec<String> = tokens.iter().map(|t| escape_token(t)).collect();
    writeln!(f, "{sigil}{}", escaped.join("\t"))
}

fn needs_quoting(token: &str) -> bool {
    token.is_empty()
        || token
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '\\')
}

/// Quote a token if it contains whitespace, a quote or a backslash. Inside
/// quotes, `"` and `\` are backslash-escaped and line breaks become `\n` and
/// `\r` so a record never spans two lines.
pub fn escape_token(token: &str) -> String {
    if !needs_quoting(token) {
        return token.to_owned();
    }
    let mut out = String::with_capacity(token.len() + 2);
    out.push('"');
    for c in token.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Split a line into whitespace-separated tokens, honouring single or double
/// quotes and backslash escapes.
pub fn read_tokens(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                in_token = true;
                // A trailing backslash stands for itself.
                current.push(match chars.next() {
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some(escaped) => escaped,
                    None => '\\',
                });
            }
            '"' | '\'' if quote.is_none() => {
                in_token = true;
                quote = Some(c);
            }
            c if quote == Some(c) => quote = None,
            c if c.is_whitespace() && quote.is_none() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Hands out `prefix + n + suffix` names from a counter starting at 1.
#[derive(Debug)]
pub struct NameAllocator {
    prefix: &'static str,
    suffix: &'static str,
    counter: u64,
}

impl NameAllocator {
    pub fn new(prefix: &'static str, suffix: &'static str) -> Self {
        Self {
            prefix,
            suffix,
            counter: 0,
        }
    }

    pub fn next_name(&mut self) -> String {
        self.counter += 1;
        format!("{}{}{}", self.prefix, self.counter, self.suffix)
    }
}
