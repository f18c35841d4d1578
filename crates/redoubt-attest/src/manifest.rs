//! `SHA256SUMS` checksum manifests.
//!
//! The format is the one `sha256sum` emits: one `<hex-digest>  <filename>`
//! entry per line. The binary-mode form `<hex-digest> *<filename>` is also
//! accepted, as are blank lines and `#` comments.

use std::collections::HashMap;
use std::fmt::Write;

use crate::digest::{DIGEST_HEX_LEN, Digest};
use crate::error::ManifestError;

/// Conventional file name of a release checksum manifest.
pub const MANIFEST_FILE_NAME: &str = "SHA256SUMS";

/// One `(filename, digest)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Filename exactly as listed.
    pub filename: String,
    /// Expected content digest.
    pub digest: Digest,
}

/// A parsed checksum manifest. Filenames are unique.
#[derive(Debug, Clone)]
pub struct ChecksumManifest {
    entries: Vec<ManifestEntry>,
    index: HashMap<String, usize>,
}

impl ChecksumManifest {
    /// Parse manifest bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ManifestError::NotUtf8)?;

        let mut entries = Vec::new();
        let mut index = HashMap::new();
        let mut first_seen: HashMap<String, usize> = HashMap::new();

        for (i, raw) in text.split('\n').enumerate() {
            let line_no = i + 1;
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            let entry = parse_line(line, line_no)?;
            if let Some(&first_line) = first_seen.get(&entry.filename) {
                return Err(ManifestError::DuplicateEntry {
                    filename: entry.filename,
                    line: line_no,
                    first_line,
                });
            }
            first_seen.insert(entry.filename.clone(), line_no);
            index.insert(entry.filename.clone(), entries.len());
            entries.push(entry);
        }

        if entries.is_empty() {
            return Err(ManifestError::Empty);
        }
        Ok(Self { entries, index })
    }

    /// Build a manifest from entries, rejecting duplicate filenames.
    ///
    /// Duplicate errors report the 1-based position in `entries` as the line.
    pub fn from_entries(
        entries: impl IntoIterator<Item = ManifestEntry>,
    ) -> Result<Self, ManifestError> {
        let mut out = Vec::new();
        let mut index = HashMap::new();
        for entry in entries {
            if let Some(&pos) = index.get(&entry.filename) {
                return Err(ManifestError::DuplicateEntry {
                    filename: entry.filename,
                    line: out.len() + 1,
                    first_line: pos + 1,
                });
            }
            index.insert(entry.filename.clone(), out.len());
            out.push(entry);
        }
        if out.is_empty() {
            return Err(ManifestError::Empty);
        }
        Ok(Self {
            entries: out,
            index,
        })
    }

    /// Expected digest for `filename`, by exact match.
    pub fn lookup(&self, filename: &str) -> Option<&Digest> {
        self.index.get(filename).map(|&i| &self.entries[i].digest)
    }

    /// Entries in manifest order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false` for a parsed manifest; present for API completeness.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render in canonical two-space form, newline-terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(out, "{}  {}", entry.digest, entry.filename);
        }
        out
    }
}

fn parse_line(line: &str, line_no: usize) -> Result<ManifestEntry, ManifestError> {
    let malformed = ManifestError::MalformedLine { line: line_no };

    let (hex, rest) = line.split_once(' ').ok_or(malformed.clone())?;
    // `  name` is text mode, ` *name` is binary mode.
    let filename = rest
        .strip_prefix(' ')
        .or_else(|| rest.strip_prefix('*'))
        .ok_or(malformed.clone())?;
    if filename.is_empty() {
        return Err(malformed);
    }

    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ManifestError::InvalidDigestHex { line: line_no });
    }
    if hex.len() != DIGEST_HEX_LEN {
        return Err(ManifestError::InvalidDigestLength {
            line: line_no,
            expected: DIGEST_HEX_LEN,
            actual: hex.len(),
        });
    }
    let digest =
        Digest::from_hex(hex).ok_or(ManifestError::InvalidDigestHex { line: line_no })?;

    Ok(ManifestEntry {
        filename: filename.to_owned(),
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest_bytes;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn empty_content_entry_matches_empty_artifact() {
        let line = format!("{EMPTY_SHA256}  hello.bin\n");
        let manifest = ChecksumManifest::parse(line.as_bytes()).expect("parse");
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.lookup("hello.bin"), Some(&digest_bytes(b"")));
    }

    #[test]
    fn parses_multiple_entries_in_order() {
        let a = digest_bytes(b"a");
        let b = digest_bytes(b"b");
        let text = format!("{a}  a.tar.gz\n{b}  b.pyz\n");
        let manifest = ChecksumManifest::parse(text.as_bytes()).expect("parse");
        let names: Vec<_> = manifest.entries().iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, ["a.tar.gz", "b.pyz"]);
        assert_eq!(manifest.lookup("b.pyz"), Some(&b));
        assert_eq!(manifest.lookup("c"), None);
    }

    #[test]
    fn duplicate_filenames_rejected_even_with_different_digests() {
        let text = format!(
            "{}  tool\n{}  tool\n",
            digest_bytes(b"one"),
            digest_bytes(b"two")
        );
        let err = ChecksumManifest::parse(text.as_bytes()).unwrap_err();
        assert_eq!(
            err,
            ManifestError::DuplicateEntry {
                filename: "tool".to_owned(),
                line: 2,
                first_line: 1,
            }
        );
    }

    #[test]
    fn empty_input_rejected() {
        assert_eq!(ChecksumManifest::parse(b"").unwrap_err(), ManifestError::Empty);
        assert_eq!(
            ChecksumManifest::parse(b"\n# only a comment\n\n").unwrap_err(),
            ManifestError::Empty
        );
    }

    #[test]
    fn short_digest_rejected() {
        let err = ChecksumManifest::parse(b"abcd  file\n").unwrap_err();
        assert_eq!(
            err,
            ManifestError::InvalidDigestLength {
                line: 1,
                expected: 64,
                actual: 4,
            }
        );
    }

    #[test]
    fn non_hex_digest_rejected() {
        let bad = "z".repeat(64);
        let err = ChecksumManifest::parse(format!("{bad}  file\n").as_bytes()).unwrap_err();
        assert_eq!(err, ManifestError::InvalidDigestHex { line: 1 });
    }

    #[test]
    fn single_space_separator_rejected() {
        let err = ChecksumManifest::parse(format!("{EMPTY_SHA256} file\n").as_bytes()).unwrap_err();
        assert_eq!(err, ManifestError::MalformedLine { line: 1 });
    }

    #[test]
    fn missing_filename_rejected() {
        let err = ChecksumManifest::parse(format!("{EMPTY_SHA256}  \n").as_bytes()).unwrap_err();
        assert_eq!(err, ManifestError::MalformedLine { line: 1 });
    }

    #[test]
    fn bare_digest_line_rejected() {
        let err = ChecksumManifest::parse(format!("{EMPTY_SHA256}\n").as_bytes()).unwrap_err();
        assert_eq!(err, ManifestError::MalformedLine { line: 1 });
    }

    #[test]
    fn binary_mode_marker_and_comments_accepted() {
        let text = format!("# release v0.1.0\n\n{EMPTY_SHA256} *hello.bin\r\n");
        let manifest = ChecksumManifest::parse(text.as_bytes()).expect("parse");
        assert!(manifest.lookup("hello.bin").is_some());
    }

    #[test]
    fn filenames_with_spaces_are_kept_whole() {
        let text = format!("{EMPTY_SHA256}  my tool.bin\n");
        let manifest = ChecksumManifest::parse(text.as_bytes()).expect("parse");
        assert!(manifest.lookup("my tool.bin").is_some());
    }

    #[test]
    fn non_utf8_rejected() {
        assert_eq!(
            ChecksumManifest::parse(&[0xff, 0xfe, b'\n']).unwrap_err(),
            ManifestError::NotUtf8
        );
    }

    #[test]
    fn error_reports_offending_line() {
        let text = format!("{EMPTY_SHA256}  ok\nnot a line\n");
        let err = ChecksumManifest::parse(text.as_bytes()).unwrap_err();
        assert_eq!(err, ManifestError::MalformedLine { line: 2 });
    }

    #[test]
    fn render_is_canonical_and_reparses() {
        let manifest = ChecksumManifest::from_entries([
            ManifestEntry {
                filename: "demo.pyz".to_owned(),
                digest: digest_bytes(b"demo"),
            },
            ManifestEntry {
                filename: "demo.pyz.provenance.json".to_owned(),
                digest: digest_bytes(b"{}"),
            },
        ])
        .expect("build");

        let rendered = manifest.render();
        assert!(rendered.ends_with('\n'));
        assert!(rendered.starts_with(&format!("{}  demo.pyz\n", digest_bytes(b"demo"))));

        let reparsed = ChecksumManifest::parse(rendered.as_bytes()).expect("reparse");
        assert_eq!(reparsed.entries(), manifest.entries());
    }

    #[test]
    fn from_entries_rejects_duplicates() {
        let entry = ManifestEntry {
            filename: "x".to_owned(),
            digest: digest_bytes(b"x"),
        };
        let err = ChecksumManifest::from_entries([entry.clone(), entry]).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateEntry { .. }));
    }
}
