//! Error types for release material handling.

/// Errors from loading, producing, or signing release material.
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    /// Failed to serialize or deserialize release material.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Signing operation failed.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Cryptographic key operation failed (load, generate, or parse).
    #[error("key error: {0}")]
    KeyError(String),

    /// The trust bundle is structurally invalid.
    #[error("invalid trust bundle: {0}")]
    InvalidTrustBundle(String),

    /// The checksum manifest could not be built.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// I/O error while reading or writing release material.
    #[error("attestation I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Reasons a checksum manifest fails to parse.
///
/// Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    /// No entries (blank lines and comments do not count).
    #[error("manifest is empty")]
    Empty,

    /// The manifest bytes are not UTF-8.
    #[error("manifest is not valid UTF-8")]
    NotUtf8,

    /// The line is not `<digest>  <filename>`.
    #[error("line {line}: expected `<sha256>  <filename>`")]
    MalformedLine {
        /// Offending line.
        line: usize,
    },

    /// The digest field has the wrong number of characters.
    #[error("line {line}: digest must be {expected} hex characters, got {actual}")]
    InvalidDigestLength {
        /// Offending line.
        line: usize,
        /// Required length.
        expected: usize,
        /// Length found.
        actual: usize,
    },

    /// The digest field contains non-hex characters.
    #[error("line {line}: digest is not valid hex")]
    InvalidDigestHex {
        /// Offending line.
        line: usize,
    },

    /// The same filename appears twice.
    #[error("line {line}: duplicate entry for `{filename}` (first listed on line {first_line})")]
    DuplicateEntry {
        /// The repeated filename.
        filename: String,
        /// Line of the repeat.
        line: usize,
        /// Line of the first occurrence.
        first_line: usize,
    },
}

/// Reasons a provenance document cannot yield a statement.
#[derive(Debug, thiserror::Error)]
pub enum StatementError {
    /// The document bytes are not UTF-8.
    #[error("provenance document is not valid UTF-8")]
    NotUtf8,

    /// A record is not valid JSON.
    #[error("line {line}: invalid JSON: {source}")]
    InvalidJson {
        /// 1-based line of the record (1 for single-document files).
        line: usize,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// A DSSE envelope could not be unwrapped.
    #[error("invalid DSSE envelope: {0}")]
    InvalidEnvelope(String),

    /// A native statement has missing or mistyped fields.
    #[error("invalid provenance statement: {0}")]
    InvalidStatement(serde_json::Error),

    /// An in-toto statement lacks a field the verifier needs.
    #[error("provenance statement is missing {0}")]
    MissingField(&'static str),

    /// A timestamp is not RFC 3339.
    #[error("invalid build timestamp `{0}`")]
    InvalidTimestamp(String),

    /// No record in the document covers the artifact.
    #[error("no provenance statement covers `{0}`")]
    NoStatementForArtifact(String),
}
