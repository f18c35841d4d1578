//! Error types for the verification subsystem.
//!
//! Two kinds of failure are kept apart. A [`Rejection`] is a verdict: the
//! release is not safe to install, for a specific reason. A
//! [`VerificationError`] means the verifier itself could not run (unreadable
//! policy, I/O failure while hashing) and no verdict was reached.

use chrono::{DateTime, Utc};
use redoubt_attest::ManifestError;

/// Errors from the verification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// The release was rejected.
    #[error("{0}")]
    Rejected(#[from] Rejection),

    /// The provenance policy is invalid.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// I/O error during verification.
    #[error("verification I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A document is not any kind of release material.
    #[error("unrecognized document: {0}")]
    UnrecognizedDocument(String),

    /// Release material could not be loaded.
    #[error(transparent)]
    Attest(#[from] redoubt_attest::AttestError),
}

impl VerificationError {
    /// The rejection, if this error is a verdict.
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

/// A specific reason a release is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// No signature entry verifies over the manifest bytes.
    #[error("signature invalid: {reason}")]
    SignatureInvalid {
        /// What went wrong.
        reason: String,
    },

    /// The signing key is not in the trust bundle.
    #[error("untrusted signer `{key_id}`")]
    UntrustedSigner {
        /// Key id named by the signature.
        key_id: String,
    },

    /// The signing key is outside its validity window.
    #[error("signing key `{key_id}` is not valid now: {detail}")]
    Expired {
        /// Key id.
        key_id: String,
        /// Which bound was crossed.
        detail: String,
    },

    /// The signed manifest does not parse.
    #[error("manifest malformed: {0}")]
    ManifestMalformed(ManifestError),

    /// The manifest has no entry for the artifact.
    #[error("manifest has no entry for `{filename}`")]
    ManifestMissingEntry {
        /// Name that was looked up.
        filename: String,
    },

    /// Content does not hash to the signed digest.
    #[error("digest mismatch for `{artifact}`: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The file whose digest was checked.
        artifact: String,
        /// Digest from the signed manifest.
        expected: String,
        /// Digest of the bytes received.
        actual: String,
    },

    /// The provenance document does not yield a statement.
    #[error("provenance malformed: {0}")]
    ProvenanceMalformed(String),

    /// Nothing vouches for the provenance document.
    #[error("provenance `{document}` is not authenticated: {reason}")]
    ProvenanceUnauthenticated {
        /// File name of the document.
        document: String,
        /// Why neither the manifest nor an envelope signature covers it.
        reason: String,
    },

    /// The statement describes different bytes.
    #[error("provenance subject {actual} does not match artifact digest {expected}")]
    ProvenanceSubjectMismatch {
        /// The artifact's computed digest.
        expected: String,
        /// The statement's `subjectDigest`.
        actual: String,
    },

    /// The builder is not on the allow-list.
    #[error("builder `{builder_id}` is not allowed")]
    BuilderNotAllowed {
        /// Builder named by the statement.
        builder_id: String,
    },

    /// The build is older than the policy allows.
    #[error("provenance is stale: built at {built_at}, maximum age {max_age_secs}s")]
    ProvenanceStale {
        /// Statement build timestamp.
        built_at: DateTime<Utc>,
        /// Policy maximum age.
        max_age_secs: u64,
    },

    /// The build timestamp is too far in the future.
    #[error("provenance is from the future: built at {built_at}, allowed skew {max_skew_secs}s")]
    ProvenanceFromFuture {
        /// Statement build timestamp.
        built_at: DateTime<Utc>,
        /// Policy clock skew allowance.
        max_skew_secs: u64,
    },

    /// An optional policy rule failed.
    #[error("provenance policy `{rule}` violated: {detail}")]
    ProvenancePolicyViolation {
        /// Rule name.
        rule: String,
        /// Why it failed.
        detail: String,
    },
}

/// Coarse grouping of failures, used for exit codes and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionCategory {
    /// Signature or trust failure.
    Signature,
    /// Manifest parse or lookup failure.
    Manifest,
    /// Content digest mismatch.
    Digest,
    /// Provenance failure.
    Provenance,
    /// Transport failure.
    Network,
    /// Deadline expired.
    Timeout,
}

impl RejectionCategory {
    /// Process exit code for this category.
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Signature => 10,
            Self::Manifest => 11,
            Self::Digest => 12,
            Self::Provenance => 13,
            Self::Network => 14,
            Self::Timeout => 15,
        }
    }

    /// Whether retrying the same request could succeed.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }

    /// Short lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Manifest => "manifest",
            Self::Digest => "digest",
            Self::Provenance => "provenance",
            Self::Network => "network",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Rejection {
    /// The category this reason belongs to.
    pub const fn category(&self) -> RejectionCategory {
        match self {
            Self::SignatureInvalid { .. } | Self::UntrustedSigner { .. } | Self::Expired { .. } => {
                RejectionCategory::Signature
            }
            Self::ManifestMalformed(_) | Self::ManifestMissingEntry { .. } => {
                RejectionCategory::Manifest
            }
            Self::DigestMismatch { .. } => RejectionCategory::Digest,
            Self::ProvenanceMalformed(_)
            | Self::ProvenanceUnauthenticated { .. }
            | Self::ProvenanceSubjectMismatch { .. }
            | Self::BuilderNotAllowed { .. }
            | Self::ProvenanceStale { .. }
            | Self::ProvenanceFromFuture { .. }
            | Self::ProvenancePolicyViolation { .. } => RejectionCategory::Provenance,
        }
    }

    /// Stable machine-readable name of the reason.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SignatureInvalid { .. } => "SignatureInvalid",
            Self::UntrustedSigner { .. } => "UntrustedSigner",
            Self::Expired { .. } => "Expired",
            Self::ManifestMalformed(_) => "ManifestMalformed",
            Self::ManifestMissingEntry { .. } => "ManifestMissingEntry",
            Self::DigestMismatch { .. } => "DigestMismatch",
            Self::ProvenanceMalformed(_) => "ProvenanceMalformed",
            Self::ProvenanceUnauthenticated { .. } => "ProvenanceUnauthenticated",
            Self::ProvenanceSubjectMismatch { .. } => "ProvenanceSubjectMismatch",
            Self::BuilderNotAllowed { .. } => "BuilderNotAllowed",
            Self::ProvenanceStale { .. } => "ProvenanceStale",
            Self::ProvenanceFromFuture { .. } => "ProvenanceFromFuture",
            Self::ProvenancePolicyViolation { .. } => "ProvenancePolicyViolation",
        }
    }
}
