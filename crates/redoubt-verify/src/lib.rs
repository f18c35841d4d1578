//! Release verification for Redoubt.
//!
//! `redoubt-verify` decides whether a release is safe to install. The
//! pipeline has four phases, always in this order:
//! 1. **Signature** over the raw `SHA256SUMS` bytes, against a trust bundle
//! 2. **Manifest** parse and lookup of the artifact's entry
//! 3. **Digest** of the artifact content
//! 4. **Provenance** authenticity, subject, builder, and freshness policy
//!
//! Every failure is a specific [`Rejection`]; nothing is accepted partially.

pub mod digest;
pub mod error;
pub mod inspect;
pub mod policy;
pub mod provenance;
pub mod signature;
pub mod verify;

// Re-export primary types for convenience.
pub use error::{Rejection, RejectionCategory, VerificationError};
pub use policy::{PolicyResult, ProvenancePolicy};
pub use provenance::{AttestationReport, ProvenanceOrigin};
pub use signature::VerifiedSigner;
pub use verify::{
    ProvenanceDocument, ReleaseInput, ReleasePaths, SignedManifest, VerificationResult,
    VerifiedRelease, Verifier,
};
