//! Release material for the Redoubt release verifier.
//!
//! `redoubt-attest` defines the on-disk and on-wire shapes of a release:
//! content digests, `SHA256SUMS` manifests, detached manifest signatures,
//! trust bundles, provenance statements, and the DSSE envelopes that carry
//! them. It also holds the publisher side, which generates keys and signs
//! manifests and envelopes with local keys.

pub mod digest;
pub mod envelope;
pub mod error;
pub mod manifest;
pub mod signature;
pub mod signer;
pub mod statement;
pub mod trust;

pub use digest::{Digest, digest_bytes, digest_file, digest_reader};
pub use envelope::{Envelope, EnvelopeSignature};
pub use error::{AttestError, ManifestError, StatementError};
pub use manifest::{ChecksumManifest, ManifestEntry};
pub use signature::{DetachedSignature, SignatureAlgorithm, SignatureEntry};
pub use statement::ProvenanceStatement;
pub use trust::{KeyValidity, TrustBundle, TrustedKey};
