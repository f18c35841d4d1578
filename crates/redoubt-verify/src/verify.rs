//! Top-level release verifier.
//!
//! The `Verifier` runs the checks in a fixed order: manifest signature,
//! manifest parse, artifact digest, provenance authenticity and policy. Each step is exposed on
//! its own so that the installer can interleave fetching, and
//! [`Verifier::verify_release`] runs them all for material already on hand.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redoubt_attest::envelope::envelopes_in;
use redoubt_attest::{
    ChecksumManifest, DetachedSignature, Digest, ProvenanceStatement, StatementError, TrustBundle,
};

use crate::digest;
use crate::error::{Rejection, VerificationError};
use crate::policy::ProvenancePolicy;
use crate::provenance::{self, AttestationReport, AttestationResult, ProvenanceOrigin};
use crate::signature::{self, VerifiedSigner};

/// A manifest whose signature has been confirmed.
///
/// Only [`Verifier::verify_manifest`] constructs one, so holding a
/// `SignedManifest` means the signature check already passed.
#[derive(Debug, Clone)]
pub struct SignedManifest {
    manifest: ChecksumManifest,
    signer: VerifiedSigner,
}

impl SignedManifest {
    /// The parsed manifest.
    pub const fn manifest(&self) -> &ChecksumManifest {
        &self.manifest
    }

    /// The key that signed it.
    pub const fn signer(&self) -> &VerifiedSigner {
        &self.signer
    }

    /// Expected digest for `filename`.
    pub fn expected_digest(&self, filename: &str) -> Result<&Digest, Rejection> {
        self.manifest
            .lookup(filename)
            .ok_or_else(|| Rejection::ManifestMissingEntry {
                filename: filename.to_owned(),
            })
    }
}

/// Everything a successful verification established.
#[derive(Debug, Clone)]
pub struct VerifiedRelease {
    /// Artifact name as listed in the manifest.
    pub artifact_name: String,
    /// Computed artifact digest.
    pub digest: Digest,
    /// Key that signed the manifest.
    pub signer: VerifiedSigner,
    /// Accepted provenance.
    pub attestation: AttestationReport,
}

/// Terminal outcome of verifying one release.
#[derive(Debug, Clone)]
pub enum VerificationResult {
    /// Every check passed.
    Verified(VerifiedRelease),
    /// A check failed.
    Rejected(Rejection),
}

impl VerificationResult {
    /// Returns `true` if the release verified.
    pub const fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }
}

/// Release material already in hand.
pub struct ReleaseInput<'a, R> {
    /// Artifact name to look up in the manifest.
    pub artifact_name: &'a str,
    /// Artifact content.
    pub artifact: R,
    /// Raw manifest bytes.
    pub manifest: &'a [u8],
    /// Raw signature file bytes.
    pub signature: &'a [u8],
    /// Raw provenance document bytes.
    pub provenance: &'a [u8],
    /// File name of the provenance document.
    pub provenance_name: &'a str,
}

/// A provenance document and the file name it was published under.
#[derive(Debug, Clone, Copy)]
pub struct ProvenanceDocument<'a> {
    /// File name, as the manifest would list it.
    pub name: &'a str,
    /// Raw content.
    pub bytes: &'a [u8],
}

/// Paths to release material on disk.
#[derive(Debug, Clone)]
pub struct ReleasePaths {
    /// The artifact.
    pub artifact: PathBuf,
    /// The `SHA256SUMS` manifest.
    pub manifest: PathBuf,
    /// The detached signature.
    pub signature: PathBuf,
    /// The provenance document.
    pub provenance: PathBuf,
    /// Manifest name of the artifact; defaults to its file name.
    pub artifact_name: Option<String>,
}

/// Verifies releases against a trust bundle and a provenance policy.
///
/// Cheap to clone; the bundle and policy are shared.
#[derive(Debug, Clone)]
pub struct Verifier {
    trust: Arc<TrustBundle>,
    policy: Arc<ProvenancePolicy>,
}

impl Verifier {
    /// Create a verifier over shared, immutable trust state.
    pub const fn new(trust: Arc<TrustBundle>, policy: Arc<ProvenancePolicy>) -> Self {
        Self { trust, policy }
    }

    /// The trust bundle.
    pub fn trust(&self) -> &TrustBundle {
        &self.trust
    }

    /// The provenance policy.
    pub fn policy(&self) -> &ProvenancePolicy {
        &self.policy
    }

    /// Confirm the signature over the raw manifest bytes, then parse them.
    pub fn verify_manifest(
        &self,
        manifest_bytes: &[u8],
        signature_bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SignedManifest, Rejection> {
        let detached =
            DetachedSignature::from_json(signature_bytes).map_err(|e| Rejection::SignatureInvalid {
                reason: format!("malformed signature file: {e}"),
            })?;
        let signer = signature::verify(manifest_bytes, &detached, &self.trust, now)?;
        let manifest = ChecksumManifest::parse(manifest_bytes).map_err(Rejection::ManifestMalformed)?;
        tracing::info!(entries = manifest.len(), key_id = %signer.key_id, "signed manifest accepted");
        Ok(SignedManifest { manifest, signer })
    }

    /// Hash `reader` and compare with the manifest entry for `artifact_name`.
    pub fn check_digest<R: Read>(
        &self,
        signed: &SignedManifest,
        artifact_name: &str,
        reader: R,
    ) -> Result<Digest, VerificationError> {
        let expected = signed.expected_digest(artifact_name)?;
        digest::check_reader_digest(artifact_name, expected, reader)
    }

    /// If the manifest lists `name`, check `bytes` against it.
    ///
    /// Unlisted documents pass here; [`Verifier::check_provenance`]
    /// decides whether anything else vouches for them.
    pub fn check_listed_document(
        &self,
        signed: &SignedManifest,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), Rejection> {
        match signed.manifest.lookup(name) {
            Some(expected) => digest::check_bytes_digest(name, expected, bytes).map(|_| ()),
            None => {
                tracing::debug!(document = name, "document not listed in manifest");
                Ok(())
            }
        }
    }

    /// Authenticate a provenance document, extract the statement for
    /// `artifact_name`, and attest it.
    ///
    /// A document the signed manifest lists must match its digest. An
    /// unlisted one is read only through a DSSE envelope that a trusted key
    /// signed; whether a document with neither is acceptable is up to the
    /// policy's `requireAuthenticatedProvenance` rule.
    pub fn check_provenance(
        &self,
        signed: &SignedManifest,
        document: ProvenanceDocument<'_>,
        artifact_name: &str,
        artifact_digest: &Digest,
        now: DateTime<Utc>,
    ) -> AttestationResult {
        let (origin, statement) = match signed.manifest.lookup(document.name) {
            Some(expected) => {
                digest::check_bytes_digest(document.name, expected, document.bytes)?;
                (ProvenanceOrigin::Manifest, None)
            }
            None => self.open_signed_envelopes(document.bytes, artifact_name, now)?,
        };
        let authenticated = self.policy.check_origin(document.name, &origin)?;

        let statement = match statement {
            Some(statement) => statement,
            None => ProvenanceStatement::from_document(document.bytes, artifact_name)
                .map_err(malformed)?,
        };
        let mut report = provenance::attest(&statement, artifact_digest, &self.policy, now)?;
        if let Some(result) = authenticated {
            report.results.insert(0, result);
        }
        Ok(report)
    }

    /// Find the statement for `artifact_name` in an envelope a trusted key
    /// signed.
    fn open_signed_envelopes(
        &self,
        document: &[u8],
        artifact_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(ProvenanceOrigin, Option<ProvenanceStatement>), Rejection> {
        let mut refused = None;
        for envelope in envelopes_in(document) {
            let signer = match signature::verify_envelope(&envelope, &self.trust, now) {
                Ok(signer) => signer,
                Err(rejection) => {
                    refused = Some(rejection);
                    continue;
                }
            };
            let payload = envelope.payload_bytes().map_err(malformed)?;
            match ProvenanceStatement::from_document(&payload, artifact_name) {
                Ok(statement) => return Ok((ProvenanceOrigin::Envelope(signer), Some(statement))),
                Err(StatementError::NoStatementForArtifact(_)) => {}
                Err(e) => return Err(malformed(e)),
            }
        }
        let reason = refused.map_or_else(
            || "not in the signed manifest and no signed envelope covers the artifact".to_owned(),
            |rejection| format!("not in the signed manifest and the envelope is refused: {rejection}"),
        );
        Ok((ProvenanceOrigin::Unauthenticated { reason }, None))
    }

    /// Run every check over material already in hand.
    pub fn verify_release<R: Read>(
        &self,
        input: ReleaseInput<'_, R>,
        now: DateTime<Utc>,
    ) -> Result<VerificationResult, VerificationError> {
        match self.run(input, now) {
            Ok(release) => Ok(VerificationResult::Verified(release)),
            Err(VerificationError::Rejected(rejection)) => {
                tracing::warn!(reason = rejection.kind(), %rejection, "release rejected");
                Ok(VerificationResult::Rejected(rejection))
            }
            Err(e) => Err(e),
        }
    }

    fn run<R: Read>(
        &self,
        input: ReleaseInput<'_, R>,
        now: DateTime<Utc>,
    ) -> Result<VerifiedRelease, VerificationError> {
        let signed = self.verify_manifest(input.manifest, input.signature, now)?;
        let digest = self.check_digest(&signed, input.artifact_name, input.artifact)?;
        let document = ProvenanceDocument {
            name: input.provenance_name,
            bytes: input.provenance,
        };
        let attestation =
            self.check_provenance(&signed, document, input.artifact_name, &digest, now)?;
        Ok(VerifiedRelease {
            artifact_name: input.artifact_name.to_owned(),
            digest,
            signer: signed.signer,
            attestation,
        })
    }

    /// Load release material from disk and verify it.
    pub fn verify_paths(
        &self,
        paths: &ReleasePaths,
        now: DateTime<Utc>,
    ) -> Result<VerificationResult, VerificationError> {
        let manifest = std::fs::read(&paths.manifest)?;
        let signature = std::fs::read(&paths.signature)?;
        let provenance = std::fs::read(&paths.provenance)?;
        let artifact = std::fs::File::open(&paths.artifact)?;

        let artifact_name = paths
            .artifact_name
            .clone()
            .unwrap_or_else(|| file_name(&paths.artifact));
        let provenance_name = file_name(&paths.provenance);

        self.verify_release(
            ReleaseInput {
                artifact_name: &artifact_name,
                artifact: std::io::BufReader::new(artifact),
                manifest: &manifest,
                signature: &signature,
                provenance: &provenance,
                provenance_name: &provenance_name,
            },
            now,
        )
    }
}

fn malformed(e: StatementError) -> Rejection {
    Rejection::ProvenanceMalformed(e.to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
