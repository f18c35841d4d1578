//! The install pipeline.
//!
//! An install walks a fixed sequence of states:
//!
//! ```text
//! Fetching -> ManifestVerifying -> DigestChecking -> ProvenanceChecking -> Installing -> Installed
//! ```
//!
//! Any verification state may end the run with a rejection instead. The
//! artifact body is only downloaded once the manifest signature has been
//! confirmed, and it goes to an unlinked spool file; the install directory
//! is touched only in `Installing`, through an atomic rename.

use std::fs::File;
use std::future::Future;
use std::io::{BufReader, Seek};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redoubt_attest::Digest;
use redoubt_attest::manifest::MANIFEST_FILE_NAME;
use redoubt_attest::signature::SIGNATURE_FILE_NAME;
use redoubt_verify::{
    AttestationReport, ProvenanceDocument, Rejection, RejectionCategory, SignedManifest,
    VerificationError, Verifier,
};
use serde::Serialize;

use crate::error::InstallError;
use crate::fetch::{FetchError, Fetcher, artifact_file_name, sibling_url};
use crate::stage::{Deadline, StageError, StagedFile};

/// Size cap for the manifest, signature, and provenance documents.
pub const METADATA_LIMIT: u64 = 1024 * 1024;

/// Default size cap for the artifact.
pub const ARTIFACT_LIMIT: u64 = 2 * 1024 * 1024 * 1024;

/// Suffix of the default provenance document name.
pub const PROVENANCE_SUFFIX: &str = ".provenance.json";

/// Pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InstallState {
    /// Downloading the manifest, signature, and provenance.
    Fetching,
    /// Checking the manifest signature and parsing the manifest.
    ManifestVerifying,
    /// Downloading and hashing the artifact.
    DigestChecking,
    /// Authenticating the provenance document and checking its statement
    /// against policy.
    ProvenanceChecking,
    /// Writing the artifact into place.
    Installing,
    /// Done.
    Installed,
}

impl InstallState {
    /// State name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetching => "Fetching",
            Self::ManifestVerifying => "ManifestVerifying",
            Self::DigestChecking => "DigestChecking",
            Self::ProvenanceChecking => "ProvenanceChecking",
            Self::Installing => "Installing",
            Self::Installed => "Installed",
        }
    }
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an install was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// The release failed verification.
    #[error(transparent)]
    Verification(Rejection),

    /// Release material could not be fetched.
    #[error("transport failure: {detail}")]
    Transport {
        /// URL being fetched.
        url: String,
        /// What went wrong.
        detail: String,
    },

    /// The install deadline passed.
    #[error("deadline expired during {stage}")]
    Timeout {
        /// State that was running.
        stage: InstallState,
    },
}

impl RejectReason {
    /// The category this reason belongs to.
    pub const fn category(&self) -> RejectionCategory {
        match self {
            Self::Verification(r) => r.category(),
            Self::Transport { .. } => RejectionCategory::Network,
            Self::Timeout { .. } => RejectionCategory::Timeout,
        }
    }

    /// Stable machine-readable name of the reason.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Verification(r) => r.kind(),
            Self::Transport { .. } => "Transport",
            Self::Timeout { .. } => "Timeout",
        }
    }
}

/// Record of a completed install.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    /// Artifact name as listed in the manifest.
    pub artifact_name: String,
    /// Where the artifact now lives.
    pub path: PathBuf,
    /// Verified content digest.
    pub digest: Digest,
    /// Key that signed the manifest.
    pub signer_key_id: String,
    /// Builder named by the accepted provenance.
    pub builder_id: String,
    /// Source named by the accepted provenance.
    pub source_ref: String,
    /// States visited.
    pub trail: Vec<InstallState>,
}

/// Terminal outcome of an install.
#[derive(Debug, Clone)]
pub enum InstallOutcome {
    /// The artifact was verified and placed.
    Installed(InstallReport),
    /// The run stopped; nothing was placed.
    Rejected {
        /// State in which the run stopped.
        state: InstallState,
        /// Why.
        reason: RejectReason,
        /// States visited, ending with `state`.
        trail: Vec<InstallState>,
    },
}

impl InstallOutcome {
    /// Process exit code: `0` when installed, else the category's code.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Installed(_) => 0,
            Self::Rejected { reason, .. } => reason.category().exit_code(),
        }
    }

    /// States visited.
    pub fn trail(&self) -> &[InstallState] {
        match self {
            Self::Installed(report) => &report.trail,
            Self::Rejected { trail, .. } => trail,
        }
    }
}

/// What to install and where.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Artifact URL or path.
    pub artifact_url: String,
    /// Directory to install into.
    pub dest_dir: PathBuf,
    /// Manifest name of the artifact; defaults to the URL's file name.
    pub artifact_name: Option<String>,
    /// Manifest URL; defaults to `SHA256SUMS` next to the artifact.
    pub manifest_url: Option<String>,
    /// Signature URL; defaults to `SHA256SUMS.sig` next to the artifact.
    pub signature_url: Option<String>,
    /// Provenance URL; defaults to `<artifact>.provenance.json` next to it.
    pub provenance_url: Option<String>,
    /// Budget for the whole run.
    pub timeout: Option<Duration>,
    /// Largest artifact accepted, in bytes.
    pub max_artifact_size: u64,
}

impl InstallRequest {
    /// Install `artifact_url` into `dest_dir` with default sibling URLs.
    pub fn new(artifact_url: impl Into<String>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_url: artifact_url.into(),
            dest_dir: dest_dir.into(),
            artifact_name: None,
            manifest_url: None,
            signature_url: None,
            provenance_url: None,
            timeout: None,
            max_artifact_size: ARTIFACT_LIMIT,
        }
    }

    /// Override the manifest name of the artifact.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = Some(name.into());
        self
    }

    /// Override the manifest URL.
    #[must_use]
    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = Some(url.into());
        self
    }

    /// Override the signature URL.
    #[must_use]
    pub fn with_signature_url(mut self, url: impl Into<String>) -> Self {
        self.signature_url = Some(url.into());
        self
    }

    /// Override the provenance URL.
    #[must_use]
    pub fn with_provenance_url(mut self, url: impl Into<String>) -> Self {
        self.provenance_url = Some(url.into());
        self
    }

    /// Bound the whole run.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Refuse artifacts larger than `bytes`.
    #[must_use]
    pub const fn with_max_artifact_size(mut self, bytes: u64) -> Self {
        self.max_artifact_size = bytes;
        self
    }

    fn plan(&self) -> Result<Plan, InstallError> {
        let url_name = artifact_file_name(&self.artifact_url);
        let artifact_name = self
            .artifact_name
            .clone()
            .or_else(|| url_name.clone())
            .ok_or_else(|| {
                InstallError::InvalidRequest(format!(
                    "cannot derive an artifact name from `{}`",
                    self.artifact_url
                ))
            })?;
        if artifact_name.is_empty()
            || artifact_name == "."
            || artifact_name == ".."
            || artifact_name.contains(['/', '\\'])
        {
            return Err(InstallError::InvalidRequest(format!(
                "artifact name `{artifact_name}` is not a plain file name"
            )));
        }

        let sibling = |name: &str| sibling_url(&self.artifact_url, name);
        let provenance_url = self.provenance_url.clone().unwrap_or_else(|| {
            let base = url_name.as_deref().unwrap_or(&artifact_name);
            sibling(&format!("{base}{PROVENANCE_SUFFIX}"))
        });
        let provenance_name = artifact_file_name(&provenance_url).unwrap_or_default();

        Ok(Plan {
            artifact_url: self.artifact_url.clone(),
            final_path: self.dest_dir.join(&artifact_name),
            artifact_name,
            manifest_url: self
                .manifest_url
                .clone()
                .unwrap_or_else(|| sibling(MANIFEST_FILE_NAME)),
            signature_url: self
                .signature_url
                .clone()
                .unwrap_or_else(|| sibling(SIGNATURE_FILE_NAME)),
            provenance_url,
            provenance_name,
            artifact_limit: self.max_artifact_size,
        })
    }
}

#[derive(Debug)]
struct Plan {
    artifact_url: String,
    artifact_name: String,
    manifest_url: String,
    signature_url: String,
    provenance_url: String,
    provenance_name: String,
    final_path: PathBuf,
    artifact_limit: u64,
}

struct Fetched {
    manifest: Vec<u8>,
    signature: Vec<u8>,
    provenance: Vec<u8>,
}

/// Spooled artifact content with its verified digest.
struct Spooled {
    file: File,
    digest: Digest,
}

enum Step {
    Fetching,
    ManifestVerifying(Fetched),
    DigestChecking(Fetched, SignedManifest),
    ProvenanceChecking(Fetched, SignedManifest, Spooled),
    Installing(SignedManifest, Spooled, AttestationReport),
    Installed {
        path: PathBuf,
        digest: Digest,
        signer_key_id: String,
        attestation: AttestationReport,
    },
}

impl Step {
    const fn state(&self) -> InstallState {
        match self {
            Self::Fetching => InstallState::Fetching,
            Self::ManifestVerifying(..) => InstallState::ManifestVerifying,
            Self::DigestChecking(..) => InstallState::DigestChecking,
            Self::ProvenanceChecking(..) => InstallState::ProvenanceChecking,
            Self::Installing(..) => InstallState::Installing,
            Self::Installed { .. } => InstallState::Installed,
        }
    }
}

/// How a step ended early.
enum Halt {
    Reject(RejectReason),
    Fail(InstallError),
}

impl From<Rejection> for Halt {
    fn from(r: Rejection) -> Self {
        Self::Reject(RejectReason::Verification(r))
    }
}

impl From<VerificationError> for Halt {
    fn from(e: VerificationError) -> Self {
        match e {
            VerificationError::Rejected(r) => r.into(),
            other => Self::Fail(InstallError::Verification(other)),
        }
    }
}

impl From<FetchError> for Halt {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Sink(io) => Self::Fail(InstallError::IoError(io)),
            other => Self::Reject(RejectReason::Transport {
                url: other.url().unwrap_or_default().to_owned(),
                detail: other.to_string(),
            }),
        }
    }
}

impl From<std::io::Error> for Halt {
    fn from(e: std::io::Error) -> Self {
        Self::Fail(InstallError::IoError(e))
    }
}

const fn timeout(stage: InstallState) -> Halt {
    Halt::Reject(RejectReason::Timeout { stage })
}

fn stage_failure(e: StageError) -> Halt {
    match e {
        StageError::DeadlineExpired => timeout(InstallState::Installing),
        StageError::IoError(io) => io.into(),
    }
}

/// Run a fetch under the remaining budget.
async fn bounded<T>(
    deadline: &Deadline,
    stage: InstallState,
    fetch: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, Halt> {
    let result = match deadline.remaining() {
        None => fetch.await,
        Some(left) if left.is_zero() => return Err(timeout(stage)),
        Some(left) => tokio::time::timeout(left, fetch)
            .await
            .map_err(|_| timeout(stage))?,
    };
    Ok(result?)
}

/// Fetches, verifies, and installs releases.
///
/// One `Installer` may serve many concurrent installs; they share only
/// the verifier's read-only trust bundle and policy.
#[derive(Debug)]
pub struct Installer<F> {
    fetcher: F,
    verifier: Verifier,
}

impl<F: Fetcher> Installer<F> {
    /// Create an installer.
    pub const fn new(fetcher: F, verifier: Verifier) -> Self {
        Self { fetcher, verifier }
    }

    /// The verifier.
    pub const fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Install with the current time as "now".
    pub async fn install(&self, request: &InstallRequest) -> Result<InstallOutcome, InstallError> {
        self.install_at(request, Utc::now()).await
    }

    /// Install, evaluating key validity and provenance age at `now`.
    ///
    /// Returns `Err` only for failures that say nothing about the release
    /// (bad request, local I/O). Every verdict is an [`InstallOutcome`].
    pub async fn install_at(
        &self,
        request: &InstallRequest,
        now: DateTime<Utc>,
    ) -> Result<InstallOutcome, InstallError> {
        let plan = request.plan()?;
        let deadline = request.timeout.map_or_else(Deadline::none, Deadline::after);
        tracing::info!(
            artifact = %plan.artifact_name,
            url = %plan.artifact_url,
            dest = %plan.final_path.display(),
            "starting install"
        );

        let mut trail = Vec::new();
        let mut step = Step::Fetching;
        loop {
            let state = step.state();
            trail.push(state);
            tracing::debug!(%state, "install state");

            let next = match step {
                Step::Fetching => self
                    .fetch_metadata(&plan, &deadline)
                    .await
                    .map(Step::ManifestVerifying),
                Step::ManifestVerifying(fetched) => self
                    .verifier
                    .verify_manifest(&fetched.manifest, &fetched.signature, now)
                    .map(|signed| Step::DigestChecking(fetched, signed))
                    .map_err(Halt::from),
                Step::DigestChecking(fetched, signed) => self
                    .check_digests(&plan, &deadline, &fetched, &signed)
                    .await
                    .map(|spooled| Step::ProvenanceChecking(fetched, signed, spooled)),
                Step::ProvenanceChecking(fetched, signed, spooled) => {
                    let document = ProvenanceDocument {
                        name: &plan.provenance_name,
                        bytes: &fetched.provenance,
                    };
                    self.verifier
                        .check_provenance(&signed, document, &plan.artifact_name, &spooled.digest, now)
                        .map(|attestation| Step::Installing(signed, spooled, attestation))
                        .map_err(Halt::from)
                }
                Step::Installing(signed, mut spooled, attestation) => {
                    Self::place(&plan, &deadline, &mut spooled.file).map(|path| Step::Installed {
                        path,
                        digest: spooled.digest,
                        signer_key_id: signed.signer().key_id.clone(),
                        attestation,
                    })
                }
                Step::Installed {
                    path,
                    digest,
                    signer_key_id,
                    attestation,
                } => {
                    tracing::info!(path = %path.display(), %digest, "install complete");
                    return Ok(InstallOutcome::Installed(InstallReport {
                        artifact_name: plan.artifact_name,
                        path,
                        digest,
                        signer_key_id,
                        builder_id: attestation.builder_id,
                        source_ref: attestation.source_ref,
                        trail,
                    }));
                }
            };

            step = match next {
                Ok(step) => step,
                Err(Halt::Reject(reason)) => {
                    tracing::warn!(
                        %state,
                        category = %reason.category(),
                        reason = reason.kind(),
                        detail = %reason,
                        "install rejected"
                    );
                    return Ok(InstallOutcome::Rejected {
                        state,
                        reason,
                        trail,
                    });
                }
                Err(Halt::Fail(e)) => return Err(e),
            };
        }
    }

    async fn fetch_metadata(&self, plan: &Plan, deadline: &Deadline) -> Result<Fetched, Halt> {
        let stage = InstallState::Fetching;
        let manifest = bounded(
            deadline,
            stage,
            self.fetcher.fetch_bytes(&plan.manifest_url, METADATA_LIMIT),
        )
        .await?;
        let signature = bounded(
            deadline,
            stage,
            self.fetcher.fetch_bytes(&plan.signature_url, METADATA_LIMIT),
        )
        .await?;
        let provenance = bounded(
            deadline,
            stage,
            self.fetcher.fetch_bytes(&plan.provenance_url, METADATA_LIMIT),
        )
        .await?;
        Ok(Fetched {
            manifest,
            signature,
            provenance,
        })
    }

    async fn check_digests(
        &self,
        plan: &Plan,
        deadline: &Deadline,
        fetched: &Fetched,
        signed: &SignedManifest,
    ) -> Result<Spooled, Halt> {
        let stage = InstallState::DigestChecking;
        // Unlisted artifacts are refused before any download.
        signed.expected_digest(&plan.artifact_name)?;

        let mut file = tempfile::tempfile()?;
        let bytes = bounded(
            deadline,
            stage,
            self.fetcher
                .fetch_to_file(&plan.artifact_url, &mut file, plan.artifact_limit),
        )
        .await?;
        tracing::debug!(bytes, "artifact spooled");
        if deadline.is_expired() {
            return Err(timeout(stage));
        }

        file.rewind()?;
        let digest = self
            .verifier
            .check_digest(signed, &plan.artifact_name, BufReader::new(&file))?;
        self.verifier
            .check_listed_document(signed, &plan.provenance_name, &fetched.provenance)?;
        Ok(Spooled { file, digest })
    }

    fn place(plan: &Plan, deadline: &Deadline, spool: &mut File) -> Result<PathBuf, Halt> {
        spool.rewind()?;
        let mut staged = StagedFile::create(&plan.final_path).map_err(stage_failure)?;
        staged
            .write_from(BufReader::new(&*spool), deadline)
            .map_err(stage_failure)?;
        staged.commit(deadline).map_err(stage_failure)
    }
}
