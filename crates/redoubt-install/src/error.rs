//! Error types for the installer.
//!
//! These are operational failures where no verdict on the release was
//! reached. Verdicts are reported through
//! [`InstallOutcome::Rejected`](crate::installer::InstallOutcome::Rejected).

/// Errors from the installer.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// The request cannot be carried out as given.
    #[error("invalid install request: {0}")]
    InvalidRequest(String),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    /// The verifier failed without reaching a verdict.
    #[error(transparent)]
    Verification(redoubt_verify::VerificationError),

    /// Local filesystem failure.
    #[error("install I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
