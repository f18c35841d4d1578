//! Verified installation of release artifacts.
//!
//! `redoubt-install` fetches a release (artifact, `SHA256SUMS`, its
//! detached signature, and a provenance document), runs every check in
//! `redoubt-verify`, and places the artifact with an atomic rename. A
//! single deadline bounds the whole run.

pub mod error;
pub mod fetch;
pub mod installer;
pub mod stage;

pub use error::InstallError;
pub use fetch::{FetchError, Fetcher, HttpFetcher, LocalFetcher, SchemeFetcher};
pub use installer::{
    InstallOutcome, InstallReport, InstallRequest, InstallState, Installer, RejectReason,
};
pub use stage::{Deadline, StagedFile};
