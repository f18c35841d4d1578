//! The `redoubt verify` subcommand.
//!
//! Runs the install checks over release material already on disk.

use std::path::{Path, PathBuf};
use std::process;

use clap::Args;
use color_eyre::eyre::{Result, eyre};
use redoubt_verify::{ReleasePaths, VerificationResult};

use crate::config::Config;

/// Arguments for `redoubt verify`.
#[derive(Args)]
pub struct VerifyArgs {
    /// Path to the artifact.
    pub artifact: PathBuf,

    /// The `SHA256SUMS` manifest (default: next to the artifact).
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// The detached signature (default: `SHA256SUMS.sig` next to the artifact).
    #[arg(long, value_name = "PATH")]
    pub signature: Option<PathBuf>,

    /// The provenance document (default: `<artifact>.provenance.json`).
    #[arg(long, value_name = "PATH")]
    pub provenance: Option<PathBuf>,

    /// Artifact name in the manifest (default: the file name).
    #[arg(long)]
    pub name: Option<String>,

    /// Trust bundle JSON listing the accepted signing keys.
    #[arg(long, value_name = "PATH")]
    pub trust_bundle: Option<PathBuf>,

    /// Provenance policy JSON.
    #[arg(long, value_name = "PATH")]
    pub policy: Option<PathBuf>,

    /// Output results as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the verify command.
pub fn execute(args: VerifyArgs, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let verifier = config.verifier(args.trust_bundle.as_deref(), args.policy.as_deref())?;

    let dir = args
        .artifact
        .parent()
        .map_or_else(PathBuf::new, Path::to_path_buf);
    let file_name = args
        .artifact
        .file_name()
        .ok_or_else(|| eyre!("{} is not a file path", args.artifact.display()))?
        .to_string_lossy()
        .into_owned();

    let paths = ReleasePaths {
        manifest: args.manifest.unwrap_or_else(|| dir.join("SHA256SUMS")),
        signature: args.signature.unwrap_or_else(|| dir.join("SHA256SUMS.sig")),
        provenance: args
            .provenance
            .unwrap_or_else(|| dir.join(format!("{file_name}.provenance.json"))),
        artifact: args.artifact,
        artifact_name: args.name,
    };

    let result = verifier.verify_paths(&paths, chrono::Utc::now())?;

    if args.json {
        let json = match &result {
            VerificationResult::Verified(release) => serde_json::json!({
                "passed": true,
                "artifact": release.artifact_name,
                "digest": release.digest,
                "signer": release.signer.key_id,
                "algorithm": release.signer.algorithm.as_str(),
                "provenance": release.attestation,
            }),
            VerificationResult::Rejected(rejection) => serde_json::json!({
                "passed": false,
                "category": rejection.category().as_str(),
                "reason": rejection.kind(),
                "detail": rejection.to_string(),
            }),
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        match &result {
            VerificationResult::Verified(release) => {
                println!(
                    "[PASS] signature by `{}` ({})",
                    release.signer.key_id, release.signer.algorithm
                );
                println!("[PASS] sha256:{} {}", release.digest, release.artifact_name);
                for check in &release.attestation.results {
                    println!("[PASS] {}: {}", check.rule, check.message);
                }
                println!();
                println!("Verification PASSED");
            }
            VerificationResult::Rejected(rejection) => {
                println!("[FAIL] {rejection}");
                println!();
                println!("Verification FAILED ({})", rejection.category());
            }
        }
    }

    if let VerificationResult::Rejected(rejection) = result {
        process::exit(rejection.category().exit_code());
    }

    Ok(())
}
