//! The `redoubt install` subcommand.
//!
//! Fetches a release, verifies it, and installs the artifact. Rejections
//! exit with their category's code.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::Result;
use redoubt_install::{
    HttpFetcher, InstallOutcome, InstallRequest, Installer, SchemeFetcher,
};

use crate::config::Config;

/// Arguments for `redoubt install`.
#[derive(Args)]
pub struct InstallArgs {
    /// Artifact URL (`https://`, `file://`, or a local path).
    pub artifact_url: String,

    /// Trust bundle JSON listing the accepted signing keys.
    #[arg(long, value_name = "PATH")]
    pub trust_bundle: Option<PathBuf>,

    /// Provenance policy JSON.
    #[arg(long, value_name = "PATH")]
    pub policy: Option<PathBuf>,

    /// Deadline for the whole install, in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Directory to install into (default: config `install_dir`, else `.`).
    #[arg(long, value_name = "DIR")]
    pub dest: Option<PathBuf>,

    /// Manifest URL (default: `SHA256SUMS` next to the artifact).
    #[arg(long, value_name = "URL")]
    pub manifest_url: Option<String>,

    /// Signature URL (default: `SHA256SUMS.sig` next to the artifact).
    #[arg(long, value_name = "URL")]
    pub signature_url: Option<String>,

    /// Provenance URL (default: `<artifact>.provenance.json` next to it).
    #[arg(long, value_name = "URL")]
    pub provenance_url: Option<String>,

    /// Artifact name in the manifest (default: the URL's file name).
    #[arg(long)]
    pub name: Option<String>,

    /// Largest artifact to download, in bytes (default: 2 GiB).
    #[arg(long, value_name = "BYTES")]
    pub max_size: Option<u64>,

    /// Output the outcome as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the install command.
pub async fn execute(args: InstallArgs, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let verifier = config.verifier(args.trust_bundle.as_deref(), args.policy.as_deref())?;

    let dest = args
        .dest
        .or_else(|| config.install_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let mut request = InstallRequest::new(args.artifact_url, dest)
        .with_timeout(Duration::from_secs(config.timeout_secs(args.timeout)));
    if let Some(name) = args.name {
        request = request.with_name(name);
    }
    if let Some(url) = args.manifest_url {
        request = request.with_manifest_url(url);
    }
    if let Some(url) = args.signature_url {
        request = request.with_signature_url(url);
    }
    if let Some(url) = args.provenance_url {
        request = request.with_provenance_url(url);
    }
    if let Some(bytes) = args.max_size {
        request = request.with_max_artifact_size(bytes);
    }

    let fetcher = SchemeFetcher::new(HttpFetcher::new(config.user_agent())?);
    let installer = Installer::new(fetcher, verifier);
    let outcome = installer.install(&request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    } else {
        print_outcome(&outcome);
    }

    let code = outcome.exit_code();
    if code != 0 {
        process::exit(code);
    }
    Ok(())
}

fn outcome_json(outcome: &InstallOutcome) -> serde_json::Value {
    match outcome {
        InstallOutcome::Installed(report) => serde_json::json!({
            "status": "installed",
            "exitCode": 0,
            "report": report,
        }),
        InstallOutcome::Rejected {
            state,
            reason,
            trail,
        } => serde_json::json!({
            "status": "rejected",
            "exitCode": outcome.exit_code(),
            "state": state,
            "category": reason.category().as_str(),
            "retryable": reason.category().is_retryable(),
            "reason": reason.kind(),
            "detail": reason.to_string(),
            "trail": trail,
        }),
    }
}

fn print_outcome(outcome: &InstallOutcome) {
    match outcome {
        InstallOutcome::Installed(report) => {
            println!(
                "Installed {} -> {}",
                report.artifact_name,
                report.path.display()
            );
            println!("  digest:  sha256:{}", report.digest);
            println!("  signer:  {}", report.signer_key_id);
            println!("  builder: {}", report.builder_id);
            if !report.source_ref.is_empty() {
                println!("  source:  {}", report.source_ref);
            }
        }
        InstallOutcome::Rejected { state, reason, .. } => {
            let category = reason.category();
            eprintln!("Install REJECTED during {state}: {reason}");
            eprintln!(
                "  category: {category} (exit {}){}",
                category.exit_code(),
                if category.is_retryable() {
                    ", retryable"
                } else {
                    ""
                }
            );
        }
    }
}
