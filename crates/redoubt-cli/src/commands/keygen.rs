//! The `redoubt keygen` subcommand.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Args;
use color_eyre::eyre::Result;
use redoubt_attest::signer::{LocalSigner, default_key_path};
use redoubt_attest::{SignatureAlgorithm, TrustBundle};

/// Arguments for `redoubt keygen`.
#[derive(Args)]
pub struct KeygenArgs {
    /// Where to write the private key (PKCS#8 PEM, mode 0600).
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// `ecdsa-p256-sha256` or `ed25519`.
    #[arg(long, default_value = "ecdsa-p256-sha256")]
    pub algorithm: SignatureAlgorithm,

    /// Key id recorded in the trust bundle and in signatures.
    #[arg(long, default_value = "release")]
    pub key_id: String,

    /// Start of the key's validity window (RFC 3339).
    #[arg(long, value_name = "TIME")]
    pub not_before: Option<DateTime<Utc>>,

    /// End of the key's validity window (RFC 3339).
    #[arg(long, value_name = "TIME")]
    pub not_after: Option<DateTime<Utc>>,

    /// Also write a trust bundle holding only this key.
    #[arg(long, value_name = "PATH")]
    pub bundle: Option<PathBuf>,
}

/// Execute the keygen command.
pub fn execute(args: &KeygenArgs) -> Result<()> {
    let out = args.out.clone().unwrap_or_else(default_key_path);
    let signer = LocalSigner::generate(&out, args.algorithm, &args.key_id)?;
    let key = signer.trusted_key(args.not_before, args.not_after);

    if let Some(path) = &args.bundle {
        let bundle = TrustBundle::new(vec![key.clone()])?;
        std::fs::write(path, bundle.to_json_pretty()?)?;
        eprintln!("Trust bundle written to {}", path.display());
    }

    eprintln!("Private key written to {}", out.display());
    println!("{}", serde_json::to_string_pretty(&key)?);
    Ok(())
}
