//! The `redoubt sign` subcommand.
//!
//! Publisher side: hash release files into `SHA256SUMS` and sign it, and
//! optionally seal a provenance statement in a signed DSSE envelope.

use std::path::{Path, PathBuf};

use clap::Args;
use color_eyre::eyre::{Result, WrapErr, eyre};
use redoubt_attest::envelope::IN_TOTO_PAYLOAD_TYPE;
use redoubt_attest::manifest::MANIFEST_FILE_NAME;
use redoubt_attest::signature::SIGNATURE_FILE_NAME;
use redoubt_attest::signer::{LocalSigner, build_manifest, default_key_path};

/// Arguments for `redoubt sign`.
#[derive(Args)]
pub struct SignArgs {
    /// Files to list in the manifest.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Private key (default: the key `redoubt keygen` writes).
    #[arg(long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Key id to record in the signature.
    #[arg(long, default_value = "release")]
    pub key_id: String,

    /// Directory for `SHA256SUMS` and `SHA256SUMS.sig`.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Provenance statement to seal in a signed DSSE envelope.
    ///
    /// The envelope is written to the output directory under the
    /// statement's file name, so installers accept it even when the
    /// manifest does not list it.
    #[arg(long, value_name = "PATH")]
    pub envelope: Option<PathBuf>,
}

/// Execute the sign command.
pub fn execute(args: &SignArgs) -> Result<()> {
    let key_path = args.key.clone().unwrap_or_else(default_key_path);
    let signer = LocalSigner::load(&key_path, &args.key_id)
        .wrap_err_with(|| format!("failed to load signing key {}", key_path.display()))?;

    if let Some(statement_path) = &args.envelope {
        let envelope_path = seal_statement(&signer, statement_path, &args.out_dir)?;
        println!("{}", envelope_path.display());
    }

    let manifest = build_manifest(&args.files)?.render();
    let signature = signer.sign_detached(manifest.as_bytes())?;

    std::fs::create_dir_all(&args.out_dir)?;
    let manifest_path = args.out_dir.join(MANIFEST_FILE_NAME);
    let signature_path = args.out_dir.join(SIGNATURE_FILE_NAME);
    std::fs::write(&manifest_path, &manifest)?;
    std::fs::write(&signature_path, signature.to_json_pretty()?)?;

    tracing::info!(
        files = args.files.len(),
        key_id = %args.key_id,
        algorithm = %signer.algorithm(),
        "signed manifest"
    );
    println!("{}", manifest_path.display());
    println!("{}", signature_path.display());
    Ok(())
}

fn seal_statement(
    signer: &LocalSigner,
    statement_path: &Path,
    out_dir: &Path,
) -> Result<PathBuf> {
    let statement = std::fs::read(statement_path)
        .wrap_err_with(|| format!("failed to read {}", statement_path.display()))?;
    let file_name = statement_path
        .file_name()
        .ok_or_else(|| eyre!("{} is not a file path", statement_path.display()))?;
    let envelope = signer.sign_envelope(IN_TOTO_PAYLOAD_TYPE, &statement)?;

    std::fs::create_dir_all(out_dir)?;
    let envelope_path = out_dir.join(file_name);
    std::fs::write(&envelope_path, envelope.to_json_pretty()?)?;
    tracing::info!(
        path = %envelope_path.display(),
        key_id = %signer.key_id(),
        "sealed provenance statement"
    );
    Ok(envelope_path)
}
