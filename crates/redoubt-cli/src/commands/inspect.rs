//! The `redoubt inspect` subcommand.
//!
//! Displays a manifest, signature, trust bundle, SBOM, or provenance
//! document in human-readable format.

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::Result;
use redoubt_verify::inspect::{self, DocumentSummary};

/// Arguments for `redoubt inspect`.
#[derive(Args)]
pub struct InspectArgs {
    /// Path to the document.
    pub file: PathBuf,

    /// Artifact whose statement to show, for multi-subject provenance.
    #[arg(long)]
    pub artifact: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the inspect command.
pub fn execute(args: &InspectArgs) -> Result<()> {
    let bytes = std::fs::read(&args.file)?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let summary = inspect::summarize(&bytes, &file_name, args.artifact.as_deref())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?);
    } else {
        print!("{}", inspect::format_summary(&summary));
    }
    Ok(())
}

fn summary_json(summary: &DocumentSummary) -> serde_json::Value {
    match summary {
        DocumentSummary::Manifest(entries) => serde_json::json!({
            "kind": "manifest",
            "entries": entries
                .iter()
                .map(|(filename, digest)| serde_json::json!({ "filename": filename, "digest": digest }))
                .collect::<Vec<_>>(),
        }),
        DocumentSummary::Signature(entries) => serde_json::json!({
            "kind": "signature",
            "signatures": entries
                .iter()
                .map(|(algorithm, key_id)| serde_json::json!({ "algorithm": algorithm, "keyId": key_id }))
                .collect::<Vec<_>>(),
        }),
        DocumentSummary::TrustBundle(keys) => serde_json::json!({
            "kind": "trustBundle",
            "keys": keys,
        }),
        DocumentSummary::Provenance(p) => serde_json::json!({
            "kind": "provenance",
            "format": p.format,
            "artifact": p.artifact_name,
            "subjects": p.subjects,
            "statement": p.statement,
        }),
        DocumentSummary::Sbom(sbom) => serde_json::json!({
            "kind": "sbom",
            "format": sbom.format,
            "specVersion": sbom.spec_version,
            "name": sbom.name,
            "components": sbom.components,
        }),
    }
}
