//! Human-readable display of release material.
//!
//! Recognises the document kinds a release carries (manifests, signature
//! files, trust bundles, provenance and SBOMs) and formats the interesting
//! fields for terminal display.

use std::fmt::Write;

use base64::Engine;
use redoubt_attest::{
    ChecksumManifest, DetachedSignature, ProvenanceStatement, TrustBundle, TrustedKey,
};
use serde_json::Value;

use crate::error::VerificationError;

/// Suffixes a provenance document may carry after the artifact name.
const PROVENANCE_SUFFIXES: [&str; 3] = [".provenance.json", ".intoto.jsonl", ".jsonl"];

/// Extracted summary of one document.
#[derive(Debug)]
pub enum DocumentSummary {
    /// A `SHA256SUMS` manifest: `(filename, hex digest)` pairs.
    Manifest(Vec<(String, String)>),
    /// A detached signature file: `(algorithm, key id)` pairs.
    Signature(Vec<(String, String)>),
    /// A trust bundle.
    TrustBundle(Vec<TrustedKey>),
    /// A provenance document.
    Provenance(ProvenanceSummary),
    /// A CycloneDX or SPDX software bill of materials.
    Sbom(SbomSummary),
}

/// Summary of an SBOM.
#[derive(Debug, PartialEq, Eq)]
pub struct SbomSummary {
    /// `CycloneDX` or `SPDX`.
    pub format: &'static str,
    /// `specVersion` or `spdxVersion`, as written.
    pub spec_version: String,
    /// Document or top-level component name, if present.
    pub name: Option<String>,
    /// Number of components (CycloneDX) or packages (SPDX).
    pub components: usize,
}

/// Summary of a provenance document.
#[derive(Debug)]
pub struct ProvenanceSummary {
    /// Outer format: `native`, `dsse`, `in-toto`, or `jsonl`.
    pub format: &'static str,
    /// Subject names, for in-toto forms.
    pub subjects: Vec<String>,
    /// The artifact the statement was extracted for.
    pub artifact_name: String,
    /// The extracted statement.
    pub statement: ProvenanceStatement,
}

/// Recognise and summarise a document.
///
/// `file_name` is used to guess the artifact a provenance document
/// describes when `artifact` is `None`.
pub fn summarize(
    bytes: &[u8],
    file_name: &str,
    artifact: Option<&str>,
) -> Result<DocumentSummary, VerificationError> {
    let Ok(value) = serde_json::from_slice::<Value>(bytes) else {
        let looks_like_jsonl = std::str::from_utf8(bytes)
            .ok()
            .and_then(|t| t.lines().find(|l| !l.trim().is_empty()))
            .is_some_and(|l| serde_json::from_str::<Value>(l).is_ok());
        if looks_like_jsonl {
            return summarize_provenance(bytes, "jsonl", Vec::new(), file_name, artifact);
        }
        let manifest = ChecksumManifest::parse(bytes).map_err(|e| {
            VerificationError::UnrecognizedDocument(format!(
                "not JSON and not a checksum manifest: {e}"
            ))
        })?;
        return Ok(DocumentSummary::Manifest(
            manifest
                .entries()
                .iter()
                .map(|e| (e.filename.clone(), e.digest.to_hex()))
                .collect(),
        ));
    };

    if let Some(sbom) = sbom_summary(&value) {
        return Ok(DocumentSummary::Sbom(sbom));
    }

    if value.get("signatures").is_some() && value.get("payload").is_none() {
        let sig = DetachedSignature::from_json(bytes)?;
        return Ok(DocumentSummary::Signature(
            sig.signatures
                .into_iter()
                .map(|s| (s.algorithm, s.key_id))
                .collect(),
        ));
    }

    if value.get("keys").is_some() && value.get("version").is_some() {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| VerificationError::UnrecognizedDocument("not UTF-8".to_owned()))?;
        let bundle = TrustBundle::from_json(text)?;
        return Ok(DocumentSummary::TrustBundle(bundle.keys().to_vec()));
    }

    if value.get("payloadType").is_some() {
        let subjects = value
            .get("payload")
            .and_then(Value::as_str)
            .and_then(|p| base64::engine::general_purpose::STANDARD.decode(p).ok())
            .and_then(|raw| serde_json::from_slice::<Value>(&raw).ok())
            .map(|inner| subject_names(&inner))
            .unwrap_or_default();
        return summarize_provenance(bytes, "dsse", subjects, file_name, artifact);
    }

    if value.get("subject").is_some() {
        let subjects = subject_names(&value);
        return summarize_provenance(bytes, "in-toto", subjects, file_name, artifact);
    }

    if value.get("subjectDigest").is_some() {
        return summarize_provenance(bytes, "native", Vec::new(), file_name, artifact);
    }

    Err(VerificationError::UnrecognizedDocument(
        "JSON document is not a signature file, trust bundle, SBOM, or provenance".to_owned(),
    ))
}

fn sbom_summary(value: &Value) -> Option<SbomSummary> {
    let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_owned);
    let count = |key: &str| value.get(key).and_then(Value::as_array).map_or(0, Vec::len);

    if value.get("bomFormat").and_then(Value::as_str) == Some("CycloneDX") {
        return Some(SbomSummary {
            format: "CycloneDX",
            spec_version: text(value.get("specVersion")).unwrap_or_default(),
            name: text(value.pointer("/metadata/component/name")),
            components: count("components"),
        });
    }
    let spdx_version = text(value.get("spdxVersion"))?;
    Some(SbomSummary {
        format: "SPDX",
        spec_version: spdx_version,
        name: text(value.get("name")),
        components: count("packages"),
    })
}

fn subject_names(statement: &Value) -> Vec<String> {
    statement
        .get("subject")
        .and_then(Value::as_array)
        .map(|subjects| {
            subjects
                .iter()
                .filter_map(|s| s.get("name").and_then(Value::as_str))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn summarize_provenance(
    bytes: &[u8],
    format: &'static str,
    subjects: Vec<String>,
    file_name: &str,
    artifact: Option<&str>,
) -> Result<DocumentSummary, VerificationError> {
    let artifact_name = artifact
        .map(str::to_owned)
        .or_else(|| {
            PROVENANCE_SUFFIXES
                .iter()
                .find_map(|s| file_name.strip_suffix(s))
                .filter(|n| !n.is_empty())
                .map(str::to_owned)
        })
        .or_else(|| subjects.first().cloned())
        .unwrap_or_default();

    let statement = ProvenanceStatement::from_document(bytes, &artifact_name)
        .map_err(|e| VerificationError::UnrecognizedDocument(e.to_string()))?;

    Ok(DocumentSummary::Provenance(ProvenanceSummary {
        format,
        subjects,
        artifact_name,
        statement,
    }))
}

/// Format a summary as a human-readable string.
pub fn format_summary(summary: &DocumentSummary) -> String {
    let mut out = String::new();
    match summary {
        DocumentSummary::Manifest(entries) => {
            let _ = writeln!(out, "Checksum Manifest ({} entries)", entries.len());
            let _ = writeln!(out, "-------------------");
            for (name, digest) in entries {
                let _ = writeln!(out, "  {digest}  {name}");
            }
        }
        DocumentSummary::Signature(entries) => {
            let _ = writeln!(out, "Detached Signature ({} entries)", entries.len());
            let _ = writeln!(out, "-------------------");
            for (algorithm, key_id) in entries {
                let _ = writeln!(out, "  {key_id}  ({algorithm})");
            }
        }
        DocumentSummary::TrustBundle(keys) => {
            let _ = writeln!(out, "Trust Bundle ({} keys)", keys.len());
            let _ = writeln!(out, "-------------------");
            for key in keys {
                let window = |t: Option<chrono::DateTime<chrono::Utc>>| {
                    t.map_or_else(|| "-".to_owned(), |t| t.to_rfc3339())
                };
                let _ = writeln!(
                    out,
                    "  {:<20} {:<18} notBefore {}  notAfter {}",
                    key.id,
                    key.algorithm.as_str(),
                    window(key.not_before),
                    window(key.not_after)
                );
            }
        }
        DocumentSummary::Provenance(p) => {
            let s = &p.statement;
            let _ = writeln!(out, "Provenance Statement");
            let _ = writeln!(out, "-------------------");
            let _ = writeln!(out, "Format:          {}", p.format);
            let _ = writeln!(out, "Artifact:        {}", p.artifact_name);
            let _ = writeln!(out, "Subject digest:  {}", s.subject_digest);
            let _ = writeln!(out, "Builder:         {}", s.builder_id);
            let _ = writeln!(out, "Source:          {}", s.source_ref);
            let _ = writeln!(out, "Built:           {}", s.build_timestamp.to_rfc3339());
            if !p.subjects.is_empty() {
                let _ = writeln!(out, "Subjects:        {}", p.subjects.join(", "));
            }
            if !s.build_params.is_empty() {
                let _ = writeln!(out, "Parameters:");
                for (k, v) in &s.build_params {
                    let _ = writeln!(out, "  {k}={v}");
                }
            }
        }
        DocumentSummary::Sbom(sbom) => {
            let _ = writeln!(out, "Software Bill of Materials");
            let _ = writeln!(out, "-------------------");
            let _ = writeln!(out, "Format:          {} {}", sbom.format, sbom.spec_version);
            if let Some(name) = &sbom.name {
                let _ = writeln!(out, "Name:            {name}");
            }
            let _ = writeln!(out, "Components:      {}", sbom.components);
        }
    }
    out
}
