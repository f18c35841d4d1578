//! Provenance statements binding an artifact digest to its build origin.
//!
//! The native form is a flat JSON object. Documents may also arrive as
//! DSSE envelopes, as in-toto v1 statements carrying a SLSA provenance
//! predicate (v0.2 or v1), or as JSON Lines of any of these. All of them
//! reduce to a [`ProvenanceStatement`] for the artifact being installed.
//!
//! See: <https://github.com/in-toto/attestation/blob/main/spec/v1/statement.md>

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::StatementError;

/// Build parameter that records the reproducible-build epoch.
pub const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

/// Envelopes nested deeper than this are rejected.
const MAX_ENVELOPE_DEPTH: usize = 2;

/// A provenance statement for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceStatement {
    /// Hex SHA-256 of the artifact, exactly as written in the document.
    pub subject_digest: String,
    /// Identity of the build system.
    pub builder_id: String,
    /// Source reference, e.g. `git+https://host/org/repo@<commit>`.
    #[serde(default)]
    pub source_ref: String,
    /// When the build ran.
    pub build_timestamp: DateTime<Utc>,
    /// Build parameters.
    #[serde(default)]
    pub build_params: BTreeMap<String, String>,
}

impl ProvenanceStatement {
    /// Extract the statement covering `artifact_name` from a document.
    ///
    /// For JSON Lines documents the first record that covers the artifact
    /// wins. Records in unrecognised shapes are skipped.
    pub fn from_document(bytes: &[u8], artifact_name: &str) -> Result<Self, StatementError> {
        let text = std::str::from_utf8(bytes).map_err(|_| StatementError::NotUtf8)?;

        let records: Vec<Value> = match serde_json::from_str::<Value>(text) {
            Ok(v) => vec![v],
            Err(whole_err) => {
                let lines: Vec<(usize, &str)> = text
                    .lines()
                    .enumerate()
                    .filter(|(_, l)| !l.trim().is_empty())
                    .collect();
                if lines.len() <= 1 {
                    return Err(StatementError::InvalidJson {
                        line: lines.first().map_or(1, |(i, _)| i + 1),
                        source: whole_err,
                    });
                }
                lines
                    .into_iter()
                    .map(|(i, l)| {
                        serde_json::from_str(l)
                            .map_err(|source| StatementError::InvalidJson { line: i + 1, source })
                    })
                    .collect::<Result<_, _>>()?
            }
        };

        for record in records {
            if let Some(statement) = resolve_record(record, artifact_name, 0)? {
                return Ok(statement);
            }
        }
        Err(StatementError::NoStatementForArtifact(artifact_name.to_owned()))
    }

    /// The `SOURCE_DATE_EPOCH` build parameter, if recorded.
    pub fn source_date_epoch(&self) -> Option<&str> {
        self.build_params.get(SOURCE_DATE_EPOCH).map(String::as_str)
    }
}

fn resolve_record(
    record: Value,
    artifact_name: &str,
    depth: usize,
) -> Result<Option<ProvenanceStatement>, StatementError> {
    if record.get("payloadType").is_some() && record.get("payload").is_some() {
        if depth >= MAX_ENVELOPE_DEPTH {
            return Err(StatementError::InvalidEnvelope("envelopes nested too deeply".to_owned()));
        }
        let inner = open_envelope(record)?;
        return resolve_record(inner, artifact_name, depth + 1);
    }

    if record.get("subjectDigest").is_some() {
        return serde_json::from_value(record)
            .map(Some)
            .map_err(StatementError::InvalidStatement);
    }

    if record.get("subject").is_some_and(Value::is_array) && record.get("predicate").is_some() {
        return from_in_toto(&record, artifact_name);
    }

    tracing::debug!("skipping provenance record in an unrecognised shape");
    Ok(None)
}

fn open_envelope(record: Value) -> Result<Value, StatementError> {
    let payload = Envelope::from_value(record)?.payload_bytes()?;
    serde_json::from_slice(&payload)
        .map_err(|e| StatementError::InvalidEnvelope(format!("payload is not JSON: {e}")))
}

fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_str)
}

fn from_in_toto(
    statement: &Value,
    artifact_name: &str,
) -> Result<Option<ProvenanceStatement>, StatementError> {
    let wanted = base_name(artifact_name);
    let Some(subject) = statement
        .get("subject")
        .and_then(Value::as_array)
        .and_then(|subjects| {
            subjects
                .iter()
                .find(|s| s.get("name").and_then(Value::as_str).map(base_name) == Some(wanted))
        })
    else {
        return Ok(None);
    };

    let subject_digest = str_at(subject, &["digest", "sha256"])
        .ok_or(StatementError::MissingField("subject sha256 digest"))?
        .to_owned();

    let predicate = statement
        .get("predicate")
        .ok_or(StatementError::MissingField("predicate"))?;

    let builder_id = str_at(predicate, &["builder", "id"])
        .or_else(|| str_at(predicate, &["runDetails", "builder", "id"]))
        .ok_or(StatementError::MissingField("builder id"))?
        .to_owned();

    let timestamp = str_at(predicate, &["metadata", "buildFinishedOn"])
        .or_else(|| str_at(predicate, &["metadata", "buildStartedOn"]))
        .or_else(|| str_at(predicate, &["runDetails", "metadata", "finishedOn"]))
        .or_else(|| str_at(predicate, &["runDetails", "metadata", "startedOn"]))
        .ok_or(StatementError::MissingField("build timestamp"))?;
    let build_timestamp = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| StatementError::InvalidTimestamp(timestamp.to_owned()))?
        .with_timezone(&Utc);

    let source = predicate
        .get("materials")
        .and_then(|m| m.get(0))
        .or_else(|| {
            predicate
                .get("buildDefinition")
                .and_then(|b| b.get("resolvedDependencies"))
                .and_then(|d| d.get(0))
        });
    let source_ref = source.map_or_else(String::new, |s| {
        let uri = str_at(s, &["uri"]).unwrap_or_default();
        match str_at(s, &["digest", "gitCommit"]).or_else(|| str_at(s, &["digest", "sha1"])) {
            Some(commit) if !uri.contains('@') => format!("{uri}@{commit}"),
            _ => uri.to_owned(),
        }
    });

    let mut build_params = BTreeMap::new();
    for params in [
        predicate.get("invocation").and_then(|i| i.get("parameters")),
        predicate.get("invocation").and_then(|i| i.get("environment")),
        predicate
            .get("buildDefinition")
            .and_then(|b| b.get("externalParameters")),
        predicate
            .get("buildDefinition")
            .and_then(|b| b.get("internalParameters")),
    ]
    .into_iter()
    .flatten()
    {
        collect_scalars(params, &mut build_params);
    }
    if let Some(epoch) = find_scalar(predicate, SOURCE_DATE_EPOCH) {
        build_params.entry(SOURCE_DATE_EPOCH.to_owned()).or_insert(epoch);
    }

    Ok(Some(ProvenanceStatement {
        subject_digest,
        builder_id,
        source_ref,
        build_timestamp,
        build_params,
    }))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Copy the top-level scalar members of an object; the first writer wins.
fn collect_scalars(params: &Value, out: &mut BTreeMap<String, String>) {
    let Some(obj) = params.as_object() else {
        return;
    };
    for (key, value) in obj {
        if let Some(s) = scalar_to_string(value) {
            out.entry(key.clone()).or_insert(s);
        }
    }
}

/// Depth-first search for a scalar member named `key`.
fn find_scalar(value: &Value, key: &str) -> Option<String> {
    match value {
        Value::Object(obj) => obj
            .get(key)
            .and_then(scalar_to_string)
            .or_else(|| obj.values().find_map(|v| find_scalar(v, key))),
        Value::Array(items) => items.iter().find_map(|v| find_scalar(v, key)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    const DIGEST: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn native() -> Value {
        serde_json::json!({
            "subjectDigest": DIGEST,
            "builderId": "https://github.com/actions/runner",
            "sourceRef": "git+https://github.com/redoubt-cysec/provenance-template@abc123",
            "buildTimestamp": "2026-10-01T12:00:00Z",
            "buildParams": { "SOURCE_DATE_EPOCH": "1759320000", "workflow": "release.yml" }
        })
    }

    fn slsa_v02() -> Value {
        serde_json::json!({
            "_type": "https://in-toto.io/Statement/v1",
            "subject": [
                { "name": "dist/other.bin", "digest": { "sha256": "00" } },
                { "name": "dist/provenance-demo.pyz", "digest": { "sha256": DIGEST } }
            ],
            "predicateType": "https://slsa.dev/provenance/v0.2",
            "predicate": {
                "builder": { "id": "https://github.com/slsa-framework/slsa-github-generator" },
                "buildType": "https://github.com/slsa-framework/slsa-github-generator/generic@v1",
                "invocation": {
                    "parameters": { "ref": "refs/tags/v0.1.0" },
                    "environment": { "github_run_id": 42, "nested": { "SOURCE_DATE_EPOCH": 1759320000 } }
                },
                "metadata": {
                    "buildStartedOn": "2026-10-01T11:58:00Z",
                    "buildFinishedOn": "2026-10-01T12:00:00Z"
                },
                "materials": [
                    { "uri": "git+https://github.com/redoubt-cysec/provenance-template", "digest": { "sha1": "abc123" } }
                ]
            }
        })
    }

    fn envelope(inner: &Value) -> Value {
        serde_json::json!({
            "payloadType": "application/vnd.in-toto+json",
            "payload": base64::engine::general_purpose::STANDARD.encode(inner.to_string()),
            "signatures": []
        })
    }

    #[test]
    fn native_statement_parses() {
        let doc = native().to_string();
        let stmt = ProvenanceStatement::from_document(doc.as_bytes(), "anything").expect("parse");
        assert_eq!(stmt.subject_digest, DIGEST);
        assert_eq!(stmt.builder_id, "https://github.com/actions/runner");
        assert_eq!(stmt.source_date_epoch(), Some("1759320000"));
        assert_eq!(stmt.build_timestamp.to_rfc3339(), "2026-10-01T12:00:00+00:00");
    }

    #[test]
    fn native_statement_with_bad_timestamp_fails() {
        let mut doc = native();
        doc["buildTimestamp"] = Value::String("yesterday".to_owned());
        let err = ProvenanceStatement::from_document(doc.to_string().as_bytes(), "x").unwrap_err();
        assert!(matches!(err, StatementError::InvalidStatement(_)));
    }

    #[test]
    fn slsa_v02_statement_maps_fields() {
        let doc = slsa_v02().to_string();
        let stmt =
            ProvenanceStatement::from_document(doc.as_bytes(), "provenance-demo.pyz").expect("parse");
        assert_eq!(stmt.subject_digest, DIGEST);
        assert_eq!(
            stmt.builder_id,
            "https://github.com/slsa-framework/slsa-github-generator"
        );
        assert_eq!(
            stmt.source_ref,
            "git+https://github.com/redoubt-cysec/provenance-template@abc123"
        );
        assert_eq!(stmt.build_timestamp.to_rfc3339(), "2026-10-01T12:00:00+00:00");
        assert_eq!(stmt.build_params.get("ref").map(String::as_str), Some("refs/tags/v0.1.0"));
        assert_eq!(stmt.build_params.get("github_run_id").map(String::as_str), Some("42"));
        assert_eq!(stmt.source_date_epoch(), Some("1759320000"));
    }

    #[test]
    fn slsa_v1_statement_maps_fields() {
        let doc = serde_json::json!({
            "_type": "https://in-toto.io/Statement/v1",
            "subject": [{ "name": "tool", "digest": { "sha256": DIGEST } }],
            "predicateType": "https://slsa.dev/provenance/v1",
            "predicate": {
                "buildDefinition": {
                    "externalParameters": { "workflow": "release.yml" },
                    "resolvedDependencies": [
                        { "uri": "git+https://example.com/repo@refs/tags/v1", "digest": { "gitCommit": "def456" } }
                    ]
                },
                "runDetails": {
                    "builder": { "id": "https://builder.example/v1" },
                    "metadata": { "startedOn": "2026-10-02T00:00:00Z" }
                }
            }
        })
        .to_string();
        let stmt = ProvenanceStatement::from_document(doc.as_bytes(), "tool").expect("parse");
        assert_eq!(stmt.builder_id, "https://builder.example/v1");
        assert_eq!(stmt.source_ref, "git+https://example.com/repo@refs/tags/v1");
        assert_eq!(stmt.build_params.get("workflow").map(String::as_str), Some("release.yml"));
        assert_eq!(stmt.source_date_epoch(), None);
    }

    #[test]
    fn dsse_envelope_is_unwrapped() {
        let doc = envelope(&slsa_v02()).to_string();
        let stmt =
            ProvenanceStatement::from_document(doc.as_bytes(), "provenance-demo.pyz").expect("parse");
        assert_eq!(stmt.subject_digest, DIGEST);
    }

    #[test]
    fn nested_envelopes_rejected() {
        let doc = envelope(&envelope(&envelope(&native()))).to_string();
        let err = ProvenanceStatement::from_document(doc.as_bytes(), "x").unwrap_err();
        assert!(matches!(err, StatementError::InvalidEnvelope(_)));
    }

    #[test]
    fn bad_envelope_payload_rejected() {
        let doc = serde_json::json!({ "payloadType": "x", "payload": "***" }).to_string();
        let err = ProvenanceStatement::from_document(doc.as_bytes(), "x").unwrap_err();
        assert!(matches!(err, StatementError::InvalidEnvelope(_)));
    }

    #[test]
    fn jsonl_picks_record_covering_artifact() {
        let unrelated = serde_json::json!({
            "_type": "https://in-toto.io/Statement/v1",
            "subject": [{ "name": "sbom.json", "digest": { "sha256": "11" } }],
            "predicateType": "https://spdx.dev/Document",
            "predicate": {}
        });
        let doc = format!("{}\n\n{}\n", unrelated, envelope(&slsa_v02()));
        let stmt =
            ProvenanceStatement::from_document(doc.as_bytes(), "provenance-demo.pyz").expect("parse");
        assert_eq!(stmt.subject_digest, DIGEST);
    }

    #[test]
    fn statement_for_other_artifact_is_not_used() {
        let doc = slsa_v02().to_string();
        let err = ProvenanceStatement::from_document(doc.as_bytes(), "unrelated.bin").unwrap_err();
        assert!(matches!(err, StatementError::NoStatementForArtifact(name) if name == "unrelated.bin"));
    }

    #[test]
    fn in_toto_without_builder_fails() {
        let mut doc = slsa_v02();
        doc["predicate"]
            .as_object_mut()
            .expect("object")
            .remove("builder");
        let err = ProvenanceStatement::from_document(doc.to_string().as_bytes(), "provenance-demo.pyz")
            .unwrap_err();
        assert!(matches!(err, StatementError::MissingField("builder id")));
    }

    #[test]
    fn garbage_is_invalid_json() {
        let err = ProvenanceStatement::from_document(b"{not json", "x").unwrap_err();
        assert!(matches!(err, StatementError::InvalidJson { line: 1, .. }));

        let err = ProvenanceStatement::from_document(b"{}\n{oops\n", "x").unwrap_err();
        assert!(matches!(err, StatementError::InvalidJson { line: 2, .. }));
    }

    #[test]
    fn non_utf8_rejected() {
        assert!(matches!(
            ProvenanceStatement::from_document(&[0xff, 0xfe], "x"),
            Err(StatementError::NotUtf8)
        ));
    }
}
