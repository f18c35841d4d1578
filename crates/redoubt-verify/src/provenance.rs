//! Provenance attestation: binding an artifact to its build origin.
//!
//! A statement only counts once something vouches for the document it came
//! from; see [`ProvenanceOrigin`].

use chrono::{DateTime, Utc};
use redoubt_attest::{Digest, ProvenanceStatement};
use serde::Serialize;

use crate::error::Rejection;
use crate::policy::{PolicyResult, ProvenancePolicy};
use crate::signature::VerifiedSigner;

/// What an accepted statement established.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationReport {
    /// Builder that produced the artifact.
    pub builder_id: String,
    /// Source the artifact was built from.
    pub source_ref: String,
    /// When it was built.
    pub build_timestamp: DateTime<Utc>,
    /// Every rule that was evaluated, in order. All passed.
    pub results: Vec<PolicyResult>,
}

/// What vouches for a provenance document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvenanceOrigin {
    /// Listed in the signed manifest, with a matching digest.
    Manifest,
    /// Carried in a DSSE envelope a trusted key signed.
    Envelope(VerifiedSigner),
    /// Nothing does.
    Unauthenticated {
        /// Why neither applies.
        reason: String,
    },
}

/// Outcome of attestation.
pub type AttestationResult = Result<AttestationReport, Rejection>;

/// Check `statement` against the artifact digest and `policy` at `now`.
///
/// Checks run in a fixed order (subject, builder, timestamp, then the
/// optional source-ref and `SOURCE_DATE_EPOCH` rules); the first failure
/// is returned.
pub fn attest(
    statement: &ProvenanceStatement,
    artifact_digest: &Digest,
    policy: &ProvenancePolicy,
    now: DateTime<Utc>,
) -> AttestationResult {
    let expected = artifact_digest.to_hex();
    // Exact comparison: no case folding or trimming.
    if statement.subject_digest != expected {
        return Err(Rejection::ProvenanceSubjectMismatch {
            expected,
            actual: statement.subject_digest.clone(),
        });
    }

    let mut results = vec![PolicyResult {
        rule: "subjectDigest".to_owned(),
        passed: true,
        message: format!("statement covers {expected}"),
    }];
    results.push(policy.check_builder(&statement.builder_id)?);
    results.push(policy.check_timestamp(statement.build_timestamp, now)?);
    results.extend(policy.check_source_ref(&statement.source_ref)?);
    results.extend(policy.check_source_date_epoch(&statement.build_params)?);

    tracing::info!(
        builder_id = %statement.builder_id,
        source_ref = %statement.source_ref,
        rules = results.len(),
        "provenance accepted"
    );

    Ok(AttestationReport {
        builder_id: statement.builder_id.clone(),
        source_ref: statement.source_ref.clone(),
        build_timestamp: statement.build_timestamp,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use redoubt_attest::digest_bytes;
    use std::collections::BTreeMap;

    const BUILDER: &str = "https://github.com/actions/runner";

    fn statement(digest: &Digest, built: DateTime<Utc>) -> ProvenanceStatement {
        ProvenanceStatement {
            subject_digest: digest.to_hex(),
            builder_id: BUILDER.to_owned(),
            source_ref: "git+https://github.com/redoubt-cysec/tool@abc".to_owned(),
            build_timestamp: built,
            build_params: BTreeMap::new(),
        }
    }

    fn policy() -> ProvenancePolicy {
        ProvenancePolicy::new(vec![BUILDER.to_owned()], 86_400)
    }

    #[test]
    fn accepted_statement_lists_passed_rules() {
        let now = Utc::now();
        let d = digest_bytes(b"artifact");
        let report = attest(&statement(&d, now), &d, &policy(), now).expect("attest");
        assert_eq!(report.builder_id, BUILDER);
        let rules: Vec<_> = report.results.iter().map(|r| r.rule.as_str()).collect();
        assert_eq!(rules, ["subjectDigest", "allowedBuilders", "maxAgeSecs"]);
        assert!(report.results.iter().all(|r| r.passed));
    }

    #[test]
    fn subject_mismatch_rejected() {
        let now = Utc::now();
        let stmt = statement(&digest_bytes(b"other"), now);
        let d = digest_bytes(b"artifact");
        let err = attest(&stmt, &d, &policy(), now).unwrap_err();
        assert_eq!(
            err,
            Rejection::ProvenanceSubjectMismatch {
                expected: d.to_hex(),
                actual: stmt.subject_digest,
            }
        );
    }

    #[test]
    fn subject_comparison_is_case_sensitive() {
        let now = Utc::now();
        let d = digest_bytes(b"artifact");
        let mut stmt = statement(&d, now);
        stmt.subject_digest = stmt.subject_digest.to_uppercase();
        assert!(matches!(
            attest(&stmt, &d, &policy(), now),
            Err(Rejection::ProvenanceSubjectMismatch { .. })
        ));
    }

    #[test]
    fn subject_is_checked_before_builder() {
        let now = Utc::now();
        let mut stmt = statement(&digest_bytes(b"other"), now);
        stmt.builder_id = "https://evil.example".to_owned();
        assert!(matches!(
            attest(&stmt, &digest_bytes(b"artifact"), &policy(), now),
            Err(Rejection::ProvenanceSubjectMismatch { .. })
        ));
    }

    #[test]
    fn builder_and_age_enforced() {
        let now = Utc::now();
        let d = digest_bytes(b"artifact");

        let mut stmt = statement(&d, now);
        stmt.builder_id = "https://evil.example".to_owned();
        assert!(matches!(
            attest(&stmt, &d, &policy(), now),
            Err(Rejection::BuilderNotAllowed { .. })
        ));

        let stmt = statement(&d, now - Duration::days(2));
        assert!(matches!(
            attest(&stmt, &d, &policy(), now),
            Err(Rejection::ProvenanceStale { .. })
        ));

        let stmt = statement(&d, now + Duration::hours(1));
        assert!(matches!(
            attest(&stmt, &d, &policy(), now),
            Err(Rejection::ProvenanceFromFuture { .. })
        ));
    }

    #[test]
    fn optional_rules_apply_when_configured() {
        let now = Utc::now();
        let d = digest_bytes(b"artifact");
        let mut p = policy();
        p.require_source_date_epoch = true;

        let mut stmt = statement(&d, now);
        assert!(matches!(
            attest(&stmt, &d, &p, now),
            Err(Rejection::ProvenancePolicyViolation { rule, .. }) if rule == "requireSourceDateEpoch"
        ));

        stmt.build_params
            .insert("SOURCE_DATE_EPOCH".to_owned(), "1759320000".to_owned());
        let report = attest(&stmt, &d, &p, now).expect("attest");
        assert_eq!(report.results.len(), 4);
    }
}
