//! Provenance policy.
//!
//! A `ProvenancePolicy` is loaded from JSON once and shared read-only. Each
//! check either records a passing [`PolicyResult`] or returns the specific
//! [`Rejection`] for the rule that failed; there is no partial acceptance.
//!
//! Builder and source-ref patterns match exactly, or as a prefix when they
//! end in `*`. A bare `*` matches anything.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Rejection, VerificationError};
use crate::provenance::ProvenanceOrigin;

const DEFAULT_MAX_FUTURE_SKEW_SECS: u64 = 300;

const fn default_max_future_skew_secs() -> u64 {
    DEFAULT_MAX_FUTURE_SKEW_SECS
}

const fn default_true() -> bool {
    true
}

fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Result of a single policy rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyResult {
    /// Name of the rule that was evaluated.
    pub rule: String,
    /// Whether the rule passed.
    pub passed: bool,
    /// Human-readable description of the outcome.
    pub message: String,
}

impl PolicyResult {
    fn pass(rule: &str, message: String) -> Self {
        Self {
            rule: rule.to_owned(),
            passed: true,
            message,
        }
    }
}

/// Rules a provenance statement must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProvenancePolicy {
    /// Builder id patterns. Empty rejects every builder.
    pub allowed_builders: Vec<String>,
    /// Maximum age of a build, in seconds.
    pub max_age_secs: u64,
    /// How far in the future a build timestamp may be.
    #[serde(default = "default_max_future_skew_secs")]
    pub max_future_skew_secs: u64,
    /// Source ref patterns; absent means any source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_source_refs: Option<Vec<String>>,
    /// Require a numeric `SOURCE_DATE_EPOCH` build parameter.
    #[serde(default)]
    pub require_source_date_epoch: bool,
    /// Accept provenance only if the signed manifest lists it or a trusted
    /// key signed its DSSE envelope.
    #[serde(default = "default_true")]
    pub require_authenticated_provenance: bool,
}

impl ProvenancePolicy {
    /// A policy allowing `builders`, with defaults for everything else.
    pub fn new(allowed_builders: Vec<String>, max_age_secs: u64) -> Self {
        Self {
            allowed_builders,
            max_age_secs,
            max_future_skew_secs: DEFAULT_MAX_FUTURE_SKEW_SECS,
            allowed_source_refs: None,
            require_source_date_epoch: false,
            require_authenticated_provenance: true,
        }
    }

    /// Parse and validate a policy from JSON.
    pub fn from_json(json: &str) -> Result<Self, VerificationError> {
        let policy: Self = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load a policy from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, VerificationError> {
        let data = std::fs::read_to_string(path)?;
        let policy = Self::from_json(&data)?;
        tracing::info!(
            path = %path.display(),
            builders = policy.allowed_builders.len(),
            max_age_secs = policy.max_age_secs,
            "loaded provenance policy"
        );
        Ok(policy)
    }

    /// Reject values that make the policy meaningless.
    pub fn validate(&self) -> Result<(), VerificationError> {
        if self.max_age_secs == 0 {
            return Err(VerificationError::InvalidPolicy(
                "maxAgeSecs must be positive".to_owned(),
            ));
        }
        if self.allowed_builders.iter().any(String::is_empty) {
            return Err(VerificationError::InvalidPolicy(
                "allowedBuilders contains an empty pattern".to_owned(),
            ));
        }
        if self.allowed_builders.is_empty() {
            tracing::warn!("policy allows no builders; every release will be rejected");
        }
        Ok(())
    }

    /// Check the builder id against the allow-list.
    pub fn check_builder(&self, builder_id: &str) -> Result<PolicyResult, Rejection> {
        match self
            .allowed_builders
            .iter()
            .find(|p| wildcard_match(p, builder_id))
        {
            Some(pattern) => Ok(PolicyResult::pass(
                "allowedBuilders",
                format!("builder '{builder_id}' matches '{pattern}'"),
            )),
            None => Err(Rejection::BuilderNotAllowed {
                builder_id: builder_id.to_owned(),
            }),
        }
    }

    /// Check that `built_at` is neither stale nor too far in the future.
    ///
    /// A build exactly `maxAgeSecs` old passes; a millisecond more does not.
    pub fn check_timestamp(
        &self,
        built_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<PolicyResult, Rejection> {
        let age = now.signed_duration_since(built_at);
        if -age > seconds(self.max_future_skew_secs) {
            return Err(Rejection::ProvenanceFromFuture {
                built_at,
                max_skew_secs: self.max_future_skew_secs,
            });
        }
        if age > seconds(self.max_age_secs) {
            return Err(Rejection::ProvenanceStale {
                built_at,
                max_age_secs: self.max_age_secs,
            });
        }
        Ok(PolicyResult::pass(
            "maxAgeSecs",
            format!("built {}s ago, limit {}s", age.num_seconds(), self.max_age_secs),
        ))
    }

    /// Check how the provenance document was vouched for.
    ///
    /// Unauthenticated documents pass only when the policy allows them, and
    /// then no result is recorded.
    pub fn check_origin(
        &self,
        document: &str,
        origin: &ProvenanceOrigin,
    ) -> Result<Option<PolicyResult>, Rejection> {
        let rule = "requireAuthenticatedProvenance";
        match origin {
            ProvenanceOrigin::Manifest => Ok(Some(PolicyResult::pass(
                rule,
                format!("'{document}' is listed in the signed manifest"),
            ))),
            ProvenanceOrigin::Envelope(signer) => Ok(Some(PolicyResult::pass(
                rule,
                format!("'{document}' is signed by `{}`", signer.key_id),
            ))),
            ProvenanceOrigin::Unauthenticated { reason } if self.require_authenticated_provenance => {
                Err(Rejection::ProvenanceUnauthenticated {
                    document: document.to_owned(),
                    reason: reason.clone(),
                })
            }
            ProvenanceOrigin::Unauthenticated { reason } => {
                tracing::warn!(document, %reason, "accepting unauthenticated provenance");
                Ok(None)
            }
        }
    }

    /// Check the source ref, if the policy restricts it.
    pub fn check_source_ref(&self, source_ref: &str) -> Result<Option<PolicyResult>, Rejection> {
        let Some(allowed) = &self.allowed_source_refs else {
            return Ok(None);
        };
        if allowed.iter().any(|p| wildcard_match(p, source_ref)) {
            Ok(Some(PolicyResult::pass(
                "allowedSourceRefs",
                format!("source '{source_ref}' is allowed"),
            )))
        } else {
            Err(Rejection::ProvenancePolicyViolation {
                rule: "allowedSourceRefs".to_owned(),
                detail: format!("source '{source_ref}' is not in allowed list: {allowed:?}"),
            })
        }
    }

    /// Check the reproducible-build epoch, if the policy requires it.
    pub fn check_source_date_epoch(
        &self,
        build_params: &BTreeMap<String, String>,
    ) -> Result<Option<PolicyResult>, Rejection> {
        if !self.require_source_date_epoch {
            return Ok(None);
        }
        let rule = "requireSourceDateEpoch";
        match build_params.get(redoubt_attest::statement::SOURCE_DATE_EPOCH) {
            Some(v) if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) => Ok(Some(
                PolicyResult::pass(rule, format!("SOURCE_DATE_EPOCH={v}")),
            )),
            Some(v) => Err(Rejection::ProvenancePolicyViolation {
                rule: rule.to_owned(),
                detail: format!("SOURCE_DATE_EPOCH '{v}' is not a unix timestamp"),
            }),
            None => Err(Rejection::ProvenancePolicyViolation {
                rule: rule.to_owned(),
                detail: "SOURCE_DATE_EPOCH missing from build parameters".to_owned(),
            }),
        }
    }
}

/// Match `value` against `pattern`: `*` matches anything, a trailing `*`
/// is a prefix match, anything else must be equal.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    pattern
        .strip_suffix('*')
        .map_or_else(|| pattern == value, |prefix| value.starts_with(prefix))
}
