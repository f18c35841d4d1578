//! Trust bundles: the public keys an installer is configured to trust.
//!
//! A bundle is loaded once and never mutated; share it behind an `Arc`.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AttestError;
use crate::signature::SignatureAlgorithm;
use crate::signer::{decode_spki, pem_to_der};

/// A trusted signing key with an optional validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedKey {
    /// Key id referenced by signature entries.
    pub id: String,
    /// The only algorithm this key may be used with.
    pub algorithm: SignatureAlgorithm,
    /// PEM-encoded SPKI public key.
    pub public_key: String,
    /// Signatures by this key are not accepted before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    /// Signatures by this key are not accepted after this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
}

/// Whether a key may be used at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValidity {
    /// Inside the window.
    Valid,
    /// Before `not_before`.
    NotYetValid(DateTime<Utc>),
    /// After `not_after`.
    Expired(DateTime<Utc>),
}

impl TrustedKey {
    /// Evaluate the validity window at `now`. Both bounds are inclusive.
    pub fn validity_at(&self, now: DateTime<Utc>) -> KeyValidity {
        if let Some(nb) = self.not_before.filter(|nb| now < *nb) {
            return KeyValidity::NotYetValid(nb);
        }
        if let Some(na) = self.not_after.filter(|na| now > *na) {
            return KeyValidity::Expired(na);
        }
        KeyValidity::Valid
    }

    /// The raw public key bytes inside the PEM SPKI wrapper.
    pub fn raw_public_key(&self) -> Result<Vec<u8>, AttestError> {
        let der = pem_to_der(&self.public_key).ok_or_else(|| {
            AttestError::InvalidTrustBundle(format!("key `{}`: invalid PEM public key", self.id))
        })?;
        decode_spki(&der, self.algorithm)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                AttestError::InvalidTrustBundle(format!(
                    "key `{}`: public key is not a {} SPKI",
                    self.id, self.algorithm
                ))
            })
    }
}

#[derive(Deserialize)]
struct TrustBundleFile {
    version: u32,
    keys: Vec<TrustedKey>,
}

#[derive(Serialize)]
struct TrustBundleFileRef<'a> {
    version: u32,
    keys: &'a [TrustedKey],
}

/// An immutable set of trusted keys, indexed by id.
#[derive(Debug, Clone)]
pub struct TrustBundle {
    keys: Vec<TrustedKey>,
}

impl TrustBundle {
    /// The bundle format version this build reads and writes.
    pub const CURRENT_VERSION: u32 = 1;

    /// Build a bundle, validating every key.
    ///
    /// Key ids must be unique, each public key must decode for its
    /// declared algorithm, and `not_before` must not follow `not_after`.
    pub fn new(keys: Vec<TrustedKey>) -> Result<Self, AttestError> {
        let mut seen = HashSet::new();
        for key in &keys {
            if key.id.is_empty() {
                return Err(AttestError::InvalidTrustBundle("key with empty id".to_owned()));
            }
            if !seen.insert(key.id.as_str()) {
                return Err(AttestError::InvalidTrustBundle(format!(
                    "duplicate key id `{}`",
                    key.id
                )));
            }
            key.raw_public_key()?;
            if let (Some(nb), Some(na)) = (key.not_before, key.not_after) {
                if nb > na {
                    return Err(AttestError::InvalidTrustBundle(format!(
                        "key `{}`: notBefore {nb} is after notAfter {na}",
                        key.id
                    )));
                }
            }
        }
        if keys.is_empty() {
            tracing::warn!("trust bundle has no keys; every signature will be untrusted");
        }
        Ok(Self { keys })
    }

    /// Parse a bundle from JSON.
    pub fn from_json(json: &str) -> Result<Self, AttestError> {
        let file: TrustBundleFile = serde_json::from_str(json)?;
        if file.version != Self::CURRENT_VERSION {
            return Err(AttestError::InvalidTrustBundle(format!(
                "unsupported trust bundle version {} (expected {})",
                file.version,
                Self::CURRENT_VERSION
            )));
        }
        Self::new(file.keys)
    }

    /// Load a bundle from a JSON file.
    pub fn load(path: &Path) -> Result<Self, AttestError> {
        let data = std::fs::read_to_string(path)?;
        let bundle = Self::from_json(&data)?;
        tracing::info!(path = %path.display(), keys = bundle.len(), "loaded trust bundle");
        Ok(bundle)
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String, AttestError> {
        Ok(serde_json::to_string_pretty(&TrustBundleFileRef {
            version: Self::CURRENT_VERSION,
            keys: &self.keys,
        })?)
    }

    /// Look up a key by id.
    pub fn key(&self, id: &str) -> Option<&TrustedKey> {
        self.keys.iter().find(|k| k.id == id)
    }

    /// All keys, in file order.
    pub fn keys(&self) -> &[TrustedKey] {
        &self.keys
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the bundle trusts nothing.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{LocalSigner, der_to_pem, encode_ed25519_spki};
    use chrono::Duration;

    fn key(id: &str) -> TrustedKey {
        TrustedKey {
            id: id.to_owned(),
            algorithm: SignatureAlgorithm::Ed25519,
            public_key: der_to_pem(&encode_ed25519_spki(&[9u8; 32]), "PUBLIC KEY"),
            not_before: None,
            not_after: None,
        }
    }

    #[test]
    fn parses_bundle_json() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let signer = LocalSigner::generate(
            &tmp.path().join("k.pem"),
            SignatureAlgorithm::EcdsaP256Sha256,
            "release-2026",
        )
        .expect("gen");
        let json = serde_json::json!({
            "version": 1,
            "keys": [{
                "id": "release-2026",
                "algorithm": "ecdsa-p256-sha256",
                "publicKey": signer.public_key_pem(),
                "notAfter": "2030-01-01T00:00:00Z"
            }]
        })
        .to_string();

        let bundle = TrustBundle::from_json(&json).expect("parse");
        assert_eq!(bundle.len(), 1);
        let k = bundle.key("release-2026").expect("key present");
        assert!(k.not_before.is_none());
        assert!(k.not_after.is_some());
        assert!(bundle.key("other").is_none());
    }

    #[test]
    fn json_round_trip_preserves_keys() {
        let bundle = TrustBundle::new(vec![key("a"), key("b")]).expect("bundle");
        let json = bundle.to_json_pretty().expect("serialize");
        let again = TrustBundle::from_json(&json).expect("parse");
        assert_eq!(again.keys(), bundle.keys());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = TrustBundle::new(vec![key("a"), key("a")]).unwrap_err();
        assert!(err.to_string().contains("duplicate key id"));
    }

    #[test]
    fn wrong_version_rejected() {
        let err = TrustBundle::from_json(r#"{"version": 2, "keys": []}"#).unwrap_err();
        assert!(matches!(err, AttestError::InvalidTrustBundle(_)));
    }

    #[test]
    fn undecodable_key_rejected() {
        let mut k = key("a");
        k.public_key = "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n".to_owned();
        assert!(TrustBundle::new(vec![k]).is_err());
    }

    #[test]
    fn algorithm_mismatch_rejected() {
        let mut k = key("a");
        k.algorithm = SignatureAlgorithm::EcdsaP256Sha256;
        assert!(TrustBundle::new(vec![k]).is_err());
    }

    #[test]
    fn inverted_window_rejected() {
        let now = Utc::now();
        let mut k = key("a");
        k.not_before = Some(now);
        k.not_after = Some(now - Duration::days(1));
        assert!(TrustBundle::new(vec![k]).is_err());
    }

    #[test]
    fn validity_window() {
        let now = Utc::now();
        let mut k = key("a");
        assert_eq!(k.validity_at(now), KeyValidity::Valid);

        k.not_before = Some(now + Duration::hours(1));
        assert!(matches!(k.validity_at(now), KeyValidity::NotYetValid(_)));

        k.not_before = Some(now - Duration::hours(2));
        k.not_after = Some(now - Duration::hours(1));
        assert!(matches!(k.validity_at(now), KeyValidity::Expired(_)));

        k.not_after = Some(now);
        assert_eq!(k.validity_at(now), KeyValidity::Valid, "bounds are inclusive");
    }

    #[test]
    fn empty_bundle_is_allowed() {
        let bundle = TrustBundle::from_json(r#"{"version": 1, "keys": []}"#).expect("parse");
        assert!(bundle.is_empty());
    }
}
