//! Detached signature verification over manifest and envelope bytes.
//!
//! The signature covers the raw manifest bytes as fetched, never a parsed
//! or re-rendered form. DSSE envelopes around provenance are checked the
//! same way over their pre-authentication encoding. Keys come only from the caller's [`TrustBundle`];
//! a cryptographically valid signature by an unknown key is still refused.

use aws_lc_rs::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use base64::Engine;
use chrono::{DateTime, Utc};
use redoubt_attest::{
    DetachedSignature, Envelope, KeyValidity, SignatureAlgorithm, SignatureEntry, TrustBundle,
    TrustedKey,
};

use crate::error::Rejection;

/// The key that vouched for a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSigner {
    /// Trust bundle key id.
    pub key_id: String,
    /// Algorithm of the accepted signature.
    pub algorithm: SignatureAlgorithm,
}

/// Outcome of signature verification.
pub type SignatureResult = Result<VerifiedSigner, Rejection>;

fn verification_algorithm(
    algorithm: SignatureAlgorithm,
) -> &'static dyn VerificationAlgorithm {
    match algorithm {
        SignatureAlgorithm::EcdsaP256Sha256 => &signature::ECDSA_P256_SHA256_ASN1,
        SignatureAlgorithm::Ed25519 => &signature::ED25519,
    }
}

/// Verify `signature` over `manifest_bytes` against `trust` at `now`.
///
/// Verified when any entry verifies under a trusted key that is valid at
/// `now`. Otherwise the most specific failure is returned, preferring
/// `SignatureInvalid` over `Expired` over `UntrustedSigner`.
pub fn verify(
    manifest_bytes: &[u8],
    signature: &DetachedSignature,
    trust: &TrustBundle,
    now: DateTime<Utc>,
) -> SignatureResult {
    if signature.signatures.is_empty() {
        return Err(Rejection::SignatureInvalid {
            reason: "signature file has no entries".to_owned(),
        });
    }

    let attempts = signature.signatures.iter().enumerate().map(|(idx, entry)| {
        let attempt = verify_entry(manifest_bytes, entry, trust, now);
        if let Err(rejection) = &attempt {
            tracing::debug!(entry = idx, key_id = %entry.key_id, %rejection, "signature entry refused");
        }
        attempt
    });
    let signer = best_attempt(attempts)?;
    tracing::info!(
        key_id = %signer.key_id,
        algorithm = %signer.algorithm,
        "manifest signature verified"
    );
    Ok(signer)
}

/// Verify a DSSE envelope's signatures over its PAE against `trust`.
///
/// DSSE entries name no algorithm, so each is checked with the algorithm
/// its trusted key is registered for. An entry without a key id is tried
/// against every key in the bundle. Failures rank as in [`verify`].
pub fn verify_envelope(
    envelope: &Envelope,
    trust: &TrustBundle,
    now: DateTime<Utc>,
) -> SignatureResult {
    let message = envelope
        .signing_input()
        .map_err(|e| Rejection::SignatureInvalid { reason: e.to_string() })?;
    if envelope.signatures.is_empty() {
        return Err(Rejection::SignatureInvalid {
            reason: "envelope has no signatures".to_owned(),
        });
    }

    let attempts = envelope.signatures.iter().map(|entry| {
        let attempt = if entry.keyid.is_empty() {
            best_attempt(
                trust
                    .keys()
                    .iter()
                    .map(|key| check_with_key(key, key.algorithm, &message, &entry.sig, now)),
            )
        } else {
            trust
                .key(&entry.keyid)
                .ok_or_else(|| Rejection::UntrustedSigner {
                    key_id: entry.keyid.clone(),
                })
                .and_then(|key| check_with_key(key, key.algorithm, &message, &entry.sig, now))
        };
        if let Err(rejection) = &attempt {
            tracing::debug!(key_id = %entry.keyid, %rejection, "envelope signature refused");
        }
        attempt
    });
    let signer = best_attempt(attempts)?;
    tracing::info!(key_id = %signer.key_id, "provenance envelope signature verified");
    Ok(signer)
}

/// The first success, or else the highest-ranked failure.
fn best_attempt(attempts: impl IntoIterator<Item = SignatureResult>) -> SignatureResult {
    let mut worst: Option<Rejection> = None;
    for attempt in attempts {
        match attempt {
            Ok(signer) => return Ok(signer),
            Err(rejection) => {
                if worst.as_ref().is_none_or(|w| precedence(&rejection) > precedence(w)) {
                    worst = Some(rejection);
                }
            }
        }
    }
    Err(worst.unwrap_or_else(|| Rejection::SignatureInvalid {
        reason: "no signature entry verified".to_owned(),
    }))
}

const fn precedence(rejection: &Rejection) -> u8 {
    match rejection {
        Rejection::SignatureInvalid { .. } => 3,
        Rejection::Expired { .. } => 2,
        Rejection::UntrustedSigner { .. } => 1,
        _ => 0,
    }
}

fn verify_entry(
    manifest_bytes: &[u8],
    entry: &SignatureEntry,
    trust: &TrustBundle,
    now: DateTime<Utc>,
) -> SignatureResult {
    let algorithm: SignatureAlgorithm = entry
        .algorithm
        .parse()
        .map_err(|reason| Rejection::SignatureInvalid { reason })?;

    let Some(key) = trust.key(&entry.key_id) else {
        return Err(Rejection::UntrustedSigner {
            key_id: entry.key_id.clone(),
        });
    };
    check_with_key(key, algorithm, manifest_bytes, &entry.signature, now)
}

/// Check a base64 signature over `message` under one trusted key.
fn check_with_key(
    key: &TrustedKey,
    algorithm: SignatureAlgorithm,
    message: &[u8],
    signature_b64: &str,
    now: DateTime<Utc>,
) -> SignatureResult {
    let invalid = |reason: String| Rejection::SignatureInvalid { reason };

    if key.algorithm != algorithm {
        return Err(invalid(format!(
            "key `{}` is registered for {}, entry uses {algorithm}",
            key.id, key.algorithm
        )));
    }

    if signature_b64.is_empty() {
        return Err(invalid("empty signature".to_owned()));
    }
    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|e| invalid(format!("invalid base64 signature: {e}")))?;

    let raw_key = key.raw_public_key().map_err(|e| invalid(e.to_string()))?;
    UnparsedPublicKey::new(verification_algorithm(algorithm), &raw_key)
        .verify(message, &sig_bytes)
        .map_err(|_| invalid(format!("{algorithm} verification failed for key `{}`", key.id)))?;

    match key.validity_at(now) {
        KeyValidity::Valid => Ok(VerifiedSigner {
            key_id: key.id.clone(),
            algorithm,
        }),
        KeyValidity::NotYetValid(nb) => Err(Rejection::Expired {
            key_id: key.id.clone(),
            detail: format!("not valid before {nb}"),
        }),
        KeyValidity::Expired(na) => Err(Rejection::Expired {
            key_id: key.id.clone(),
            detail: format!("expired at {na}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use redoubt_attest::signer::LocalSigner;
    use redoubt_attest::envelope::IN_TOTO_PAYLOAD_TYPE;

    const MANIFEST: &[u8] =
        b"e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855  hello.bin\n";

    struct Fixture {
        _dir: tempfile::TempDir,
        signer: LocalSigner,
    }

    fn signer(algorithm: SignatureAlgorithm, key_id: &str) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let signer =
            LocalSigner::generate(&dir.path().join("key.pem"), algorithm, key_id).expect("keygen");
        Fixture { _dir: dir, signer }
    }

    fn bundle(keys: Vec<TrustedKey>) -> TrustBundle {
        TrustBundle::new(keys).expect("bundle")
    }

    #[test]
    fn ecdsa_signature_verifies() {
        let f = signer(SignatureAlgorithm::EcdsaP256Sha256, "release-2026");
        let sig = f.signer.sign_detached(MANIFEST).expect("sign");
        let trust = bundle(vec![f.signer.trusted_key(None, None)]);

        let verified = verify(MANIFEST, &sig, &trust, Utc::now()).expect("verify");
        assert_eq!(verified.key_id, "release-2026");
        assert_eq!(verified.algorithm, SignatureAlgorithm::EcdsaP256Sha256);
    }

    #[test]
    fn ed25519_signature_verifies() {
        let f = signer(SignatureAlgorithm::Ed25519, "ed");
        let sig = f.signer.sign_detached(MANIFEST).expect("sign");
        let trust = bundle(vec![f.signer.trusted_key(None, None)]);
        assert!(verify(MANIFEST, &sig, &trust, Utc::now()).is_ok());
    }

    #[test]
    fn valid_signature_by_unknown_key_is_untrusted() {
        let f = signer(SignatureAlgorithm::EcdsaP256Sha256, "stranger");
        let other = signer(SignatureAlgorithm::EcdsaP256Sha256, "release");
        let sig = f.signer.sign_detached(MANIFEST).expect("sign");
        let trust = bundle(vec![other.signer.trusted_key(None, None)]);

        let err = verify(MANIFEST, &sig, &trust, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            Rejection::UntrustedSigner {
                key_id: "stranger".to_owned()
            }
        );
    }

    #[test]
    fn any_byte_change_invalidates() {
        let f = signer(SignatureAlgorithm::EcdsaP256Sha256, "k");
        let sig = f.signer.sign_detached(MANIFEST).expect("sign");
        let trust = bundle(vec![f.signer.trusted_key(None, None)]);

        let mut tampered = MANIFEST.to_vec();
        tampered[0] = b'f';
        let err = verify(&tampered, &sig, &trust, Utc::now()).unwrap_err();
        assert!(matches!(err, Rejection::SignatureInvalid { .. }));

        // A trailing newline is part of the signed bytes.
        let err = verify(&MANIFEST[..MANIFEST.len() - 1], &sig, &trust, Utc::now()).unwrap_err();
        assert!(matches!(err, Rejection::SignatureInvalid { .. }));
    }

    #[test]
    fn key_by_same_id_but_other_material_is_invalid() {
        let real = signer(SignatureAlgorithm::EcdsaP256Sha256, "release");
        let impostor = signer(SignatureAlgorithm::EcdsaP256Sha256, "release");
        let sig = impostor.signer.sign_detached(MANIFEST).expect("sign");
        let trust = bundle(vec![real.signer.trusted_key(None, None)]);

        let err = verify(MANIFEST, &sig, &trust, Utc::now()).unwrap_err();
        assert!(matches!(err, Rejection::SignatureInvalid { .. }));
    }

    #[test]
    fn expired_and_not_yet_valid_keys() {
        let f = signer(SignatureAlgorithm::Ed25519, "k");
        let sig = f.signer.sign_detached(MANIFEST).expect("sign");
        let now = Utc::now();

        let trust = bundle(vec![f.signer.trusted_key(None, Some(now - Duration::days(1)))]);
        let err = verify(MANIFEST, &sig, &trust, now).unwrap_err();
        assert!(matches!(&err, Rejection::Expired { detail, .. } if detail.starts_with("expired")));

        let trust = bundle(vec![f.signer.trusted_key(Some(now + Duration::days(1)), None)]);
        let err = verify(MANIFEST, &sig, &trust, now).unwrap_err();
        assert!(matches!(&err, Rejection::Expired { detail, .. } if detail.starts_with("not valid")));
    }

    #[test]
    fn unsupported_algorithm_is_invalid() {
        let f = signer(SignatureAlgorithm::Ed25519, "k");
        let mut sig = f.signer.sign_detached(MANIFEST).expect("sign");
        sig.signatures[0].algorithm = "rsa-pss-sha512".to_owned();
        let trust = bundle(vec![f.signer.trusted_key(None, None)]);

        let err = verify(MANIFEST, &sig, &trust, Utc::now()).unwrap_err();
        assert!(matches!(err, Rejection::SignatureInvalid { .. }));
    }

    #[test]
    fn algorithm_must_match_trusted_key() {
        let f = signer(SignatureAlgorithm::Ed25519, "k");
        let mut sig = f.signer.sign_detached(MANIFEST).expect("sign");
        sig.signatures[0].algorithm = "ecdsa-p256-sha256".to_owned();
        let trust = bundle(vec![f.signer.trusted_key(None, None)]);

        let err = verify(MANIFEST, &sig, &trust, Utc::now()).unwrap_err();
        assert!(matches!(err, Rejection::SignatureInvalid { reason } if reason.contains("registered for")));
    }

    #[test]
    fn empty_signature_file_is_invalid() {
        let f = signer(SignatureAlgorithm::Ed25519, "k");
        let trust = bundle(vec![f.signer.trusted_key(None, None)]);
        let err = verify(MANIFEST, &DetachedSignature::default(), &trust, Utc::now()).unwrap_err();
        assert!(matches!(err, Rejection::SignatureInvalid { .. }));
    }

    #[test]
    fn bad_base64_is_invalid() {
        let f = signer(SignatureAlgorithm::Ed25519, "k");
        let mut sig = f.signer.sign_detached(MANIFEST).expect("sign");
        sig.signatures[0].signature = "%%%".to_owned();
        let trust = bundle(vec![f.signer.trusted_key(None, None)]);
        let err = verify(MANIFEST, &sig, &trust, Utc::now()).unwrap_err();
        assert!(matches!(err, Rejection::SignatureInvalid { reason } if reason.contains("base64")));
    }

    #[test]
    fn any_good_entry_wins() {
        let stranger = signer(SignatureAlgorithm::Ed25519, "stranger");
        let trusted = signer(SignatureAlgorithm::EcdsaP256Sha256, "release");
        let mut sig = stranger.signer.sign_detached(MANIFEST).expect("sign");
        sig.signatures
            .extend(trusted.signer.sign_detached(MANIFEST).expect("sign").signatures);
        let trust = bundle(vec![trusted.signer.trusted_key(None, None)]);

        let verified = verify(MANIFEST, &sig, &trust, Utc::now()).expect("verify");
        assert_eq!(verified.key_id, "release");
    }

    #[test]
    fn most_specific_failure_is_reported() {
        let now = Utc::now();
        let stranger = signer(SignatureAlgorithm::Ed25519, "stranger");
        let old = signer(SignatureAlgorithm::Ed25519, "old");
        let forged = signer(SignatureAlgorithm::Ed25519, "forged");
        let real_forged = signer(SignatureAlgorithm::Ed25519, "forged");

        let trust = bundle(vec![
            old.signer.trusted_key(None, Some(now - Duration::days(30))),
            real_forged.signer.trusted_key(None, None),
        ]);

        let untrusted = stranger.signer.sign_detached(MANIFEST).expect("sign").signatures;
        let expired = old.signer.sign_detached(MANIFEST).expect("sign").signatures;
        let invalid = forged.signer.sign_detached(MANIFEST).expect("sign").signatures;

        let sig = DetachedSignature {
            signatures: [untrusted.clone(), expired.clone()].concat(),
        };
        assert!(matches!(
            verify(MANIFEST, &sig, &trust, now).unwrap_err(),
            Rejection::Expired { .. }
        ));

        let sig = DetachedSignature {
            signatures: [expired, untrusted, invalid].concat(),
        };
        assert!(matches!(
            verify(MANIFEST, &sig, &trust, now).unwrap_err(),
            Rejection::SignatureInvalid { .. }
        ));
    }

    #[test]
    fn signed_envelope_verifies() {
        let f = signer(SignatureAlgorithm::EcdsaP256Sha256, "prov");
        let env = f.signer.sign_envelope(IN_TOTO_PAYLOAD_TYPE, b"{}").expect("sign");
        let trust = bundle(vec![f.signer.trusted_key(None, None)]);
        let verified = verify_envelope(&env, &trust, Utc::now()).expect("verify");
        assert_eq!(verified.key_id, "prov");

        let mut keyless = env;
        keyless.signatures[0].keyid.clear();
        assert!(verify_envelope(&keyless, &trust, Utc::now()).is_ok());
    }

    #[test]
    fn forged_envelope_is_refused() {
        let f = signer(SignatureAlgorithm::Ed25519, "prov");
        let trust = bundle(vec![f.signer.trusted_key(None, None)]);

        let mut forged = Envelope::wrap(IN_TOTO_PAYLOAD_TYPE, b"{\"evil\":true}");
        assert!(matches!(
            verify_envelope(&forged, &trust, Utc::now()),
            Err(Rejection::SignatureInvalid { reason }) if reason.contains("no signatures")
        ));

        forged.signatures.push(redoubt_attest::EnvelopeSignature {
            keyid: String::new(),
            sig: "AAAA".to_owned(),
        });
        assert!(matches!(
            verify_envelope(&forged, &trust, Utc::now()),
            Err(Rejection::SignatureInvalid { .. })
        ));

        // Valid signature, swapped payload.
        let mut swapped = f.signer.sign_envelope(IN_TOTO_PAYLOAD_TYPE, b"{}").expect("sign");
        swapped.payload = forged.payload.clone();
        assert!(matches!(
            verify_envelope(&swapped, &trust, Utc::now()),
            Err(Rejection::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn envelope_payload_type_is_signed() {
        let f = signer(SignatureAlgorithm::Ed25519, "prov");
        let trust = bundle(vec![f.signer.trusted_key(None, None)]);
        let mut env = f.signer.sign_envelope(IN_TOTO_PAYLOAD_TYPE, b"{}").expect("sign");
        env.payload_type = "text/plain".to_owned();
        assert!(verify_envelope(&env, &trust, Utc::now()).is_err());
    }

    #[test]
    fn envelope_by_unknown_or_expired_key() {
        let now = Utc::now();
        let stranger = signer(SignatureAlgorithm::Ed25519, "stranger");
        let old = signer(SignatureAlgorithm::Ed25519, "old");
        let trust = bundle(vec![old.signer.trusted_key(None, Some(now - Duration::days(1)))]);

        let env = stranger.signer.sign_envelope(IN_TOTO_PAYLOAD_TYPE, b"{}").expect("sign");
        assert_eq!(
            verify_envelope(&env, &trust, now),
            Err(Rejection::UntrustedSigner {
                key_id: "stranger".to_owned()
            })
        );

        let env = old.signer.sign_envelope(IN_TOTO_PAYLOAD_TYPE, b"{}").expect("sign");
        assert!(matches!(
            verify_envelope(&env, &trust, now),
            Err(Rejection::Expired { .. })
        ));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// Flipping any single byte of the manifest breaks the signature.
            #[test]
            fn single_byte_tamper_always_fails(
                flip_idx in any::<prop::sample::Index>(),
                mask in 1u8..=255,
            ) {
                let f = signer(SignatureAlgorithm::Ed25519, "k");
                let sig = f.signer.sign_detached(MANIFEST).expect("sign");
                let trust = bundle(vec![f.signer.trusted_key(None, None)]);

                let mut tampered = MANIFEST.to_vec();
                let idx = flip_idx.index(tampered.len());
                tampered[idx] ^= mask;

                let result = verify(&tampered, &sig, &trust, Utc::now());
                prop_assert!(
                    matches!(result, Err(Rejection::SignatureInvalid { .. })),
                    "tampered manifest must not verify: {result:?}"
                );
            }
        }
    }
}
