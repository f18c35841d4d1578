//! Release signing: keys, manifests, and detached signatures.
//!
//! This is the publisher side of the pipeline. It produces the
//! `SHA256SUMS` manifest, its detached signature, and signed DSSE
//! envelopes for provenance published outside the manifest. Keys are ECDSA P-256
//! or Ed25519, backed by `aws-lc-rs`, and stored on disk as PEM-wrapped
//! PKCS#8 with mode `0o600`.

use std::path::{Path, PathBuf};

use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, Ed25519KeyPair, KeyPair};
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::digest::digest_file;
use crate::envelope::{Envelope, EnvelopeSignature, pae};
use crate::error::AttestError;
use crate::manifest::{ChecksumManifest, ManifestEntry};
use crate::signature::{DetachedSignature, SignatureAlgorithm, SignatureEntry};
use crate::trust::TrustedKey;

enum KeyMaterial {
    EcdsaP256(EcdsaKeyPair),
    Ed25519(Ed25519KeyPair),
}

/// Local file-backed signer.
pub struct LocalSigner {
    key: KeyMaterial,
    key_id: String,
    rng: SystemRandom,
}

impl LocalSigner {
    /// Generate a new key of `algorithm` and write it to `key_path`.
    ///
    /// Refuses to overwrite an existing file.
    pub fn generate(
        key_path: &Path,
        algorithm: SignatureAlgorithm,
        key_id: &str,
    ) -> Result<Self, AttestError> {
        if key_path.exists() {
            return Err(AttestError::KeyError(format!(
                "refusing to overwrite existing key file {}",
                key_path.display()
            )));
        }

        let rng = SystemRandom::new();
        let pkcs8 = match algorithm {
            SignatureAlgorithm::EcdsaP256Sha256 => {
                EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            }
            SignatureAlgorithm::Ed25519 => Ed25519KeyPair::generate_pkcs8(&rng),
        }
        .map_err(|e| AttestError::KeyError(format!("failed to generate key: {e}")))?;

        if let Some(parent) = key_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AttestError::KeyError(format!(
                    "failed to create key directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let pem = der_to_pem(pkcs8.as_ref(), "PRIVATE KEY");
        std::fs::write(key_path, pem.as_bytes())
            .map_err(|e| AttestError::KeyError(format!("failed to write key file: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(key_path, perms).map_err(|e| {
                AttestError::KeyError(format!("failed to set key file permissions: {e}"))
            })?;
        }

        let key = parse_pkcs8(pkcs8.as_ref())?;
        tracing::info!(path = %key_path.display(), %algorithm, key_id, "generated new signing key");
        Ok(Self {
            key,
            key_id: key_id.to_owned(),
            rng,
        })
    }

    /// Load an existing PEM PKCS#8 key. The algorithm is detected from the key.
    pub fn load(key_path: &Path, key_id: &str) -> Result<Self, AttestError> {
        let pem = std::fs::read_to_string(key_path)
            .map_err(|e| AttestError::KeyError(format!("failed to read key file: {e}")))?;
        let der = pem_to_der(&pem)
            .ok_or_else(|| AttestError::KeyError("invalid PEM format".to_owned()))?;
        let key = parse_pkcs8(&der)?;

        tracing::info!(path = %key_path.display(), key_id, "loaded existing signing key");
        Ok(Self {
            key,
            key_id: key_id.to_owned(),
            rng: SystemRandom::new(),
        })
    }

    /// The key's signature algorithm.
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        match self.key {
            KeyMaterial::EcdsaP256(_) => SignatureAlgorithm::EcdsaP256Sha256,
            KeyMaterial::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    /// The key id written into signature entries.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The public key as PEM-encoded SPKI.
    pub fn public_key_pem(&self) -> String {
        let spki = match &self.key {
            KeyMaterial::EcdsaP256(k) => encode_p256_spki(k.public_key().as_ref()),
            KeyMaterial::Ed25519(k) => encode_ed25519_spki(k.public_key().as_ref()),
        };
        der_to_pem(&spki, "PUBLIC KEY")
    }

    /// A trust bundle entry for this key.
    pub fn trusted_key(
        &self,
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> TrustedKey {
        TrustedKey {
            id: self.key_id.clone(),
            algorithm: self.algorithm(),
            public_key: self.public_key_pem(),
            not_before,
            not_after,
        }
    }

    /// Sign manifest bytes into a single-entry detached signature.
    pub fn sign_detached(&self, manifest_bytes: &[u8]) -> Result<DetachedSignature, AttestError> {
        Ok(DetachedSignature {
            signatures: vec![self.sign(manifest_bytes)?],
        })
    }

    /// Wrap `payload` in a DSSE envelope signed by this key.
    pub fn sign_envelope(
        &self,
        payload_type: &str,
        payload: &[u8],
    ) -> Result<Envelope, AttestError> {
        let mut envelope = Envelope::wrap(payload_type, payload);
        let entry = self.sign(&pae(payload_type, payload))?;
        envelope.signatures.push(EnvelopeSignature {
            keyid: entry.key_id,
            sig: entry.signature,
        });
        Ok(envelope)
    }

    /// Sign `payload` into an entry naming this key.
    pub fn sign(&self, payload: &[u8]) -> Result<SignatureEntry, AttestError> {
        let sig_bytes = match &self.key {
            KeyMaterial::EcdsaP256(k) => k
                .sign(&self.rng, payload)
                .map_err(|e| AttestError::SigningFailed(format!("ECDSA sign failed: {e}")))?
                .as_ref()
                .to_vec(),
            KeyMaterial::Ed25519(k) => k.sign(payload).as_ref().to_vec(),
        };

        Ok(SignatureEntry {
            algorithm: self.algorithm().as_str().to_owned(),
            key_id: self.key_id.clone(),
            signature: base64::engine::general_purpose::STANDARD.encode(sig_bytes),
        })
    }
}

fn parse_pkcs8(der: &[u8]) -> Result<KeyMaterial, AttestError> {
    if let Ok(k) = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, der) {
        return Ok(KeyMaterial::EcdsaP256(k));
    }
    Ed25519KeyPair::from_pkcs8(der)
        .map(KeyMaterial::Ed25519)
        .map_err(|e| AttestError::KeyError(format!("unsupported or corrupt PKCS#8 key: {e}")))
}

/// Build a manifest covering `files`, keyed by each file's base name.
pub fn build_manifest(files: &[PathBuf]) -> Result<ChecksumManifest, AttestError> {
    let mut entries = Vec::with_capacity(files.len());
    for path in files {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                AttestError::IoError(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("not a file name: {}", path.display()),
                ))
            })?
            .to_owned();
        let digest = digest_file(path)?;
        tracing::debug!(%filename, %digest, "hashed release file");
        entries.push(ManifestEntry { filename, digest });
    }
    Ok(ChecksumManifest::from_entries(entries)?)
}

/// Default key path: `~/.config/redoubt/keys/release.pem`.
pub fn default_key_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "redoubt", "redoubt").map_or_else(
        || {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
            PathBuf::from(home).join(".config/redoubt/keys/release.pem")
        },
        |dirs| dirs.config_dir().join("keys/release.pem"),
    )
}

// ── PEM / SPKI helpers ───────────────────────────────────────────────

/// Wrap DER bytes in PEM with the given label.
///
/// # Panics
///
/// Cannot panic: base64 output is always valid ASCII.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    use std::fmt::Write;

    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {label}-----\n");
    for chunk in b64.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(chunk).expect("base64 is ASCII"));
        pem.push('\n');
    }
    let _ = writeln!(pem, "-----END {label}-----");
    pem
}

/// Extract DER bytes from a PEM string.
pub fn pem_to_der(pem: &str) -> Option<Vec<u8>> {
    let mut b64 = String::new();
    let mut in_body = false;

    for line in pem.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("-----BEGIN ") {
            in_body = true;
            continue;
        }
        if trimmed.starts_with("-----END ") {
            break;
        }
        if in_body {
            b64.push_str(trimmed);
        }
    }

    if b64.is_empty() {
        return None;
    }
    base64::engine::general_purpose::STANDARD.decode(&b64).ok()
}

/// SPKI header for an uncompressed P-256 public key.
///
/// ```text
/// SEQUENCE {
///   SEQUENCE {
///     OID 1.2.840.10045.2.1  (id-ecPublicKey)
///     OID 1.2.840.10045.3.1.7 (prime256v1)
///   }
///   BIT STRING <public key>
/// }
/// ```
#[rustfmt::skip]
const P256_SPKI_HEADER: [u8; 26] = [
    0x30, 0x59,                                     // SEQUENCE (89 bytes total)
    0x30, 0x13,                                     // SEQUENCE (19 bytes)
    0x06, 0x07,                                     // OID (7 bytes)
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01,       // 1.2.840.10045.2.1
    0x06, 0x08,                                     // OID (8 bytes)
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, // 1.2.840.10045.3.1.7
    0x03, 0x42, 0x00,                               // BIT STRING (66 bytes, 0 unused bits)
];

/// Uncompressed P-256 point length.
const P256_POINT_LEN: usize = 65;

/// SPKI header for an Ed25519 public key (RFC 8410).
#[rustfmt::skip]
const ED25519_SPKI_HEADER: [u8; 12] = [
    0x30, 0x2a,                   // SEQUENCE (42 bytes)
    0x30, 0x05,                   // SEQUENCE (5 bytes)
    0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112
    0x03, 0x21, 0x00,             // BIT STRING (33 bytes, 0 unused bits)
];

const ED25519_KEY_LEN: usize = 32;

/// Encode a raw P-256 public key (uncompressed point, 65 bytes) as SPKI DER.
pub fn encode_p256_spki(pub_key: &[u8]) -> Vec<u8> {
    let mut spki = Vec::with_capacity(P256_SPKI_HEADER.len() + pub_key.len());
    spki.extend_from_slice(&P256_SPKI_HEADER);
    spki.extend_from_slice(pub_key);
    spki
}

/// Encode a raw Ed25519 public key (32 bytes) as SPKI DER.
pub fn encode_ed25519_spki(pub_key: &[u8]) -> Vec<u8> {
    let mut spki = Vec::with_capacity(ED25519_SPKI_HEADER.len() + pub_key.len());
    spki.extend_from_slice(&ED25519_SPKI_HEADER);
    spki.extend_from_slice(pub_key);
    spki
}

/// Strip the SPKI wrapper for `algorithm`, returning the raw public key.
///
/// Returns `None` if the header or length does not match the algorithm.
pub fn decode_spki(spki_der: &[u8], algorithm: SignatureAlgorithm) -> Option<&[u8]> {
    let (header, key_len): (&[u8], usize) = match algorithm {
        SignatureAlgorithm::EcdsaP256Sha256 => (&P256_SPKI_HEADER[..], P256_POINT_LEN),
        SignatureAlgorithm::Ed25519 => (&ED25519_SPKI_HEADER[..], ED25519_KEY_LEN),
    };
    let raw = spki_der.strip_prefix(header)?;
    (raw.len() == key_len).then_some(raw)
}
