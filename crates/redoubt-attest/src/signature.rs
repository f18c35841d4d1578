//! Detached signature files.
//!
//! A signature file sits next to the manifest it covers and holds one or
//! more signatures over the manifest's raw bytes. Each entry names its
//! algorithm and the id of the key that produced it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AttestError;

/// Conventional file name of the manifest's detached signature.
pub const SIGNATURE_FILE_NAME: &str = "SHA256SUMS.sig";

/// Signature algorithms the verifier understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// ECDSA over P-256 with SHA-256, ASN.1 DER encoded signatures.
    #[serde(rename = "ecdsa-p256-sha256")]
    EcdsaP256Sha256,
    /// Ed25519 (RFC 8032).
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl SignatureAlgorithm {
    /// The wire tag for this algorithm.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EcdsaP256Sha256 => "ecdsa-p256-sha256",
            Self::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ecdsa-p256-sha256" => Ok(Self::EcdsaP256Sha256),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(format!("unsupported signature algorithm `{other}`")),
        }
    }
}

/// A detached signature file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetachedSignature {
    /// Signatures over the same manifest bytes.
    pub signatures: Vec<SignatureEntry>,
}

/// One signature by one key.
///
/// `algorithm` stays a string so that files naming an algorithm this build
/// does not know still parse; the verifier rejects them explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    /// Algorithm tag, e.g. `ecdsa-p256-sha256`.
    pub algorithm: String,
    /// Id of the signing key in the trust bundle.
    #[serde(rename = "keyId")]
    pub key_id: String,
    /// Base64 (standard alphabet) signature bytes.
    pub signature: String,
}

impl DetachedSignature {
    /// Parse a signature file.
    pub fn from_json(bytes: &[u8]) -> Result<Self, AttestError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_json_pretty(&self) -> Result<String, AttestError> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}
