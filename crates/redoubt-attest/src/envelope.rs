//! DSSE envelopes around provenance statements.
//!
//! Signatures cover the pre-authentication encoding (PAE) of the payload
//! type and the decoded payload, never the JSON envelope itself.
//!
//! See: <https://github.com/secure-systems-lab/dsse/blob/master/protocol.md>

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{AttestError, StatementError};

/// Payload type of an in-toto statement.
pub const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// A DSSE envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Media type of the payload.
    pub payload_type: String,
    /// Base64 payload.
    pub payload: String,
    /// Signatures over the PAE of the payload.
    #[serde(default)]
    pub signatures: Vec<EnvelopeSignature>,
}

/// One DSSE signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// Key id; may be empty.
    #[serde(default)]
    pub keyid: String,
    /// Base64 signature.
    pub sig: String,
}

impl Envelope {
    /// An unsigned envelope around `payload`.
    pub fn wrap(payload_type: &str, payload: &[u8]) -> Self {
        Self {
            payload_type: payload_type.to_owned(),
            payload: base64::engine::general_purpose::STANDARD.encode(payload),
            signatures: Vec::new(),
        }
    }

    /// Parse an envelope from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, StatementError> {
        serde_json::from_value(value)
            .map_err(|e| StatementError::InvalidEnvelope(format!("not a DSSE envelope: {e}")))
    }

    /// The decoded payload.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, StatementError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.payload)
            .map_err(|e| StatementError::InvalidEnvelope(format!("payload is not base64: {e}")))
    }

    /// The bytes every signature in this envelope covers.
    pub fn signing_input(&self) -> Result<Vec<u8>, StatementError> {
        Ok(pae(&self.payload_type, &self.payload_bytes()?))
    }

    /// Serialize as pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String, AttestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// DSSE v1 pre-authentication encoding.
///
/// `"DSSEv1" SP len(type) SP type SP len(body) SP body`, lengths in ASCII
/// decimal bytes.
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "DSSEv1 {} {payload_type} {} ",
        payload_type.len(),
        payload.len()
    )
    .into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Every DSSE envelope in a provenance document.
///
/// A document is either one JSON value or JSON Lines; records that are
/// not envelopes are skipped.
pub fn envelopes_in(document: &[u8]) -> Vec<Envelope> {
    let Ok(text) = std::str::from_utf8(document) else {
        return Vec::new();
    };
    if let Ok(whole) = serde_json::from_str::<serde_json::Value>(text) {
        return Envelope::from_value(whole).into_iter().collect();
    }
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<Envelope>(l).ok())
        .collect()
}
