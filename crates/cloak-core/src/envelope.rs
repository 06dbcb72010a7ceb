//! The current stored-ciphertext format.
//!
//! Wire shape: flat JSON object with exactly four base64 fields —
//! `dataKeyCiphertext`, `iv`, `authTag`, `ciphertext`. Key order is
//! irrelevant; unknown extra fields are tolerated on read.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

/// Decoded envelope: everything needed to recover one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopePayload {
    pub data_key_ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    data_key_ciphertext: String,
    iv: String,
    auth_tag: String,
    ciphertext: String,
}

pub fn encode(payload: &EnvelopePayload) -> String {
    let wire = WireEnvelope {
        data_key_ciphertext: general_purpose::STANDARD.encode(&payload.data_key_ciphertext),
        iv: general_purpose::STANDARD.encode(&payload.iv),
        auth_tag: general_purpose::STANDARD.encode(&payload.auth_tag),
        ciphertext: general_purpose::STANDARD.encode(&payload.ciphertext),
    };
    serde_json::to_string(&wire).expect("envelope serialization")
}

/// `None` — not an error — when the input is not valid JSON, lacks one of
/// the four fields, or carries undecodable base64. The format detector uses
/// that `None` to try the next generation.
pub fn decode(raw: &str) -> Option<EnvelopePayload> {
    let wire: WireEnvelope = serde_json::from_str(raw).ok()?;
    Some(EnvelopePayload {
        data_key_ciphertext: general_purpose::STANDARD
            .decode(wire.data_key_ciphertext)
            .ok()?,
        iv: general_purpose::STANDARD.decode(wire.iv).ok()?,
        auth_tag: general_purpose::STANDARD.decode(wire.auth_tag).ok()?,
        ciphertext: general_purpose::STANDARD.decode(wire.ciphertext).ok()?,
    })
}
