//! First-generation stored ciphertext: three colon-separated base64
//! segments (iv, auth tag, ciphertext) under one static process-wide key.
//! Read-only — current code never writes this shape.

use base64::{engine::general_purpose, Engine as _};

use crate::crypto::IV_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPayload {
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Positive heuristic: exactly three segments, all base64, and the first
/// decodes to exactly the IV length. Plaintext that coincidentally matches
/// this shape is misrouted; that is an accepted risk of reading historical
/// data, not something writes can fix.
pub fn decode(raw: &str) -> Option<LegacyPayload> {
    let mut segments = raw.split(':');
    let (iv, auth_tag, ciphertext) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let iv = general_purpose::STANDARD.decode(iv).ok()?;
    if iv.len() != IV_LEN {
        return None;
    }
    let auth_tag = general_purpose::STANDARD.decode(auth_tag).ok()?;
    let ciphertext = general_purpose::STANDARD.decode(ciphertext).ok()?;

    Some(LegacyPayload {
        iv,
        auth_tag,
        ciphertext,
    })
}
