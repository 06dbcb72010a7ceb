//! Classifies an opaque stored string into one of the four generations.
//!
//! The rule order is load-bearing: sentinel prefix first (so old dev-mode
//! rows stay readable after switching modes), then envelope, then the legacy
//! heuristic, then plaintext fallback. Each rule is a pure function; the
//! first match wins.

use tracing::warn;

use crate::envelope::{self, EnvelopePayload};
use crate::legacy::{self, LegacyPayload};

/// Marks values written while the dev bypass was active. Must never appear
/// in a production store.
pub const DEV_SENTINEL_PREFIX: &str = "__dev__:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredFormat {
    /// Sentinel-prefixed base64; the payload is the base64 body.
    DevPassthrough(String),
    Envelope(EnvelopePayload),
    Legacy(LegacyPayload),
    /// Historical unencrypted row; returned to the caller unchanged.
    Plain,
}

pub fn classify(raw: &str) -> StoredFormat {
    if let Some(body) = as_dev_passthrough(raw) {
        return StoredFormat::DevPassthrough(body.to_string());
    }
    if let Some(payload) = envelope::decode(raw) {
        return StoredFormat::Envelope(payload);
    }
    if let Some(payload) = legacy::decode(raw) {
        return StoredFormat::Legacy(payload);
    }
    warn!(
        len = raw.len(),
        "stored value matches no known ciphertext format; treating as plaintext"
    );
    StoredFormat::Plain
}

fn as_dev_passthrough(raw: &str) -> Option<&str> {
    raw.strip_prefix(DEV_SENTINEL_PREFIX)
}
