//! Per-record data keys and the broker that mints/unwraps them.
//!
//! `PlaintextKey` is the only type that holds raw key bytes. It zeroes its
//! buffer on drop, so the exposure window ends wherever the value goes out
//! of scope — early returns and error paths included.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::KEY_LEN;
use crate::error::{CloakError, Result};
use crate::keyservice::KeyService;

/// Ephemeral 32-byte data key. Exclusively owned; zeroed on drop.
pub struct PlaintextKey(Zeroizing<[u8; KEY_LEN]>);

impl PlaintextKey {
    /// Length is asserted here so every key entering the process goes
    /// through the same check, wherever it came from.
    pub(crate) fn from_raw(bytes: Zeroizing<Vec<u8>>) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(CloakError::Integrity(format!(
                "data key must be {KEY_LEN} bytes, key service returned {}",
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    pub fn expose(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for PlaintextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlaintextKey([REDACTED])")
    }
}

/// A data key encrypted by the key service's master key. Safe to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey(Vec<u8>);

impl WrappedKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for WrappedKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Both halves of a freshly minted data key.
#[derive(Debug)]
pub struct DataKeyMaterial {
    pub plaintext: PlaintextKey,
    pub wrapped: WrappedKey,
}

/// Front door to the key service: mints and unwraps data keys, asserting
/// the 32-byte invariant against a misbehaving dependency.
#[derive(Clone)]
pub struct KeyBroker {
    keys: Arc<dyn KeyService>,
}

impl KeyBroker {
    pub fn new(keys: Arc<dyn KeyService>) -> Self {
        Self { keys }
    }

    pub async fn generate(&self) -> Result<DataKeyMaterial> {
        let minted = self.keys.generate_data_key().await?;
        Ok(DataKeyMaterial {
            plaintext: PlaintextKey::from_raw(minted.plaintext)?,
            wrapped: WrappedKey::from(minted.wrapped),
        })
    }

    pub async fn unwrap(&self, wrapped: &WrappedKey) -> Result<PlaintextKey> {
        let plaintext = self.keys.decrypt_data_key(wrapped.as_bytes()).await?;
        PlaintextKey::from_raw(plaintext)
    }
}
