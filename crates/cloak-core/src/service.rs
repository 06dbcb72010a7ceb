//! Public encrypt/decrypt surface consumed by the storage layer.
//!
//! Writes always produce the envelope format (or the dev sentinel when the
//! bypass is active). Reads accept all four stored generations. Every call
//! is stateless; the only shared state is the key-service client handle
//! injected at construction.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::{CloakConfig, Environment};
use crate::crypto;
use crate::datakey::{KeyBroker, WrappedKey};
use crate::detect::{self, StoredFormat, DEV_SENTINEL_PREFIX};
use crate::envelope::{self, EnvelopePayload};
use crate::error::{CloakError, Result};
use crate::keyservice::KeyService;

#[derive(Clone)]
pub struct EncryptionService {
    broker: KeyBroker,
    legacy_key: Option<Zeroizing<[u8; crypto::KEY_LEN]>>,
    dev_bypass: bool,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("legacy_key", &self.legacy_key.as_ref().map(|_| "[REDACTED]"))
            .field("dev_bypass", &self.dev_bypass)
            .finish_non_exhaustive()
    }
}

impl EncryptionService {
    /// The key service is constructor-injected so tests can substitute an
    /// in-process implementation. Refuses to start with the bypass flag set
    /// in production.
    pub fn new(keys: Arc<dyn KeyService>, config: &CloakConfig) -> Result<Self> {
        if config.skip_encryption && config.environment == Environment::Production {
            return Err(CloakError::Configuration(
                "skip_encryption must never be enabled in production".into(),
            ));
        }
        Ok(Self {
            broker: KeyBroker::new(keys),
            legacy_key: config.legacy_key()?,
            dev_bypass: config.dev_bypass_active(),
        })
    }

    /// Null-in/null-out: absence is never encrypted, so ciphertext presence
    /// cannot become an oracle for "empty vs missing".
    pub async fn encrypt(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        let Some(text) = plaintext else {
            return Ok(None);
        };
        if self.dev_bypass {
            debug!("dev bypass active; writing sentinel-prefixed value");
            return Ok(Some(format!(
                "{DEV_SENTINEL_PREFIX}{}",
                general_purpose::STANDARD.encode(text)
            )));
        }

        // `material.plaintext` zeroes itself when it drops, on the error
        // path of `seal` as much as on the happy path.
        let material = self.broker.generate().await?;
        let sealed = crypto::seal(material.plaintext.expose(), text.as_bytes())?;

        let payload = EnvelopePayload {
            data_key_ciphertext: material.wrapped.into_bytes(),
            iv: sealed.iv.to_vec(),
            auth_tag: sealed.tag.to_vec(),
            ciphertext: sealed.ciphertext,
        };
        Ok(Some(envelope::encode(&payload)))
    }

    /// Classifies the stored value and dispatches. Authentication and key
    /// service failures propagate unmodified — a failed decrypt is never
    /// disguised as plaintext or `None`.
    pub async fn decrypt(&self, stored: Option<&str>) -> Result<Option<String>> {
        let Some(raw) = stored else {
            return Ok(None);
        };
        match detect::classify(raw) {
            StoredFormat::DevPassthrough(body) => {
                let bytes = general_purpose::STANDARD.decode(body).map_err(|_| {
                    CloakError::Integrity("dev passthrough body is not valid base64".into())
                })?;
                Ok(Some(into_utf8(bytes)?))
            }
            StoredFormat::Envelope(payload) => {
                let key = self
                    .broker
                    .unwrap(&WrappedKey::from(payload.data_key_ciphertext))
                    .await?;
                let plaintext = crypto::open(
                    key.expose(),
                    &payload.iv,
                    &payload.auth_tag,
                    &payload.ciphertext,
                )?;
                // `key` drops (and zeroes) here whether `open` succeeded or not.
                Ok(Some(into_utf8(plaintext)?))
            }
            StoredFormat::Legacy(payload) => {
                let key = self.legacy_key.as_ref().ok_or_else(|| {
                    CloakError::Configuration(
                        "legacy ciphertext found but no legacy key configured".into(),
                    )
                })?;
                let plaintext =
                    crypto::open(key, &payload.iv, &payload.auth_tag, &payload.ciphertext)?;
                Ok(Some(into_utf8(plaintext)?))
            }
            StoredFormat::Plain => Ok(Some(raw.to_string())),
        }
    }

    pub async fn encrypt_json<T>(&self, value: Option<&T>) -> Result<Option<String>>
    where
        T: Serialize + ?Sized,
    {
        let Some(value) = value else {
            return Ok(None);
        };
        let json = serde_json::to_string(value)?;
        self.encrypt(Some(&json)).await
    }

    /// Storage layers that pre-parse JSON columns hand us a `Value` instead
    /// of a string. A pre-parsed envelope is still decrypted; any other
    /// structured value passes through unchanged by design.
    pub async fn decrypt_json<T>(&self, stored: Option<Value>) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let Some(value) = stored else {
            return Ok(None);
        };
        let raw = match value {
            Value::String(raw) => raw,
            other => {
                let rendered = other.to_string();
                if envelope::decode(&rendered).is_none() {
                    return Ok(Some(serde_json::from_value(other)?));
                }
                rendered
            }
        };
        match self.decrypt(Some(&raw)).await? {
            Some(plaintext) => Ok(Some(serde_json::from_str(&plaintext)?)),
            None => Ok(None),
        }
    }
}

fn into_utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| CloakError::Integrity("decrypted payload is not valid UTF-8".into()))
}
