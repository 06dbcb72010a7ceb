//! Clients for the external key service.
//!
//! Two operations: mint a fresh data key (plaintext + wrapped) and unwrap a
//! stored wrapped key. The service is a trusted collaborator behind an
//! authenticated JSON API; transport details stay inside this module.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::KeyServiceConfig;
use crate::crypto;
use crate::error::{CloakError, Result};

/// A freshly minted data key as returned by the key service.
pub struct GeneratedDataKey {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub wrapped: Vec<u8>,
}

#[async_trait]
pub trait KeyService: Send + Sync {
    /// Mint a fresh data key under the configured master key.
    async fn generate_data_key(&self) -> Result<GeneratedDataKey>;

    /// Recover the plaintext data key from its wrapped form.
    async fn decrypt_data_key(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

// ── HTTP client ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataKeyResponse {
    plaintext_key: String,
    wrapped_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnwrapResponse {
    plaintext_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnwrapRequest<'a> {
    key_id: &'a str,
    wrapped_key: String,
}

/// Production client. Configuration is validated up front; the HTTP
/// connection pool is built once, on first use, and shared by every call.
pub struct HttpKeyService {
    config: KeyServiceConfig,
    client: OnceCell<reqwest::Client>,
}

impl HttpKeyService {
    /// Fails fast on missing region, key id, or credentials.
    pub fn new(config: KeyServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client: OnceCell::new(),
        })
    }

    /// Safe under concurrent first use: `OnceCell` guarantees the client is
    /// built at most once.
    async fn client(&self) -> Result<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async {
                debug!(region = %self.config.region, "building key service client");
                reqwest::Client::builder()
                    .user_agent(concat!("cloak-core/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .map_err(|e| CloakError::key_service("client init", e))
            })
            .await
    }

    fn decode_key_material(encoded: &str, what: &str) -> Result<Zeroizing<Vec<u8>>> {
        general_purpose::STANDARD
            .decode(encoded)
            .map(Zeroizing::new)
            .map_err(|_| {
                CloakError::Integrity(format!("key service returned undecodable {what}"))
            })
    }
}

#[async_trait]
impl KeyService for HttpKeyService {
    async fn generate_data_key(&self) -> Result<GeneratedDataKey> {
        let url = format!(
            "{}/v1/keys/{}/datakey",
            self.config.endpoint(),
            self.config.key_id
        );
        let response = self
            .client()
            .await?
            .post(url)
            .bearer_auth(&self.config.api_token)
            .json(&serde_json::json!({ "keySpec": "AES_256" }))
            .send()
            .await
            .map_err(|e| CloakError::key_service("generate data key", e))?
            .error_for_status()
            .map_err(|e| CloakError::key_service("generate data key", e))?;

        let body: DataKeyResponse = response
            .json()
            .await
            .map_err(|e| CloakError::key_service("generate data key", e))?;

        let plaintext = Self::decode_key_material(&body.plaintext_key, "plaintext key")?;
        let wrapped = general_purpose::STANDARD
            .decode(&body.wrapped_key)
            .map_err(|_| CloakError::Integrity("key service returned undecodable wrapped key".into()))?;

        Ok(GeneratedDataKey { plaintext, wrapped })
    }

    async fn decrypt_data_key(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let url = format!("{}/v1/unwrap", self.config.endpoint());
        let request = UnwrapRequest {
            key_id: &self.config.key_id,
            wrapped_key: general_purpose::STANDARD.encode(wrapped),
        };
        let response = self
            .client()
            .await?
            .post(url)
            .bearer_auth(&self.config.api_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| CloakError::key_service("unwrap data key", e))?
            .error_for_status()
            .map_err(|e| CloakError::key_service("unwrap data key", e))?;

        let body: UnwrapResponse = response
            .json()
            .await
            .map_err(|e| CloakError::key_service("unwrap data key", e))?;

        Self::decode_key_material(&body.plaintext_key, "plaintext key")
    }
}

// ── In-process service ──────────────────────────────────────────────────────

/// In-process key service for tests and local development. Wraps data keys
/// under a process-local master key with the same AEAD used for payloads.
/// Wrapped layout: iv || tag || ciphertext.
pub struct LocalKeyService {
    master: Zeroizing<[u8; crypto::KEY_LEN]>,
}

impl LocalKeyService {
    pub fn new() -> Self {
        use aes_gcm::aead::OsRng;
        use rand::RngCore;
        let mut master = [0u8; crypto::KEY_LEN];
        OsRng.fill_bytes(&mut master);
        Self::with_master(master)
    }

    pub fn with_master(master: [u8; crypto::KEY_LEN]) -> Self {
        Self {
            master: Zeroizing::new(master),
        }
    }
}

impl Default for LocalKeyService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyService for LocalKeyService {
    async fn generate_data_key(&self) -> Result<GeneratedDataKey> {
        use aes_gcm::aead::OsRng;
        use rand::RngCore;

        let mut key = Zeroizing::new(vec![0u8; crypto::KEY_LEN]);
        OsRng.fill_bytes(key.as_mut_slice());

        let sealed = crypto::seal(&self.master, &key)?;
        let mut wrapped =
            Vec::with_capacity(crypto::IV_LEN + crypto::TAG_LEN + sealed.ciphertext.len());
        wrapped.extend_from_slice(&sealed.iv);
        wrapped.extend_from_slice(&sealed.tag);
        wrapped.extend_from_slice(&sealed.ciphertext);

        Ok(GeneratedDataKey {
            plaintext: key,
            wrapped,
        })
    }

    async fn decrypt_data_key(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if wrapped.len() < crypto::IV_LEN + crypto::TAG_LEN {
            return Err(CloakError::Integrity("wrapped key too short".into()));
        }
        let (iv, rest) = wrapped.split_at(crypto::IV_LEN);
        let (tag, ciphertext) = rest.split_at(crypto::TAG_LEN);
        crypto::open(&self.master, iv, tag, ciphertext).map(Zeroizing::new)
    }
}
