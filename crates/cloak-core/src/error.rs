use thiserror::Error;

pub type Result<T> = std::result::Result<T, CloakError>;

#[derive(Debug, Error)]
pub enum CloakError {
    /// Missing or contradictory deployment configuration. Fatal at startup,
    /// never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The external key service could not be reached or refused the call.
    /// Retry policy is the caller's decision.
    #[error("key service {op} failed")]
    KeyService {
        op: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A structural invariant was violated (wrong key length, undecodable
    /// material from a trusted dependency). Always fatal.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// AEAD authentication tag did not verify — tampering or wrong key.
    #[error("authentication tag mismatch (tampered ciphertext or wrong key)")]
    Authentication,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CloakError {
    pub fn key_service<E>(op: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::KeyService {
            op,
            source: Box::new(source),
        }
    }
}
