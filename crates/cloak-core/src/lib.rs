//! Envelope encryption for sensitive columns.
//!
//! Every write gets a fresh data key from the external key service; the key
//! is used once and zeroed. Reads transparently handle all historical
//! stored-ciphertext generations while writes only ever produce the current
//! envelope format.

pub mod config;
pub mod crypto;
pub mod datakey;
pub mod detect;
pub mod envelope;
pub mod error;
pub mod keyservice;
pub mod legacy;
pub mod service;

pub use config::{CloakConfig, Environment, KeyServiceConfig};
pub use datakey::{DataKeyMaterial, KeyBroker, PlaintextKey, WrappedKey};
pub use detect::{classify, StoredFormat, DEV_SENTINEL_PREFIX};
pub use envelope::EnvelopePayload;
pub use error::{CloakError, Result};
pub use keyservice::{GeneratedDataKey, HttpKeyService, KeyService, LocalKeyService};
pub use service::EncryptionService;
