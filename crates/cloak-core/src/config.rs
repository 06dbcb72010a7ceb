use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CloakError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Development,
}

impl Environment {
    /// Unknown values resolve to Production so a typo can never turn the
    /// dev bypass on.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Environment::Development,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Production,
        }
    }
}

/// Connection settings for the external key service.
#[derive(Clone)]
pub struct KeyServiceConfig {
    pub region: String,
    pub key_id: String,
    pub api_token: String,
    /// Explicit override; otherwise derived from the region.
    pub endpoint: Option<String>,
}

impl KeyServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(CloakError::Configuration(
                "key service region is not configured (CLOAK_KEY_REGION)".into(),
            ));
        }
        if self.key_id.trim().is_empty() {
            return Err(CloakError::Configuration(
                "key service key id is not configured (CLOAK_KEY_ID)".into(),
            ));
        }
        if self.api_token.trim().is_empty() {
            return Err(CloakError::Configuration(
                "key service API token is not configured (CLOAK_KEY_API_TOKEN)".into(),
            ));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://kms.{}.svc.internal", self.region))
    }
}

impl std::fmt::Debug for KeyServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyServiceConfig")
            .field("region", &self.region)
            .field("key_id", &self.key_id)
            .field("api_token", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CloakConfig {
    pub key_service: KeyServiceConfig,
    /// Base64 of the 32-byte static key old rows were encrypted with.
    pub legacy_key_base64: Option<String>,
    /// Development-only plaintext bypass. Only honored outside production.
    pub skip_encryption: bool,
    pub environment: Environment,
}

impl CloakConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            key_service: KeyServiceConfig {
                region: env_or_default("CLOAK_KEY_REGION"),
                key_id: env_or_default("CLOAK_KEY_ID"),
                api_token: env_or_default("CLOAK_KEY_API_TOKEN"),
                endpoint: std::env::var("CLOAK_KEY_ENDPOINT").ok(),
            },
            legacy_key_base64: std::env::var("CLOAK_LEGACY_KEY").ok(),
            skip_encryption: flag_set("CLOAK_SKIP_ENCRYPTION"),
            environment: Environment::parse(
                &std::env::var("CLOAK_ENV").unwrap_or_default(),
            ),
        };
        Ok(config)
    }

    /// Both conditions must hold; production always encrypts.
    pub fn dev_bypass_active(&self) -> bool {
        self.skip_encryption && self.environment != Environment::Production
    }

    pub(crate) fn legacy_key(&self) -> Result<Option<Zeroizing<[u8; 32]>>> {
        let Some(encoded) = self.legacy_key_base64.as_deref() else {
            return Ok(None);
        };
        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CloakError::Configuration(format!("legacy key is not valid base64: {e}")))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            CloakError::Configuration(format!(
                "legacy key must decode to exactly 32 bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Some(Zeroizing::new(bytes)))
    }
}

fn env_or_default(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn flag_set(name: &str) -> bool {
    matches!(
        std::env::var(name).unwrap_or_default().trim(),
        "1" | "true" | "TRUE" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_key_service() -> KeyServiceConfig {
        KeyServiceConfig {
            region: "eu-central-1".into(),
            key_id: "records-master".into(),
            api_token: "token".into(),
            endpoint: None,
        }
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let wipes: [fn(&mut KeyServiceConfig); 3] = [
            |c| c.region.clear(),
            |c| c.key_id.clear(),
            |c| c.api_token.clear(),
        ];
        for wipe in wipes {
            let mut config = valid_key_service();
            wipe(&mut config);
            assert!(matches!(
                config.validate(),
                Err(CloakError::Configuration(_))
            ));
        }
    }

    #[test]
    fn endpoint_derived_from_region() {
        let config = valid_key_service();
        assert_eq!(config.endpoint(), "https://kms.eu-central-1.svc.internal");
    }

    #[test]
    fn unknown_environment_is_production() {
        assert_eq!(Environment::parse("produciton"), Environment::Production);
        assert_eq!(Environment::parse(""), Environment::Production);
        assert_eq!(Environment::parse("dev"), Environment::Development);
    }

    #[test]
    fn dev_bypass_needs_both_conditions() {
        let mut config = CloakConfig {
            key_service: valid_key_service(),
            legacy_key_base64: None,
            skip_encryption: true,
            environment: Environment::Production,
        };
        assert!(!config.dev_bypass_active());
        config.environment = Environment::Development;
        assert!(config.dev_bypass_active());
        config.skip_encryption = false;
        assert!(!config.dev_bypass_active());
    }

    #[test]
    fn legacy_key_length_enforced() {
        let config = CloakConfig {
            key_service: valid_key_service(),
            legacy_key_base64: Some(general_purpose::STANDARD.encode([7u8; 16])),
            skip_encryption: false,
            environment: Environment::Production,
        };
        assert!(matches!(
            config.legacy_key(),
            Err(CloakError::Configuration(_))
        ));
    }

    #[test]
    fn token_redacted_in_debug() {
        let mut config = valid_key_service();
        config.api_token = "super-secret-token".into();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
