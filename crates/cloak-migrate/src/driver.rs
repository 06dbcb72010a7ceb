//! The migration pass: classify every row, re-encrypt the ones still in an
//! old generation, leave current envelopes alone.
//!
//! Retry lives here, not in the core: a key service blip fails one record
//! attempt, the driver backs off and tries again. Authentication and
//! integrity failures are never retried — those rows are recorded and left
//! exactly as they were.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use cloak_core::{classify, CloakError, EncryptionService, StoredFormat};

use crate::store::RecordStore;

const RETRY_BASE_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Classify and count, write nothing.
    pub dry_run: bool,
    /// Records re-encrypted between persists.
    pub batch_size: usize,
    /// Retries per record on key service failure.
    pub max_retries: u32,
    /// Stop after this many re-encryptions.
    pub limit: Option<usize>,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: 100,
            max_retries: 5,
            limit: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MigrationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub scanned: usize,
    pub null_content: usize,
    pub already_encrypted: usize,
    pub legacy: usize,
    pub dev_passthrough: usize,
    pub plain: usize,
    pub reencrypted: usize,
    pub failed: usize,
}

/// Read-only classification census. Needs no key service at all, so it can
/// run anywhere the export file is readable.
#[derive(Debug, Default, Serialize)]
pub struct CensusReport {
    pub scanned: usize,
    pub null_content: usize,
    pub envelope: usize,
    pub legacy: usize,
    pub dev_passthrough: usize,
    pub plain: usize,
}

pub async fn census(store: &dyn RecordStore) -> Result<CensusReport> {
    let records = store.load().await?;
    let mut report = CensusReport::default();
    for record in &records {
        report.scanned += 1;
        let Some(content) = record.content.as_deref() else {
            report.null_content += 1;
            continue;
        };
        match classify(content) {
            StoredFormat::Envelope(_) => report.envelope += 1,
            StoredFormat::Legacy(_) => report.legacy += 1,
            StoredFormat::DevPassthrough(_) => report.dev_passthrough += 1,
            StoredFormat::Plain => report.plain += 1,
        }
    }
    Ok(report)
}

pub struct Migrator {
    service: EncryptionService,
    opts: MigrateOptions,
}

impl Migrator {
    pub fn new(service: EncryptionService, opts: MigrateOptions) -> Self {
        Self { service, opts }
    }

    pub async fn run(&self, store: &dyn RecordStore) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let mut records = store.load().await?;
        let mut report = MigrationReport {
            started_at,
            finished_at: started_at,
            dry_run: self.opts.dry_run,
            scanned: 0,
            null_content: 0,
            already_encrypted: 0,
            legacy: 0,
            dev_passthrough: 0,
            plain: 0,
            reencrypted: 0,
            failed: 0,
        };

        let mut pending = 0usize;
        for index in 0..records.len() {
            if self
                .opts
                .limit
                .is_some_and(|limit| report.reencrypted >= limit)
            {
                info!(limit = report.reencrypted, "re-encryption limit reached");
                break;
            }

            report.scanned += 1;
            let Some(content) = records[index].content.clone() else {
                report.null_content += 1;
                continue;
            };

            match classify(&content) {
                StoredFormat::Envelope(_) => {
                    report.already_encrypted += 1;
                    continue;
                }
                StoredFormat::Legacy(_) => report.legacy += 1,
                StoredFormat::DevPassthrough(_) => report.dev_passthrough += 1,
                StoredFormat::Plain => report.plain += 1,
            }

            if self.opts.dry_run {
                report.reencrypted += 1;
                continue;
            }

            match self.reencrypt_with_retry(&records[index].id, &content).await {
                Ok(updated) => {
                    records[index].content = Some(updated);
                    report.reencrypted += 1;
                    pending += 1;
                    if pending >= self.opts.batch_size {
                        store.persist(&records).await?;
                        pending = 0;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    error!(record = %records[index].id, error = %err, "re-encryption failed; row left untouched");
                }
            }
        }

        if pending > 0 {
            store.persist(&records).await?;
        }

        report.finished_at = Utc::now();
        info!(
            scanned = report.scanned,
            reencrypted = report.reencrypted,
            failed = report.failed,
            dry_run = report.dry_run,
            "migration pass complete"
        );
        Ok(report)
    }

    async fn reencrypt_with_retry(
        &self,
        id: &str,
        stored: &str,
    ) -> cloak_core::Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.reencrypt(stored).await {
                Ok(updated) => return Ok(updated),
                Err(err @ CloakError::KeyService { .. }) if attempt < self.opts.max_retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(RETRY_BASE_MS << attempt.min(6));
                    warn!(
                        record = id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "key service unavailable; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn reencrypt(&self, stored: &str) -> cloak_core::Result<String> {
        let Some(plaintext) = self.service.decrypt(Some(stored)).await? else {
            return Err(CloakError::Integrity(
                "decrypt produced no value for a present column".into(),
            ));
        };
        let Some(updated) = self.service.encrypt(Some(&plaintext)).await? else {
            return Err(CloakError::Integrity(
                "encrypt produced no value for a present column".into(),
            ));
        };
        Ok(updated)
    }
}
