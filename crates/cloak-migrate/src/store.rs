//! Record access for the migration job.
//!
//! The application's own storage layer owns the real table; this job only
//! needs to load rows and write them back. `JsonlStore` reads the
//! newline-delimited JSON exports the ops tooling produces, one record per
//! line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One persisted row: an id plus the protected column. `content` is `None`
/// for rows where the column is NULL; those are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub content: Option<String>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Record>>;
    async fn persist(&self, records: &[Record]) -> Result<()>;
}

pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl RecordStore for JsonlStore {
    async fn load(&self) -> Result<Vec<Record>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read store {}", self.path.display()))?;
        let mut records = Vec::new();
        for (number, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(line)
                .with_context(|| format!("parse record on line {}", number + 1))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Write-then-rename so a crash mid-persist never truncates the store.
    async fn persist(&self, records: &[Record]) -> Result<()> {
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, out)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}
