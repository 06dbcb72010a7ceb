//! Batch re-encryption job: walks a record export, finds rows still stored
//! in an old generation, and rewrites them through the encryption service.

pub mod driver;
pub mod store;

pub use driver::{census, CensusReport, MigrateOptions, MigrationReport, Migrator};
pub use store::{JsonlStore, Record, RecordStore};
