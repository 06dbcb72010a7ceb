use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use zeroize::Zeroizing;

use cloak_core::{
    classify, crypto, CloakConfig, CloakError, EncryptionService, Environment, GeneratedDataKey,
    KeyService, KeyServiceConfig, LocalKeyService, StoredFormat, DEV_SENTINEL_PREFIX,
};
use cloak_migrate::{census, JsonlStore, MigrateOptions, Migrator, Record, RecordStore};

const LEGACY_KEY: [u8; 32] = [5u8; 32];

fn test_config() -> CloakConfig {
    CloakConfig {
        key_service: KeyServiceConfig {
            region: "test-1".into(),
            key_id: "records-master".into(),
            api_token: "test-token".into(),
            endpoint: None,
        },
        legacy_key_base64: Some(general_purpose::STANDARD.encode(LEGACY_KEY)),
        skip_encryption: false,
        environment: Environment::Development,
    }
}

fn legacy_row(plaintext: &str) -> String {
    let sealed = crypto::seal(&LEGACY_KEY, plaintext.as_bytes()).unwrap();
    format!(
        "{}:{}:{}",
        general_purpose::STANDARD.encode(sealed.iv),
        general_purpose::STANDARD.encode(sealed.tag),
        general_purpose::STANDARD.encode(&sealed.ciphertext)
    )
}

fn dev_row(plaintext: &str) -> String {
    format!(
        "{DEV_SENTINEL_PREFIX}{}",
        general_purpose::STANDARD.encode(plaintext)
    )
}

async fn seeded_store(
    dir: &tempfile::TempDir,
    service: &EncryptionService,
) -> (JsonlStore, PathBuf) {
    let path = dir.path().join("records.jsonl");
    let store = JsonlStore::new(&path);

    let envelope = service
        .encrypt(Some("already current"))
        .await
        .unwrap()
        .unwrap();
    let records = vec![
        Record {
            id: "r1".into(),
            content: Some(envelope),
        },
        Record {
            id: "r2".into(),
            content: Some(legacy_row("from the old cipher")),
        },
        Record {
            id: "r3".into(),
            content: Some("never encrypted".into()),
        },
        Record {
            id: "r4".into(),
            content: Some(dev_row("written in dev mode")),
        },
        Record {
            id: "r5".into(),
            content: None,
        },
    ];
    store.persist(&records).await.unwrap();
    (store, path)
}

#[tokio::test]
async fn run_reencrypts_exactly_the_non_envelope_rows() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        EncryptionService::new(Arc::new(LocalKeyService::new()), &test_config()).unwrap();
    let (store, _path) = seeded_store(&dir, &service).await;

    let migrator = Migrator::new(service.clone(), MigrateOptions::default());
    let report = migrator.run(&store).await.unwrap();

    assert_eq!(report.scanned, 5);
    assert_eq!(report.null_content, 1);
    assert_eq!(report.already_encrypted, 1);
    assert_eq!(report.legacy, 1);
    assert_eq!(report.plain, 1);
    assert_eq!(report.dev_passthrough, 1);
    assert_eq!(report.reencrypted, 3);
    assert_eq!(report.failed, 0);

    // Every surviving row is now envelope-format and still decrypts.
    let migrated = store.load().await.unwrap();
    let expectations = [
        ("r1", Some("already current")),
        ("r2", Some("from the old cipher")),
        ("r3", Some("never encrypted")),
        ("r4", Some("written in dev mode")),
        ("r5", None),
    ];
    for (record, (id, expected)) in migrated.iter().zip(expectations) {
        assert_eq!(record.id, id);
        match expected {
            None => assert_eq!(record.content, None),
            Some(expected) => {
                let content = record.content.as_deref().unwrap();
                assert!(matches!(classify(content), StoredFormat::Envelope(_)));
                let plain = service.decrypt(Some(content)).await.unwrap().unwrap();
                assert_eq!(plain, expected);
            }
        }
    }
}

#[tokio::test]
async fn dry_run_counts_but_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        EncryptionService::new(Arc::new(LocalKeyService::new()), &test_config()).unwrap();
    let (store, path) = seeded_store(&dir, &service).await;
    let before = tokio::fs::read(&path).await.unwrap();

    let migrator = Migrator::new(
        service,
        MigrateOptions {
            dry_run: true,
            ..MigrateOptions::default()
        },
    );
    let report = migrator.run(&store).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.reencrypted, 3);
    let after = tokio::fs::read(&path).await.unwrap();
    assert_eq!(before, after, "dry run must leave the store byte-identical");
}

#[tokio::test]
async fn limit_bounds_the_pass() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        EncryptionService::new(Arc::new(LocalKeyService::new()), &test_config()).unwrap();
    let (store, _path) = seeded_store(&dir, &service).await;

    let migrator = Migrator::new(
        service,
        MigrateOptions {
            limit: Some(1),
            ..MigrateOptions::default()
        },
    );
    let report = migrator.run(&store).await.unwrap();
    assert_eq!(report.reencrypted, 1);
}

#[tokio::test]
async fn census_needs_no_key_service() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        EncryptionService::new(Arc::new(LocalKeyService::new()), &test_config()).unwrap();
    let (store, _path) = seeded_store(&dir, &service).await;

    let report = census(&store).await.unwrap();
    assert_eq!(report.scanned, 5);
    assert_eq!(report.envelope, 1);
    assert_eq!(report.legacy, 1);
    assert_eq!(report.plain, 1);
    assert_eq!(report.dev_passthrough, 1);
    assert_eq!(report.null_content, 1);
}

/// Fails the first N generate calls with a key service error, then recovers.
struct FlakyKeyService {
    inner: LocalKeyService,
    failures_left: AtomicUsize,
}

impl FlakyKeyService {
    fn new(failures: usize) -> Self {
        Self {
            inner: LocalKeyService::new(),
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl KeyService for FlakyKeyService {
    async fn generate_data_key(&self) -> cloak_core::Result<GeneratedDataKey> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CloakError::key_service(
                "generate data key",
                std::io::Error::new(std::io::ErrorKind::TimedOut, "gateway timeout"),
            ));
        }
        self.inner.generate_data_key().await
    }

    async fn decrypt_data_key(&self, wrapped: &[u8]) -> cloak_core::Result<Zeroizing<Vec<u8>>> {
        self.inner.decrypt_data_key(wrapped).await
    }
}

#[tokio::test]
async fn transient_key_service_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.jsonl");
    let store = JsonlStore::new(&path);
    store
        .persist(&[Record {
            id: "r1".into(),
            content: Some("plain row".into()),
        }])
        .await
        .unwrap();

    let flaky = Arc::new(FlakyKeyService::new(2));
    let service = EncryptionService::new(flaky, &test_config()).unwrap();
    let migrator = Migrator::new(
        service.clone(),
        MigrateOptions {
            max_retries: 3,
            ..MigrateOptions::default()
        },
    );

    let report = migrator.run(&store).await.unwrap();
    assert_eq!(report.reencrypted, 1);
    assert_eq!(report.failed, 0);

    let migrated = store.load().await.unwrap();
    let content = migrated[0].content.as_deref().unwrap();
    assert!(matches!(classify(content), StoredFormat::Envelope(_)));
    assert_eq!(
        service.decrypt(Some(content)).await.unwrap().unwrap(),
        "plain row"
    );
}

#[tokio::test]
async fn exhausted_retries_leave_the_row_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.jsonl");
    let store = JsonlStore::new(&path);
    store
        .persist(&[Record {
            id: "r1".into(),
            content: Some("plain row".into()),
        }])
        .await
        .unwrap();

    let flaky = Arc::new(FlakyKeyService::new(10));
    let service = EncryptionService::new(flaky, &test_config()).unwrap();
    let migrator = Migrator::new(
        service,
        MigrateOptions {
            max_retries: 1,
            ..MigrateOptions::default()
        },
    );

    let report = migrator.run(&store).await.unwrap();
    assert_eq!(report.reencrypted, 0);
    assert_eq!(report.failed, 1);

    let records = store.load().await.unwrap();
    assert_eq!(records[0].content.as_deref(), Some("plain row"));
}
