//! End-to-end scenarios against the in-memory store and secret store.

use base64::prelude::*;
use profile_vault::credentials::{
    CredentialBridge, CredentialDefaults, CredentialRecord, MemorySecretStore, Platform,
};
use profile_vault::fs::HomeResolver;
use profile_vault::remote::memory::Operation;
use profile_vault::remote::{MemoryStore, RemoteStore};
use profile_vault::snapshot::archive::{self, ArchiveEntry};
use profile_vault::snapshot::{classify, SizeLimit, SnapshotOptions};
use profile_vault::utils::OutputSink;
use profile_vault::verify::Verifier;
use profile_vault::{Config, Vault, VaultError};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const MIB: u64 = 1024 * 1024;
const WRAPPED: &str = r#"{"claudeAiOauth":{"accessToken":"sk-access","refreshToken":"sk-refresh","expiresAt":1760000000000,"scopes":["user:inference"],"subscriptionType":"max"}}"#;

fn memory_store(config: &Config) -> MemoryStore {
    MemoryStore::new(&config.remote.collection_description, &config.remote.blob_extension)
}

fn bridge(home: &Path, platform: Platform, keychain: &MemorySecretStore) -> CredentialBridge {
    CredentialBridge::new(
        platform,
        Arc::new(keychain.clone()),
        home.join(".claude/.credentials.json"),
        CredentialDefaults::default(),
    )
}

fn vault(config: Config, home: &Path, bridge: CredentialBridge, store: &MemoryStore) -> Vault {
    Vault::new(config, HomeResolver::new(home), bridge, Arc::new(store.clone()))
}

fn populate(home: &Path) {
    fs::create_dir_all(home.join(".claude/projects/app")).unwrap();
    fs::create_dir_all(home.join(".claude/commands")).unwrap();
    fs::write(home.join(".claude.json"), r#"{"numStartups":3}"#).unwrap();
    fs::write(home.join(".claude/settings.json"), r#"{"model":"opus"}"#).unwrap();
    fs::write(home.join(".claude/CLAUDE.md"), "# Notes\n").unwrap();
    fs::write(home.join(".claude/commands/review.md"), "Review the diff").unwrap();
    fs::write(home.join(".claude/.credentials.json"), WRAPPED).unwrap();
    fs::write(home.join(".claude/projects/app/session.jsonl"), "{}\n").unwrap();
}

/// Incompressible filler so the packaged size tracks the raw size.
fn noise(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

#[tokio::test]
async fn scenario_a_store_creates_collection_and_blob() {
    let config = Config::default();
    let store = memory_store(&config);
    let home = TempDir::new().unwrap();
    populate(home.path());
    let keychain = MemorySecretStore::new();
    let b = bridge(home.path(), Platform::File, &keychain);
    let v = vault(config.clone(), home.path(), b.clone(), &store);

    assert_eq!(store.collection_count(), 0);
    let report = v
        .store("work", SnapshotOptions::default(), &OutputSink::Background)
        .await
        .unwrap();
    assert_eq!(report.profile, "work");

    assert_eq!(store.collection_count(), 1);
    assert_eq!(store.count(Operation::Create), 1);
    assert!(store.blob_names().contains(&"work.tar.zst.b64".to_string()));

    // unpack what was uploaded and check it like a restore would
    let id = store.find_collection().await.unwrap().unwrap();
    let content = store.download(&id, "work").await.unwrap();
    let bytes = BASE64_STANDARD.decode(content).unwrap();
    let staging = TempDir::new().unwrap();
    archive::unpack(&bytes, staging.path()).unwrap();
    assert!(staging.path().join(".claude/commands/review.md").exists());

    let verifier = Verifier::new(&config, &HomeResolver::new(home.path()), b);
    let verdict = verifier.verify_packaged(staging.path());
    assert!(verdict.valid(), "{:?}", verdict);

    // a second store reuses the collection
    v.store("work", SnapshotOptions::default(), &OutputSink::Background)
        .await
        .unwrap();
    assert_eq!(store.collection_count(), 1);
    assert_eq!(store.count(Operation::Create), 1);
    assert!(v.verify("work", &OutputSink::Background).await.is_ok());
}

#[tokio::test]
async fn scenario_b_restore_writes_keychain_record() {
    let config = Config::default();
    let store = memory_store(&config);
    let packed = archive::pack([
        ArchiveEntry {
            path: ".claude.json",
            contents: br#"{"numStartups":1}"#,
            mode: 0o644,
            mtime: 1_700_000_000,
        },
        ArchiveEntry {
            path: ".claude/settings.json",
            contents: b"{}",
            mode: 0o644,
            mtime: 1_700_000_000,
        },
        ArchiveEntry {
            path: "keychain-credentials.json",
            contents: WRAPPED.as_bytes(),
            mode: 0o600,
            mtime: 0,
        },
    ])
    .unwrap();
    store.seed("work", &BASE64_STANDARD.encode(packed));

    let home = TempDir::new().unwrap();
    let keychain = MemorySecretStore::new();
    let v = vault(
        config,
        home.path(),
        bridge(home.path(), Platform::Keychain, &keychain),
        &store,
    );

    let outcome = v.restore("work", &OutputSink::Background).await.unwrap();
    assert!(outcome.credentials_written);

    let record = CredentialRecord::parse(&keychain.get().unwrap()).unwrap();
    assert!(record.is_usable());
    assert_eq!(
        fs::read_to_string(home.path().join(".claude.json")).unwrap(),
        r#"{"numStartups":1}"#
    );
    assert!(!home.path().join("keychain-credentials.json").exists());
}

#[tokio::test]
async fn scenario_c_invalid_name_fails_before_network() {
    let config = Config::default();
    let store = memory_store(&config);
    let home = TempDir::new().unwrap();
    populate(home.path());
    let keychain = MemorySecretStore::new();
    let v = vault(config, home.path(), bridge(home.path(), Platform::File, &keychain), &store);

    let err = v
        .store("Work!", SnapshotOptions::default(), &OutputSink::Background)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Validation(_)));
    assert!(err.to_string().contains("'work'"));
    assert!(store.calls().is_empty());

    for result in [
        v.restore("Work!", &OutputSink::Background).await.map(|_| ()),
        v.delete("Work!", &OutputSink::Background).await,
        v.verify("Work!", &OutputSink::Background).await.map(|_| ()),
    ] {
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn scenario_d_oversized_snapshot_aborts_before_upload() {
    let class = classify(31 * MIB, false);
    assert!(class.exceeds_api_limit);
    assert!(!class.within_api_limit);
    let encoded_mib = class.upload_encoded_size as f64 / MIB as f64;
    assert!((41.0..41.5).contains(&encoded_mib), "{}", encoded_mib);

    let config = Config::default();
    let store = memory_store(&config);
    let home = TempDir::new().unwrap();
    populate(home.path());
    fs::write(
        home.path().join(".claude/projects/app/huge.bin"),
        noise(31 * MIB as usize),
    )
    .unwrap();
    let keychain = MemorySecretStore::new();
    let v = vault(config, home.path(), bridge(home.path(), Platform::File, &keychain), &store);

    match v
        .store("work", SnapshotOptions::default(), &OutputSink::Background)
        .await
        .unwrap_err()
    {
        VaultError::SizeExceeded {
            limit,
            subtree_excluded,
            encoded_bytes,
            ..
        } => {
            assert_eq!(limit, SizeLimit::Api);
            assert!(!subtree_excluded);
            assert!(encoded_bytes > 40 * MIB);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(store.calls().is_empty());

    // the suggested remediation works
    v.store("work", SnapshotOptions { exclude_subtree: true }, &OutputSink::Background)
        .await
        .unwrap();
    assert_eq!(store.count(Operation::Upload), 1);
}

#[tokio::test]
async fn scenario_e_burst_of_changes_saves_once() {
    let mut config = Config::default();
    config.watch.debounce_ms = 2000;
    let store = memory_store(&config);
    let home = TempDir::new().unwrap();
    populate(home.path());
    let keychain = MemorySecretStore::new();
    let v = vault(config, home.path(), bridge(home.path(), Platform::File, &keychain), &store);

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let watcher = v.clone();
    let handle = tokio::spawn(async move {
        watcher
            .watch("work", SnapshotOptions::default(), None, token, &OutputSink::Background)
            .await
    });

    // let the observer register its watches
    tokio::time::sleep(Duration::from_millis(500)).await;

    let settings = home.path().join(".claude/settings.json");
    for i in 0..3 {
        fs::write(&settings, format!(r#"{{"model":"opus","edit":{}}}"#, i)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // still inside the window that started with the third change
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(store.count(Operation::Upload), 0);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(store.count(Operation::Upload), 1);

    cancel.cancel();
    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.save_count, 1);
    assert_eq!(store.count(Operation::Upload), 1);
}
