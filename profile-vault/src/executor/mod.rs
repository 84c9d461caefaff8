//! Profile operations: store, restore, delete, verify, list and watch.
//!
//! [`Vault`] ties the snapshot builder, verifier, credential bridge and
//! remote store together. Filesystem work and packaging run on the
//! blocking pool; remote calls are awaited one after another.

pub mod restore;

use crate::config::Config;
use crate::credentials::CredentialBridge;
use crate::fs::HomeResolver;
use crate::profile::ProfileName;
use crate::remote::{CollectionId, RemoteError, RemoteStore};
use crate::snapshot::{classify, SizeClass, SizeLimit, SnapshotBuilder, SnapshotContents, SnapshotOptions};
use crate::utils::errors::format_mib;
use crate::utils::{OutputSink, Result, VaultError};
use crate::verify::{Verifier, VerifyReport};
use crate::watch::{
    ChangeObserver, SaveOutcome, SchedulerSettings, SnapshotSaver, SourceMatcher, WatchScheduler,
    WatchSummary,
};
use async_trait::async_trait;
use base64::prelude::*;
use restore::RestoreOutcome;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a successful store.
#[derive(Debug, Clone)]
pub struct StoreReport {
    pub profile: String,
    pub fingerprint: String,
    pub file_count: usize,
    pub size: SizeClass,
}

/// Entry point for every profile operation.
#[derive(Clone)]
pub struct Vault {
    config: Config,
    bridge: CredentialBridge,
    builder: SnapshotBuilder,
    verifier: Verifier,
    remote: Arc<dyn RemoteStore>,
}

impl Vault {
    pub fn new(
        config: Config,
        home: HomeResolver,
        bridge: CredentialBridge,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let builder = SnapshotBuilder::new(&config, &home, bridge.clone());
        let verifier = Verifier::new(&config, &home, bridge.clone());
        Self {
            config,
            bridge,
            builder,
            verifier,
            remote,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Names of all stored profiles. Never creates the collection.
    pub async fn list(&self, sink: &OutputSink) -> Result<Vec<String>> {
        let Some(id) = self.find_collection().await? else {
            sink.status("No profiles stored yet. Create one with --store <name>.");
            return Ok(Vec::new());
        };

        let profiles = self
            .remote
            .list_profiles(&id)
            .await
            .map_err(|e| VaultError::from_remote(e, None))?;

        if profiles.is_empty() {
            sink.status("No profiles stored yet. Create one with --store <name>.");
        } else {
            sink.status("Stored profiles:");
            for name in &profiles {
                sink.status(format!("  {}", name));
            }
        }
        Ok(profiles)
    }

    /// Snapshot the local configuration and upload it as `name`.
    pub async fn store(&self, name: &str, options: SnapshotOptions, sink: &OutputSink) -> Result<StoreReport> {
        let profile = ProfileName::parse(name)?;

        let verifier = self.verifier.clone();
        let report = blocking(move || Ok(verifier.verify_local())).await?;
        for warning in report.warnings() {
            sink.warn(warning);
        }
        if !report.valid() {
            return Err(VaultError::Integrity {
                issues: report.errors(),
            });
        }

        sink.status(format!("Collecting configuration for profile '{}'...", profile));
        let builder = self.builder.clone();
        let contents = blocking(move || builder.collect(options)).await?;
        self.upload_contents(&profile, contents, sink).await
    }

    /// Package, size-check and upload collected contents.
    async fn upload_contents(
        &self,
        profile: &ProfileName,
        contents: SnapshotContents,
        sink: &OutputSink,
    ) -> Result<StoreReport> {
        let builder = self.builder.clone();
        let snapshot = blocking(move || builder.package(&contents)).await?;

        let size = classify(snapshot.size_bytes, false);
        if size.exceeds_api_limit {
            return Err(VaultError::SizeExceeded {
                raw_bytes: size.raw_size,
                encoded_bytes: size.upload_encoded_size,
                limit: SizeLimit::Api,
                subtree_excluded: snapshot.subtree_excluded,
            });
        }
        if size.exceeds_web_limit {
            sink.warn(format!(
                "Snapshot is {} encoded, above the {}; it will upload but will not display on the web.",
                format_mib(size.upload_encoded_size),
                SizeLimit::Web.describe()
            ));
        } else if size.is_large_warning {
            sink.warn(format!(
                "Snapshot is large ({}); consider --skip-projects.",
                format_mib(size.raw_size)
            ));
        }

        let encoded = BASE64_STANDARD.encode(&snapshot.bytes);
        debug!(
            "Packaged {} files: {} raw, {} encoded",
            snapshot.file_count,
            snapshot.size_bytes,
            encoded.len()
        );

        let too_large = |subtree_excluded| VaultError::SizeExceeded {
            raw_bytes: size.raw_size,
            encoded_bytes: size.upload_encoded_size,
            limit: SizeLimit::Api,
            subtree_excluded,
        };

        let id = match self.remote.find_or_create_collection().await {
            Ok(id) => id,
            Err(e) => return Err(self.remote_failure(e).await),
        };
        match self.remote.upload(&id, profile.as_str(), &encoded).await {
            Ok(()) => {}
            Err(RemoteError::TooLarge) => return Err(too_large(snapshot.subtree_excluded)),
            Err(e) => return Err(self.remote_failure(e).await),
        }

        sink.success(format!(
            "Stored profile '{}' ({} files, {})",
            profile,
            snapshot.file_count,
            format_mib(size.raw_size)
        ));
        info!("Stored profile '{}' with fingerprint {}", profile, snapshot.fingerprint);

        Ok(StoreReport {
            profile: profile.to_string(),
            fingerprint: snapshot.fingerprint,
            file_count: snapshot.file_count,
            size,
        })
    }

    /// Download `name`, verify it and apply it to this machine.
    pub async fn restore(&self, name: &str, sink: &OutputSink) -> Result<RestoreOutcome> {
        let profile = ProfileName::parse(name)?;
        sink.status(format!("Downloading profile '{}'...", profile));
        let bytes = self.download(&profile).await?;

        let verifier = self.verifier.clone();
        let bridge = self.bridge.clone();
        let sources = self.builder.sources().to_vec();
        let outcome =
            blocking(move || restore::apply_snapshot(&bytes, &verifier, &bridge, &sources)).await?;

        for warning in &outcome.warnings {
            sink.warn(warning);
        }
        if !outcome.credentials_written {
            sink.warn(format!(
                "Credentials could not be written to the {}; sign in again after the restore.",
                self.bridge.platform().description()
            ));
        }
        sink.success(format!(
            "Restored profile '{}' ({} files)",
            profile, outcome.files_written
        ));
        Ok(outcome)
    }

    pub async fn delete(&self, name: &str, sink: &OutputSink) -> Result<()> {
        let profile = ProfileName::parse(name)?;
        let Some(id) = self.find_collection().await? else {
            return Err(VaultError::NotFound {
                profile: profile.to_string(),
                available: Vec::new(),
            });
        };

        match self.remote.delete(&id, profile.as_str()).await {
            Ok(()) => {
                sink.success(format!("Deleted profile '{}'", profile));
                Ok(())
            }
            Err(RemoteError::NotFound) => Err(self.not_found(&profile, Some(&id)).await),
            Err(e) => Err(self.remote_failure(e).await),
        }
    }

    /// Download `name` and check it without applying it.
    pub async fn verify(&self, name: &str, sink: &OutputSink) -> Result<VerifyReport> {
        let profile = ProfileName::parse(name)?;
        let bytes = self.download(&profile).await?;

        let verifier = self.verifier.clone();
        let report = blocking(move || {
            let (_staging, report) = restore::stage_and_verify(&bytes, &verifier)?;
            Ok(report)
        })
        .await?;

        for issue in &report.issues {
            sink.status(format!("  {}", issue));
        }
        if !report.valid() {
            return Err(VaultError::Integrity {
                issues: report.errors(),
            });
        }
        sink.success(format!("Profile '{}' is complete", profile));
        Ok(report)
    }

    /// Save changes to `name` in the background until `cancel` fires.
    ///
    /// `baseline` is the fingerprint of a store made just before, so the
    /// first change is compared against it.
    pub async fn watch(
        &self,
        name: &str,
        options: SnapshotOptions,
        baseline: Option<String>,
        cancel: CancellationToken,
        sink: &OutputSink,
    ) -> Result<WatchSummary> {
        let profile = ProfileName::parse(name)?;

        let verifier = self.verifier.clone();
        let report = blocking(move || Ok(verifier.verify_local())).await?;
        if !report.valid() {
            return Err(VaultError::Integrity {
                issues: report.errors(),
            });
        }

        let matcher = SourceMatcher::new(self.builder.sources(), self.builder.filter().clone(), options);
        let (observer, events) = ChangeObserver::start(matcher)?;

        let saver = Arc::new(ProfileSaver {
            vault: self.clone(),
            profile: profile.clone(),
            options,
        });
        let settings =
            SchedulerSettings::from_config(&self.config.watch, self.bridge.platform().has_native_store());
        let mut scheduler = WatchScheduler::new(saver, settings);
        if let Some(fingerprint) = baseline {
            scheduler = scheduler.with_baseline(fingerprint);
        }

        sink.status(format!(
            "Watching {} locations, saving changes to profile '{}'. Press Ctrl+C to stop.",
            observer.watched().len(),
            profile
        ));

        let result = scheduler.run(events, cancel).await;
        drop(observer);

        let summary = result?;
        sink.success(format!("Stopped watching after {} saves", summary.save_count));
        Ok(summary)
    }

    async fn find_collection(&self) -> Result<Option<CollectionId>> {
        match self.remote.find_collection().await {
            Ok(id) => Ok(id),
            Err(e) => Err(self.remote_failure(e).await),
        }
    }

    /// Fetch and decode the blob of `profile`.
    async fn download(&self, profile: &ProfileName) -> Result<Vec<u8>> {
        let Some(id) = self.find_collection().await? else {
            return Err(self.not_found(profile, None).await);
        };

        let content = match self.remote.download(&id, profile.as_str()).await {
            Ok(content) => content,
            Err(RemoteError::NotFound) => return Err(self.not_found(profile, Some(&id)).await),
            Err(e) => return Err(self.remote_failure(e).await),
        };

        let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        BASE64_STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| VaultError::Archive(format!("profile '{}' is not valid base64: {}", profile, e)))
    }

    async fn not_found(&self, profile: &ProfileName, id: Option<&CollectionId>) -> VaultError {
        let available = match id {
            Some(id) => self.remote.list_profiles(id).await.unwrap_or_else(|e| {
                warn!("Could not list profiles: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        VaultError::NotFound {
            profile: profile.to_string(),
            available,
        }
    }

    async fn remote_failure(&self, err: RemoteError) -> VaultError {
        let diagnostics = match err {
            RemoteError::Auth(_) => self.remote.auth_diagnostics().await,
            _ => None,
        };
        VaultError::from_remote(err, diagnostics)
    }
}

/// Saves driven by the watch scheduler.
struct ProfileSaver {
    vault: Vault,
    profile: ProfileName,
    options: SnapshotOptions,
}

#[async_trait]
impl SnapshotSaver for ProfileSaver {
    async fn fingerprint(&self) -> Result<String> {
        let builder = self.vault.builder.clone();
        let options = self.options;
        blocking(move || builder.current_fingerprint(options)).await
    }

    async fn save(&self, last_fingerprint: Option<String>) -> Result<SaveOutcome> {
        let builder = self.vault.builder.clone();
        let options = self.options;
        let contents = blocking(move || builder.collect(options)).await?;

        let fingerprint = contents.fingerprint();
        if last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return Ok(SaveOutcome::Unchanged);
        }

        let report = self
            .vault
            .upload_contents(&self.profile, contents, &OutputSink::Background)
            .await?;
        Ok(SaveOutcome::Saved {
            fingerprint: report.fingerprint,
        })
    }
}

/// Run filesystem or CPU-heavy work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::Io(std::io::Error::other(e)))?
}
