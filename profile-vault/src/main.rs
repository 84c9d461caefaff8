//! profile-vault - Main entry point

use anyhow::Result;
use clap::Parser;
use profile_vault::cli::{Args, FirstStep, Plan};
use profile_vault::credentials::CredentialBridge;
use profile_vault::daemon::ShutdownCoordinator;
use profile_vault::executor::Vault;
use profile_vault::fs::HomeResolver;
use profile_vault::remote::GhCliStore;
use profile_vault::snapshot::SnapshotOptions;
use profile_vault::utils::logger::{self, LogSettings};
use profile_vault::utils::OutputSink;
use profile_vault::{Config, VaultError};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("Exiting with error: {:?}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let plan = args.plan()?;

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(ms) = args.debounce_delay {
        config.watch.debounce_ms = ms;
    }

    let home = HomeResolver::current()
        .ok_or_else(|| VaultError::Config("cannot determine the home directory".into()))?;

    // Initialize logging
    logger::init(&LogSettings {
        level: config.log.level.clone(),
        verbose: args.verbose,
        file: args.log_file(&home.resolve(&config.log.file)),
    })?;

    tracing::debug!("Starting profile-vault v{}", env!("CARGO_PKG_VERSION"));

    let bridge = CredentialBridge::for_current_platform(&config.credentials, &home);
    tracing::debug!("Credentials live in the {}", bridge.platform().description());
    let remote = Arc::new(GhCliStore::new(&config.remote));
    let vault = Vault::new(config, home, bridge, remote);

    let sink = OutputSink::Interactive;
    let options = SnapshotOptions {
        exclude_subtree: args.skip_projects,
    };

    match plan {
        Plan::List => {
            vault.list(&sink).await?;
        }
        Plan::Store(name) => {
            vault.store(&name, options, &sink).await?;
        }
        Plan::Restore(name) => {
            vault.restore(&name, &sink).await?;
        }
        Plan::Delete(name) => {
            vault.delete(&name, &sink).await?;
        }
        Plan::Verify(name) => {
            vault.verify(&name, &sink).await?;
        }
        Plan::Watch { profile, first } => {
            let baseline = match first {
                Some(FirstStep::Store) => Some(vault.store(&profile, options, &sink).await?.fingerprint),
                Some(FirstStep::Restore) => {
                    vault.restore(&profile, &sink).await?;
                    None
                }
                None => None,
            };

            let shutdown = ShutdownCoordinator::new();
            let listener = shutdown.spawn();
            let result = vault
                .watch(&profile, options, baseline, shutdown.token(), &sink)
                .await;

            // release the signal listener if watch ended on its own
            shutdown.token().cancel();
            let _ = listener.await;
            result?;
        }
    }

    Ok(())
}
