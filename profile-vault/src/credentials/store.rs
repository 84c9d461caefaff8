//! Raw secret storage backends.
//!
//! Backends move opaque strings; shape handling lives in
//! [`super::record`].

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Read and write one secret blob.
///
/// Implementations must be thread-safe (Send + Sync) so the watch loop can
/// poll them between saves.
pub trait SecretStore: Send + Sync {
    /// Returns None if nothing is stored or it cannot be read.
    fn read(&self) -> Option<String>;

    fn write(&self, secret: &str) -> std::io::Result<()>;
}

/// macOS keychain item accessed through the `security` utility.
pub struct KeychainStore {
    service: String,
    account: String,
}

impl KeychainStore {
    pub fn new(service: impl Into<String>) -> Self {
        let account = std::env::var("USER").unwrap_or_else(|_| "default".to_string());
        Self {
            service: service.into(),
            account,
        }
    }
}

impl SecretStore for KeychainStore {
    fn read(&self) -> Option<String> {
        // -w prints only the secret
        let output = Command::new("security")
            .args(["find-generic-password", "-s", &self.service, "-w"])
            .output();

        match output {
            Ok(out) if out.status.success() => {
                let secret = String::from_utf8_lossy(&out.stdout).trim().to_string();
                (!secret.is_empty()).then_some(secret)
            }
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                let stderr_lower = stderr.to_lowercase();
                if stderr_lower.contains("could not be found") || stderr.trim().is_empty() {
                    debug!("No keychain item for service {}", self.service);
                } else if stderr_lower.contains("user interaction is not allowed")
                    || stderr_lower.contains("user canceled")
                {
                    warn!("Keychain access was denied for service {}", self.service);
                } else {
                    warn!("Keychain read failed: {}", stderr.trim());
                }
                None
            }
            Err(e) => {
                warn!("Failed to run security command: {}", e);
                None
            }
        }
    }

    fn write(&self, secret: &str) -> std::io::Result<()> {
        // the command goes over stdin so the secret never appears in argv
        let mut child = Command::new("security")
            .arg("-i")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(add_password_command(&self.service, &self.account, secret).as_bytes())?;
        }
        let output = child.wait_with_output()?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() && stderr.trim().is_empty() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!(
                "security add-generic-password failed: {}",
                stderr.trim()
            )))
        }
    }
}

/// Interactive `security` command that stores `secret`.
///
/// `-U` updates an existing item in place. The secret travels hex encoded
/// through `-X`, so it needs no quoting.
fn add_password_command(service: &str, account: &str, secret: &str) -> String {
    format!(
        "add-generic-password -U -s {} -a {} -X {}\n",
        quote(service),
        quote(account),
        hex::encode(secret.as_bytes())
    )
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Credential JSON file.
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SecretStore for FileSecretStore {
    fn read(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if !content.trim().is_empty() => Some(content),
            Ok(_) => None,
            Err(e) => {
                debug!("Credential file {} unavailable: {}", self.path.display(), e);
                None
            }
        }
    }

    fn write(&self, secret: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, secret)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

/// In-memory store for tests and dry runs.
///
/// Clones share the same slot, so a test can keep a handle and observe what
/// the engine wrote.
#[derive(Clone, Default)]
pub struct MemorySecretStore {
    secret: Arc<Mutex<Option<String>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: &str) -> Self {
        let store = Self::new();
        store.set(Some(secret.to_string()));
        store
    }

    /// Set or clear the secret (simulates an external change).
    pub fn set(&self, secret: Option<String>) {
        if let Ok(mut slot) = self.secret.lock() {
            *slot = secret;
        }
    }

    pub fn get(&self) -> Option<String> {
        self.secret.lock().ok().and_then(|slot| slot.clone())
    }
}

impl SecretStore for MemorySecretStore {
    fn read(&self) -> Option<String> {
        self.get()
    }

    fn write(&self, secret: &str) -> std::io::Result<()> {
        self.set(Some(secret.to_string()));
        Ok(())
    }
}
