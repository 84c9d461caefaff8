//! Remote profile storage.
//!
//! All profiles live as named blobs in one collection, discovered by its
//! description tag. Adapters translate service failures into the closed
//! [`RemoteError`] set; raw diagnostic text never crosses this boundary.

pub mod error;
pub mod gh;
pub mod memory;

use async_trait::async_trait;
use std::fmt;

pub use error::{classify_diagnostic, RemoteError};
pub use gh::GhCliStore;
pub use memory::MemoryStore;

/// Identifier of the profile collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionId(pub String);

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Look the collection up by its description without creating it.
    async fn find_collection(&self) -> Result<Option<CollectionId>, RemoteError>;

    async fn create_collection(&self) -> Result<CollectionId, RemoteError>;

    async fn find_or_create_collection(&self) -> Result<CollectionId, RemoteError> {
        match self.find_collection().await? {
            Some(id) => Ok(id),
            None => self.create_collection().await,
        }
    }

    /// Profile names, sorted.
    async fn list_profiles(&self, id: &CollectionId) -> Result<Vec<String>, RemoteError>;

    /// Store the text-encoded snapshot of `profile`, replacing any previous one.
    async fn upload(&self, id: &CollectionId, profile: &str, content: &str) -> Result<(), RemoteError>;

    async fn download(&self, id: &CollectionId, profile: &str) -> Result<String, RemoteError>;

    async fn delete(&self, id: &CollectionId, profile: &str) -> Result<(), RemoteError>;

    /// Human-readable authentication state, attached to auth failures.
    async fn auth_diagnostics(&self) -> Option<String> {
        None
    }
}

/// Blob name for a profile, `<profile>.<extension>`.
pub fn blob_name(profile: &str, extension: &str) -> String {
    format!("{}.{}", profile, extension)
}

/// Profile name of a blob, None for blobs that are not profiles.
pub fn profile_from_blob<'a>(blob: &'a str, extension: &str) -> Option<&'a str> {
    blob.strip_suffix(extension)?
        .strip_suffix('.')
        .filter(|name| !name.is_empty())
}
