//! In-process profile store.
//!
//! Used by tests and by anything that needs the store semantics without a
//! network. Clones share state. Failures can be queued per operation to
//! exercise error paths.

use super::{blob_name, profile_from_blob, CollectionId, RemoteError, RemoteStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Find,
    Create,
    List,
    Upload,
    Download,
    Delete,
}

#[derive(Debug, Default)]
struct Collection {
    description: String,
    blobs: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    collections: Vec<(CollectionId, Collection)>,
    failures: HashMap<Operation, VecDeque<RemoteError>>,
    calls: Vec<Operation>,
    next_id: u64,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    description: String,
    extension: String,
}

impl MemoryStore {
    pub fn new(description: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            description: description.into(),
            extension: extension.into(),
        }
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: RemoteError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Every operation attempted so far, in order.
    pub fn calls(&self) -> Vec<Operation> {
        self.lock().calls.clone()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.lock().calls.iter().filter(|op| **op == operation).count()
    }

    pub fn collection_count(&self) -> usize {
        self.lock().collections.len()
    }

    /// Blob names in the collection, including non-profile files.
    pub fn blob_names(&self) -> Vec<String> {
        let inner = self.lock();
        inner
            .collections
            .iter()
            .find(|(_, c)| c.description == self.description)
            .map(|(_, c)| c.blobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Put a blob directly, creating the collection if needed.
    pub fn seed(&self, profile: &str, content: &str) {
        let blob = blob_name(profile, &self.extension);
        let mut inner = self.lock();
        let index = match inner
            .collections
            .iter()
            .position(|(_, c)| c.description == self.description)
        {
            Some(index) => index,
            None => {
                let id = Self::allocate(&mut inner);
                inner.collections.push((
                    id,
                    Collection {
                        description: self.description.clone(),
                        blobs: BTreeMap::new(),
                    },
                ));
                inner.collections.len() - 1
            }
        };
        inner.collections[index].1.blobs.insert(blob, content.to_string());
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panicking test thread must not hide the state from others
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn allocate(inner: &mut Inner) -> CollectionId {
        inner.next_id += 1;
        CollectionId(format!("mem{:04}", inner.next_id))
    }

    /// Record the call and pop any queued failure.
    fn enter(&self, operation: Operation) -> Result<MutexGuard<'_, Inner>, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(operation);
        if let Some(error) = inner
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(inner)
    }
}

fn collection<'a>(inner: &'a mut Inner, id: &CollectionId) -> Result<&'a mut Collection, RemoteError> {
    inner
        .collections
        .iter_mut()
        .find(|(cid, _)| cid == id)
        .map(|(_, c)| c)
        .ok_or(RemoteError::NotFound)
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn find_collection(&self) -> Result<Option<CollectionId>, RemoteError> {
        let inner = self.enter(Operation::Find)?;
        Ok(inner
            .collections
            .iter()
            .find(|(_, c)| c.description == self.description)
            .map(|(id, _)| id.clone()))
    }

    async fn create_collection(&self) -> Result<CollectionId, RemoteError> {
        let mut inner = self.enter(Operation::Create)?;
        let id = Self::allocate(&mut inner);
        let mut blobs = BTreeMap::new();
        blobs.insert("README.md".to_string(), format!("# {}\n", self.description));
        inner.collections.push((
            id.clone(),
            Collection {
                description: self.description.clone(),
                blobs,
            },
        ));
        Ok(id)
    }

    async fn list_profiles(&self, id: &CollectionId) -> Result<Vec<String>, RemoteError> {
        let mut inner = self.enter(Operation::List)?;
        let collection = collection(&mut inner, id)?;
        Ok(collection
            .blobs
            .keys()
            .filter_map(|blob| profile_from_blob(blob, &self.extension))
            .map(str::to_string)
            .collect())
    }

    async fn upload(&self, id: &CollectionId, profile: &str, content: &str) -> Result<(), RemoteError> {
        let mut inner = self.enter(Operation::Upload)?;
        collection(&mut inner, id)?
            .blobs
            .insert(blob_name(profile, &self.extension), content.to_string());
        Ok(())
    }

    async fn download(&self, id: &CollectionId, profile: &str) -> Result<String, RemoteError> {
        let mut inner = self.enter(Operation::Download)?;
        collection(&mut inner, id)?
            .blobs
            .get(&blob_name(profile, &self.extension))
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn delete(&self, id: &CollectionId, profile: &str) -> Result<(), RemoteError> {
        let mut inner = self.enter(Operation::Delete)?;
        collection(&mut inner, id)?
            .blobs
            .remove(&blob_name(profile, &self.extension))
            .map(|_| ())
            .ok_or(RemoteError::NotFound)
    }

    async fn auth_diagnostics(&self) -> Option<String> {
        Some("in-memory store: no authentication".to_string())
    }
}
