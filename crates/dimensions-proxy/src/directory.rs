//! Backend dimensions and the name-addressed routing directory.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;

/// One backend game-world server.
///
/// The name is stored lower-cased so it can be matched against command names
/// directly. `client_count` is a cached statistic, not a live query.
#[derive(Debug)]
pub struct Backend {
    name: String,
    address: String,
    client_count: AtomicUsize,
}

impl Backend {
    pub fn new(name: impl AsRef<str>, address: impl Into<String>) -> Self {
        Self {
            name: name.as_ref().to_lowercase(),
            address: address.into(),
            client_count: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Name with its first letter upper-cased, for user-facing text.
    pub fn display_name(&self) -> String {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    pub fn set_client_count(&self, count: usize) {
        self.client_count.store(count, Ordering::Relaxed);
    }

    pub(crate) fn client_joined(&self) {
        self.client_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn client_left(&self) {
        let _ = self
            .client_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

/// Returned when a name is inserted twice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dimension {0:?} is already registered")]
pub struct DuplicateBackend(pub String);

/// Insertion-ordered map from dimension name to backend handle.
#[derive(Debug, Default)]
pub struct RoutingDirectory {
    backends: IndexMap<String, Arc<Backend>>,
}

impl RoutingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its (lower-cased) name.
    pub fn insert(&mut self, backend: Backend) -> Result<Arc<Backend>, DuplicateBackend> {
        if self.backends.contains_key(backend.name()) {
            return Err(DuplicateBackend(backend.name().to_string()));
        }
        let backend = Arc::new(backend);
        self.backends
            .insert(backend.name().to_string(), Arc::clone(&backend));
        Ok(backend)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Backend>> {
        self.backends.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// Sum of the cached client counts of every backend.
    pub fn total_clients(&self) -> usize {
        self.backends.values().map(|b| b.client_count()).sum()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl TryFrom<Vec<Backend>> for RoutingDirectory {
    type Error = DuplicateBackend;

    fn try_from(backends: Vec<Backend>) -> Result<Self, Self::Error> {
        let mut directory = Self::new();
        for backend in backends {
            directory.insert(backend)?;
        }
        Ok(directory)
    }
}
