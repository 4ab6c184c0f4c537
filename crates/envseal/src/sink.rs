//! Secret sinks
//!
//! A sink stores the whole secret set under one name and hands back an
//! opaque reference. Creation fails with [`SinkError::AlreadyExists`] when
//! the name is taken; [`publish`] then falls back to an update.

use crate::secret::{ReferenceError, SecretReference, SecretSet};
use std::cell::RefCell;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

/// Sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("secret already exists: {0}")]
    AlreadyExists(String),

    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("invalid secret name: {0}")]
    InvalidName(String),

    #[error("vault not initialized - run 'envseal init' first")]
    NotInitialized,

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("stored secret is corrupt: {0}")]
    Corrupt(String),

    #[error("invalid reference: {0}")]
    Reference(#[from] ReferenceError),

    #[error("secret store error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for the migrated values
pub trait SecretSink {
    /// Create a new secret holding the set as a JSON object
    fn create(&self, name: &str, secrets: &SecretSet) -> Result<SecretReference, SinkError>;

    /// Replace the value of an existing secret
    fn update(&self, name: &str, secrets: &SecretSet) -> Result<SecretReference, SinkError>;
}

/// Create the secret, updating it instead if it already exists
pub fn publish(
    sink: &dyn SecretSink,
    name: &str,
    secrets: &SecretSet,
) -> Result<SecretReference, SinkError> {
    match sink.create(name, secrets) {
        Ok(reference) => {
            info!(secret = name, %reference, "created secret");
            Ok(reference)
        }
        Err(SinkError::AlreadyExists(_)) => {
            info!(secret = name, "secret already exists, updating value");
            let reference = sink.update(name, secrets)?;
            info!(secret = name, %reference, "updated secret");
            Ok(reference)
        }
        Err(e) => Err(e),
    }
}

/// In-process sink, used for dry runs
#[derive(Debug)]
pub struct MemorySink {
    prefix: String,
    stored: RefCell<BTreeMap<String, String>>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemorySink {
    /// References are `<prefix>:<name>`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            stored: RefCell::new(BTreeMap::new()),
        }
    }

    /// Stored JSON payload for a name
    pub fn payload(&self, name: &str) -> Option<String> {
        self.stored.borrow().get(name).cloned()
    }

    fn reference(&self, name: &str) -> Result<SecretReference, SinkError> {
        Ok(SecretReference::new(format!("{}:{}", self.prefix, name))?)
    }
}

impl SecretSink for MemorySink {
    fn create(&self, name: &str, secrets: &SecretSet) -> Result<SecretReference, SinkError> {
        let mut stored = self.stored.borrow_mut();
        if stored.contains_key(name) {
            return Err(SinkError::AlreadyExists(name.to_string()));
        }
        stored.insert(name.to_string(), secrets.to_json());
        self.reference(name)
    }

    fn update(&self, name: &str, secrets: &SecretSet) -> Result<SecretReference, SinkError> {
        let mut stored = self.stored.borrow_mut();
        match stored.get_mut(name) {
            Some(payload) => *payload = secrets.to_json(),
            None => return Err(SinkError::NotFound(name.to_string())),
        }
        self.reference(name)
    }
}
