//! Secret set, placeholder sentinel and published references

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Final mapping of variable name to the value stored in the secret.
///
/// Only obtainable through [`SecretSetBuilder::finish`], so anything that
/// takes a `&SecretSet` runs after every decision has been made.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SecretSet {
    values: BTreeMap<String, String>,
}

impl SecretSet {
    pub fn builder() -> SecretSetBuilder {
        SecretSetBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The JSON object stored in the secret store
    pub fn to_json(&self) -> String {
        // A string-to-string map always serializes
        serde_json::to_string(&self.values).unwrap_or_default()
    }
}

// Values stay out of logs and panics
impl fmt::Debug for SecretSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Accumulates decisions until the set is frozen
#[derive(Default)]
pub struct SecretSetBuilder {
    values: BTreeMap<String, String>,
}

impl SecretSetBuilder {
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn finish(self) -> SecretSet {
        SecretSet {
            values: self.values,
        }
    }
}

/// Stand-in for the secret reference until the secret is published.
///
/// Pending locators have the form `{SECRET_ARN}:<name>::`.
pub struct Placeholder;

impl Placeholder {
    pub const TOKEN: &'static str = "{SECRET_ARN}";

    /// Pending locator for a variable
    pub fn locator(name: &str) -> String {
        format!("{}:{}::", Self::TOKEN, name)
    }

    pub fn is_pending(locator: &str) -> bool {
        locator.contains(Self::TOKEN)
    }

    /// Replace every occurrence of the token with the reference, or `None`
    /// if the locator is not pending
    pub fn resolve(locator: &str, reference: &SecretReference) -> Option<String> {
        Self::is_pending(locator).then(|| locator.replace(Self::TOKEN, reference.as_str()))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("secret reference is empty")]
    Empty,

    #[error("secret reference {0:?} contains the placeholder token")]
    ContainsPlaceholder(String),
}

/// Opaque reference returned by a secret sink (an ARN or similar)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretReference(String);

impl SecretReference {
    pub fn new(reference: impl Into<String>) -> Result<Self, ReferenceError> {
        let reference = reference.into();
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }
        if reference.contains(Placeholder::TOKEN) {
            return Err(ReferenceError::ContainsPlaceholder(reference));
        }
        Ok(Self(reference))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
