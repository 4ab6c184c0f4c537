//! Variable aggregation across task definitions
//!
//! The ledger records, for every environment variable name, each distinct
//! value seen anywhere and which values each document holds. It is built
//! once from a full scan and only read afterwards.

use crate::document::{environment_entries, Diagnostic, DocumentId, DocumentStore};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Observed value of an environment entry; `None` when the entry had no value
pub type EnvValue = Option<String>;

/// Everything known about one variable name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Every distinct value across all documents
    pub overall: BTreeSet<EnvValue>,
    /// Values seen per document
    pub documents: BTreeMap<DocumentId, BTreeSet<EnvValue>>,
}

impl LedgerEntry {
    fn record(&mut self, document: &DocumentId, value: Option<&str>) {
        let value = value.map(str::to_string);
        self.overall.insert(value.clone());
        self.documents
            .entry(document.clone())
            .or_default()
            .insert(value);
    }

    /// True when every occurrence carries the same value
    pub fn is_consistent(&self) -> bool {
        self.overall.len() == 1
    }

    /// The shared value, when consistent
    pub fn single_value(&self) -> Option<&EnvValue> {
        if self.is_consistent() {
            self.overall.iter().next()
        } else {
            None
        }
    }

    /// Documents that never hold `candidate` for this variable
    pub fn documents_missing(&self, candidate: &str) -> Vec<DocumentId> {
        self.documents
            .iter()
            .filter(|(_, values)| !values.iter().any(|v| v.as_deref() == Some(candidate)))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Per-variable ledger, ordered by name
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct VariableLedger {
    entries: BTreeMap<String, LedgerEntry>,
}

impl VariableLedger {
    pub fn get(&self, name: &str) -> Option<&LedgerEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LedgerEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of variables whose values disagree
    pub fn conflicts(&self) -> usize {
        self.entries.values().filter(|e| !e.is_consistent()).count()
    }
}

/// Build the ledger from every container of every document.
///
/// A document whose containers cannot be located is skipped and reported;
/// the others are still scanned.
pub fn aggregate(store: &DocumentStore) -> (VariableLedger, Vec<Diagnostic>) {
    let mut ledger = VariableLedger::default();
    let mut diagnostics = Vec::new();

    for document in store.iter() {
        let containers = match document.containers() {
            Ok(containers) => containers,
            Err(e) => {
                warn!(document = %document.id(), error = %e, "skipping malformed task definition");
                diagnostics.push(Diagnostic::new(document.id().clone(), e));
                continue;
            }
        };

        for (index, container) in containers.into_iter().enumerate() {
            let mut seen = 0;
            for entry in environment_entries(container) {
                ledger
                    .entries
                    .entry(entry.name.to_string())
                    .or_default()
                    .record(document.id(), entry.value);
                seen += 1;
            }
            debug!(document = %document.id(), container = index, variables = seen, "scanned container");
        }
    }

    info!(
        variables = ledger.len(),
        conflicts = ledger.conflicts(),
        "aggregated environment variables"
    );

    (ledger, diagnostics)
}
