//! Rewrite engine
//!
//! Moves every variable of the secret set out of each container's
//! `environment` list and appends a pending reference to its `secrets` list.
//! Migrated names are no longer environment entries afterwards, so running
//! the rewrite again with the same set changes nothing.

use crate::document::{DocumentId, DocumentStore, EnvironmentEntry, ENVIRONMENT, SECRETS};
use crate::secret::{Placeholder, SecretSet};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Names moved into secret references, per document
#[derive(Debug, Default, Serialize)]
pub struct RewriteReport {
    pub moved: BTreeMap<DocumentId, Vec<String>>,
}

impl RewriteReport {
    /// Number of secret references added
    pub fn total(&self) -> usize {
        self.moved.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.moved.is_empty()
    }
}

/// Rewrite every container of every document against a finished secret set
pub fn rewrite(store: &mut DocumentStore, secrets: &SecretSet) -> RewriteReport {
    let mut report = RewriteReport::default();

    for document in store.iter_mut() {
        let id = document.id().clone();
        let containers = match document.containers_mut() {
            Ok(containers) => containers,
            Err(e) => {
                warn!(document = %id, error = %e, "cannot rewrite malformed task definition");
                continue;
            }
        };

        let mut moved = Vec::new();
        for (index, container) in containers.into_iter().enumerate() {
            let names = rewrite_container(container, secrets);
            if !names.is_empty() {
                debug!(document = %id, container = index, count = names.len(), "moved variables to secrets");
            }
            moved.extend(names);
        }

        if !moved.is_empty() {
            report.moved.insert(id, moved);
        }
    }

    info!(
        documents = report.moved.len(),
        references = report.total(),
        "rewrote task definitions"
    );

    report
}

/// Rewrite one container and return the names it moved.
///
/// Duplicate entries for one name are all removed and produce a single
/// reference, placed in first-occurrence order.
fn rewrite_container(container: &mut Map<String, Value>, secrets: &SecretSet) -> Vec<String> {
    let Some(Value::Array(environment)) = container.get_mut(ENVIRONMENT) else {
        return Vec::new();
    };

    let mut moved: Vec<String> = Vec::new();
    environment.retain(|entry| match EnvironmentEntry::from_value(entry) {
        Some(entry) if secrets.contains(entry.name) => {
            if !moved.iter().any(|name| name == entry.name) {
                moved.push(entry.name.to_string());
            }
            false
        }
        _ => true,
    });

    if moved.is_empty() {
        return moved;
    }

    let references = moved
        .iter()
        .map(|name| json!({ "name": name, "valueFrom": Placeholder::locator(name) }));

    match container
        .entry(SECRETS)
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(list) => list.extend(references),
        other => *other = Value::Array(references.collect()),
    }

    moved
}
