//! Secret selection and conflict resolution
//!
//! Walks the ledger one variable at a time and asks a [`Decider`] what to do
//! with it. A variable only becomes a secret when a single value is valid in
//! every document where it appears.

use crate::document::DocumentId;
use crate::ledger::{LedgerEntry, VariableLedger};
use crate::secret::SecretSet;
use serde::Serialize;
use std::io;
use tracing::{debug, info, warn};

/// Answer to a conflicting variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// Use this value everywhere
    Value(String),
    /// Leave the variable in plaintext
    Skip,
}

/// Source of migration decisions (terminal prompts, a policy file, a test double).
///
/// Each call blocks until the decision is made.
pub trait Decider {
    /// Should a variable with one consistent value become a secret?
    fn confirm(&mut self, name: &str, value: &str) -> io::Result<bool>;

    /// Pick the canonical value for a variable whose values disagree
    fn choose(&mut self, name: &str, entry: &LedgerEntry) -> io::Result<Choice>;
}

/// Why a variable stayed in plaintext
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The decider said no
    Declined,
    /// The only value seen was absent
    NoValue,
    /// The chosen value is not present in every document
    Rejected {
        candidate: String,
        missing: Vec<DocumentId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub name: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Outcome of walking the whole ledger
#[derive(Debug)]
pub struct Resolution {
    pub secrets: SecretSet,
    pub skipped: Vec<Skipped>,
}

/// Decide which variables become secrets.
///
/// Decider I/O errors abort; everything else is a per-variable skip.
pub fn resolve(ledger: &VariableLedger, decider: &mut dyn Decider) -> io::Result<Resolution> {
    let mut builder = SecretSet::builder();
    let mut skipped = Vec::new();

    for (name, entry) in ledger.iter() {
        let outcome = if entry.is_consistent() {
            decide_consistent(name, entry, decider)?
        } else {
            decide_conflict(name, entry, decider)?
        };

        match outcome {
            Ok(value) => {
                debug!(variable = name, "selected as secret");
                builder.insert(name, value);
            }
            Err(reason) => {
                debug!(variable = name, ?reason, "left in plaintext");
                skipped.push(Skipped {
                    name: name.to_string(),
                    reason,
                });
            }
        }
    }

    let secrets = builder.finish();
    info!(
        selected = secrets.len(),
        skipped = skipped.len(),
        "resolved secret selection"
    );

    Ok(Resolution { secrets, skipped })
}

fn decide_consistent(
    name: &str,
    entry: &LedgerEntry,
    decider: &mut dyn Decider,
) -> io::Result<Result<String, SkipReason>> {
    let value = match entry.single_value() {
        Some(Some(value)) => value,
        _ => return Ok(Err(SkipReason::NoValue)),
    };

    if decider.confirm(name, value)? {
        Ok(Ok(value.clone()))
    } else {
        Ok(Err(SkipReason::Declined))
    }
}

fn decide_conflict(
    name: &str,
    entry: &LedgerEntry,
    decider: &mut dyn Decider,
) -> io::Result<Result<String, SkipReason>> {
    let candidate = match decider.choose(name, entry)? {
        Choice::Value(value) if !value.is_empty() => value,
        _ => return Ok(Err(SkipReason::Declined)),
    };

    let missing = entry.documents_missing(&candidate);
    if !missing.is_empty() {
        warn!(
            variable = name,
            documents = ?missing.iter().map(DocumentId::as_str).collect::<Vec<_>>(),
            "chosen value is not present in every document, skipping"
        );
        return Ok(Err(SkipReason::Rejected { candidate, missing }));
    }

    Ok(Ok(candidate))
}
