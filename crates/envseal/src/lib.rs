//! envseal - Move plaintext environment variables into a secret store
//!
//! ECS task definitions tend to accumulate credentials as plain
//! `environment` entries, often copied across several files. envseal reads
//! all of them at once, works out which values agree, asks which variables
//! should become secrets, stores the chosen values under one secret and
//! rewrites every container to reference it through `secrets`.
//!
//! A variable is only migrated when a single value is valid in every file
//! that mentions it.

pub mod decide;
pub mod document;
pub mod ledger;
pub mod pipeline;
pub mod placeholder;
pub mod resolver;
pub mod rewrite;
pub mod secret;
pub mod sink;
pub mod vault;

pub use decide::{PolicyDecider, PromptDecider};
pub use document::{Diagnostic, Document, DocumentId, DocumentStore, OutputOptions};
pub use ledger::{aggregate, LedgerEntry, VariableLedger};
pub use pipeline::{apply, migrate, select, MigrateError, Migration, Outcome, Selection};
pub use placeholder::resolve_placeholders;
pub use resolver::{resolve, Choice, Decider, Resolution, SkipReason, Skipped};
pub use rewrite::{rewrite, RewriteReport};
pub use secret::{Placeholder, SecretReference, SecretSet};
pub use sink::{publish, MemorySink, SecretSink, SinkError};
pub use vault::VaultSink;
