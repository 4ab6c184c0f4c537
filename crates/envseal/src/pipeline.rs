//! Migration pipeline
//!
//! aggregate → resolve → rewrite → publish → resolve placeholders.
//!
//! Selection only reads the documents. Nothing is mutated until the secret
//! set is final, and a failed publish is returned as an error so the caller
//! never writes documents that still carry placeholders.

use crate::document::{Diagnostic, DocumentStore};
use crate::ledger::aggregate;
use crate::placeholder::resolve_placeholders;
use crate::resolver::{resolve, Decider, Resolution, Skipped};
use crate::rewrite::{rewrite, RewriteReport};
use crate::secret::{SecretReference, SecretSet};
use crate::sink::{publish, SecretSink, SinkError};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

/// Errors that abort a run
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("decision failed: {0}")]
    Decision(#[from] std::io::Error),

    #[error("failed to publish secret '{name}': {source}")]
    Publish {
        name: String,
        #[source]
        source: SinkError,
    },
}

/// Result of the read-only selection phase
#[derive(Debug)]
pub struct Selection {
    /// Distinct variable names found
    pub variables: usize,
    /// Documents skipped while aggregating
    pub diagnostics: Vec<Diagnostic>,
    pub resolution: Resolution,
}

/// Result of rewriting and publishing
#[derive(Debug, Serialize)]
pub struct Migration {
    pub secret_name: String,
    pub reference: SecretReference,
    pub rewritten: RewriteReport,
    /// Number of placeholders replaced by the reference
    pub resolved: usize,
}

/// How a run ended
#[derive(Debug)]
pub enum Outcome {
    /// No environment variables in any document
    NoVariables,
    /// Variables were found but none was selected
    NoSecretsSelected { skipped: Vec<Skipped> },
    Migrated {
        migration: Migration,
        skipped: Vec<Skipped>,
    },
}

/// Aggregate the documents and decide which variables become secrets
pub fn select(store: &DocumentStore, decider: &mut dyn Decider) -> Result<Selection, MigrateError> {
    let (ledger, diagnostics) = aggregate(store);
    if ledger.is_empty() {
        return Ok(Selection {
            variables: 0,
            diagnostics,
            resolution: Resolution {
                secrets: SecretSet::default(),
                skipped: Vec::new(),
            },
        });
    }

    let resolution = resolve(&ledger, decider)?;
    Ok(Selection {
        variables: ledger.len(),
        diagnostics,
        resolution,
    })
}

/// Rewrite the documents, publish the set and resolve the placeholders
pub fn apply(
    store: &mut DocumentStore,
    secrets: &SecretSet,
    sink: &dyn SecretSink,
    secret_name: &str,
) -> Result<Migration, MigrateError> {
    let rewritten = rewrite(store, secrets);

    let reference = publish(sink, secret_name, secrets).map_err(|source| {
        error!(secret = secret_name, error = %source, "publishing failed, no task definitions will be written");
        MigrateError::Publish {
            name: secret_name.to_string(),
            source,
        }
    })?;

    let resolved = resolve_placeholders(store, &reference);
    info!(secret = secret_name, %reference, resolved, "migration complete");

    Ok(Migration {
        secret_name: secret_name.to_string(),
        reference,
        rewritten,
        resolved,
    })
}

/// Run the whole pipeline with a known secret name
pub fn migrate(
    store: &mut DocumentStore,
    decider: &mut dyn Decider,
    sink: &dyn SecretSink,
    secret_name: &str,
) -> Result<Outcome, MigrateError> {
    let selection = select(store, decider)?;
    if selection.variables == 0 {
        return Ok(Outcome::NoVariables);
    }

    let Resolution { secrets, skipped } = selection.resolution;
    if secrets.is_empty() {
        return Ok(Outcome::NoSecretsSelected { skipped });
    }

    let migration = apply(store, &secrets, sink, secret_name)?;
    Ok(Outcome::Migrated { migration, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, DocumentId, OutputOptions};
    use crate::resolver::tests::Scripted;
    use crate::resolver::SkipReason;
    use crate::secret::Placeholder;
    use crate::sink::MemorySink;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    struct Unavailable;

    impl SecretSink for Unavailable {
        fn create(&self, _: &str, _: &SecretSet) -> Result<SecretReference, SinkError> {
            Err(SinkError::Backend("service unavailable".to_string()))
        }

        fn update(&self, _: &str, _: &SecretSet) -> Result<SecretReference, SinkError> {
            Err(SinkError::Backend("service unavailable".to_string()))
        }
    }

    /// Already holds the secret, then fails to overwrite it
    struct Contested;

    impl SecretSink for Contested {
        fn create(&self, name: &str, _: &SecretSet) -> Result<SecretReference, SinkError> {
            Err(SinkError::AlreadyExists(name.to_string()))
        }

        fn update(&self, _: &str, _: &SecretSet) -> Result<SecretReference, SinkError> {
            Err(SinkError::Backend("access denied".to_string()))
        }
    }

    fn store(docs: Vec<(&str, Value)>) -> DocumentStore {
        let mut store = DocumentStore::new();
        for (id, env) in docs {
            let body = json!({
                "family": id,
                "containerDefinitions": [{"name": "app", "image": "nginx", "environment": env}]
            });
            store.insert(Document::new(DocumentId::from(id), body).unwrap());
        }
        store
    }

    fn container(store: &DocumentStore, id: &str) -> Value {
        let id = DocumentId::from(id);
        let document = store.iter().find(|d| d.id() == &id).unwrap();
        document.body()["containerDefinitions"][0].clone()
    }

    #[test]
    fn test_shared_password_migrated_everywhere() {
        let mut store = store(vec![
            ("a.json", json!([{"name": "DB_PASSWORD", "value": "secret1"}, {"name": "PORT", "value": "80"}])),
            ("b.json", json!([{"name": "DB_PASSWORD", "value": "secret1"}])),
        ]);
        let mut decider = Scripted {
            accept: vec!["DB_PASSWORD"],
            ..Default::default()
        };
        let sink = MemorySink::new("arn:aws:secretsmanager:eu-west-1:42:secret");

        let outcome = migrate(&mut store, &mut decider, &sink, "app").unwrap();
        let Outcome::Migrated { migration, skipped } = outcome else {
            panic!("expected a migration");
        };

        assert_eq!(skipped.len(), 1);
        assert_eq!(migration.resolved, 2);
        assert_eq!(sink.payload("app").unwrap(), r#"{"DB_PASSWORD":"secret1"}"#);

        let expected = json!([{
            "name": "DB_PASSWORD",
            "valueFrom": "arn:aws:secretsmanager:eu-west-1:42:secret:app:DB_PASSWORD::"
        }]);
        let a = container(&store, "a.json");
        let b = container(&store, "b.json");
        assert_eq!(a["environment"], json!([{"name": "PORT", "value": "80"}]));
        assert_eq!(b["environment"], json!([]));
        assert_eq!(a["secrets"], expected);
        assert_eq!(b["secrets"], expected);
        assert_eq!(a["image"], "nginx");
    }

    #[test]
    fn test_conflicting_key_left_alone() {
        let mut store = store(vec![
            ("a.json", json!([{"name": "API_KEY", "value": "foo"}])),
            ("b.json", json!([{"name": "API_KEY", "value": "bar"}])),
        ]);
        let before_a = container(&store, "a.json");
        let before_b = container(&store, "b.json");
        let mut decider = Scripted {
            choices: HashMap::from([("API_KEY", "foo")]),
            ..Default::default()
        };
        let sink = MemorySink::default();

        let outcome = migrate(&mut store, &mut decider, &sink, "app").unwrap();
        let Outcome::NoSecretsSelected { skipped } = outcome else {
            panic!("expected nothing to be selected");
        };

        assert!(matches!(skipped[0].reason, SkipReason::Rejected { .. }));
        assert_eq!(container(&store, "a.json"), before_a);
        assert_eq!(container(&store, "b.json"), before_b);
        assert!(sink.payload("app").is_none());
    }

    #[test]
    fn test_no_environment_is_a_clean_no_op() {
        let mut store = DocumentStore::new();
        store.insert(
            Document::new(
                DocumentId::from("a.json"),
                json!({"containerDefinitions": [{"name": "app"}]}),
            )
            .unwrap(),
        );
        let mut decider = Scripted::default();
        let sink = MemorySink::default();

        let outcome = migrate(&mut store, &mut decider, &sink, "app").unwrap();
        assert!(matches!(outcome, Outcome::NoVariables));
        assert!(decider.asked.is_empty());
    }

    #[test]
    fn test_failed_publish_aborts() {
        let mut store = store(vec![("a.json", json!([{"name": "TOKEN", "value": "t"}]))]);
        let mut decider = Scripted {
            accept: vec!["TOKEN"],
            ..Default::default()
        };

        let err = migrate(&mut store, &mut decider, &Unavailable, "app").unwrap_err();
        assert!(matches!(err, MigrateError::Publish { .. }));
    }

    #[test]
    fn test_failed_update_after_conflict_aborts() {
        let mut store = store(vec![("a.json", json!([{"name": "TOKEN", "value": "t"}]))]);
        let mut decider = Scripted {
            accept: vec!["TOKEN"],
            ..Default::default()
        };

        let err = migrate(&mut store, &mut decider, &Contested, "app").unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Publish {
                source: SinkError::Backend(_),
                ..
            }
        ));
    }

    #[test]
    fn test_unselected_entries_written_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(vec![(
            "a.json",
            json!([
                {"name": "Z_LAST", "value": "z"},
                {"name": "TOKEN", "value": "t"},
                {"value": "orphan"},
                {"name": "A_FIRST", "value": "a"}
            ]),
        )]);
        let mut decider = Scripted {
            accept: vec!["TOKEN"],
            ..Default::default()
        };
        let sink = MemorySink::default();

        migrate(&mut store, &mut decider, &sink, "app").unwrap();

        let summary = store.write_all(&OutputOptions {
            dir: Some(dir.path().to_path_buf()),
            ..OutputOptions::default()
        });
        let text = std::fs::read_to_string(&summary.written[0]).unwrap();
        let written: Value = serde_json::from_str(&text).unwrap();
        let container = &written["containerDefinitions"][0];

        assert_eq!(
            container["environment"],
            json!([
                {"name": "Z_LAST", "value": "z"},
                {"value": "orphan"},
                {"name": "A_FIRST", "value": "a"}
            ])
        );
        assert_eq!(container["secrets"][0]["valueFrom"], "memory:app:TOKEN::");
        assert!(!text.contains(Placeholder::TOKEN));
    }
}
