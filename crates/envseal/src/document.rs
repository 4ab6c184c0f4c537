//! Task definition documents
//!
//! A document is kept as raw JSON so every field the tool does not touch
//! survives the round trip unchanged, key order included. Only
//! `containerDefinitions[].environment` and `containerDefinitions[].secrets`
//! are interpreted.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const CONTAINER_DEFINITIONS: &str = "containerDefinitions";
pub const ENVIRONMENT: &str = "environment";
pub const SECRETS: &str = "secrets";

/// Document-level errors
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("failed to read file: {0}")]
    Read(#[source] std::io::Error),

    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("task definition is not a JSON object")]
    NotAnObject,

    #[error("`containerDefinitions` is not an array")]
    ContainersNotArray,

    #[error("container {index} is not a JSON object")]
    ContainerNotObject { index: usize },

    #[error("container {index}: `{field}` is not an array")]
    FieldNotArray { index: usize, field: &'static str },

    #[error("output {path:?} would be written by more than one task definition")]
    DuplicateTarget { path: PathBuf },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Identifies a document by the path it was loaded from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Path> for DocumentId {
    fn from(path: &Path) -> Self {
        Self(path.display().to_string())
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A non-fatal problem with one document
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub document: DocumentId,
    pub reason: String,
}

impl Diagnostic {
    pub fn new(document: DocumentId, reason: impl fmt::Display) -> Self {
        Self {
            document,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.document, self.reason)
    }
}

/// A borrowed view of one `{name, value}` environment entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentEntry<'a> {
    pub name: &'a str,
    /// Missing or non-string values read as `None`
    pub value: Option<&'a str>,
}

impl<'a> EnvironmentEntry<'a> {
    /// Read an entry, ignoring ones without a usable name
    pub fn from_value(entry: &'a Value) -> Option<Self> {
        let name = entry.get("name")?.as_str()?;
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name,
            value: entry.get("value").and_then(Value::as_str),
        })
    }
}

/// Borrow a list field of a container, treating `null` as absent
fn list_field<'a>(
    container: &'a Map<String, Value>,
    field: &'static str,
    index: usize,
) -> Result<Option<&'a Vec<Value>>, DocumentError> {
    match container.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(DocumentError::FieldNotArray { index, field }),
    }
}

/// Iterate the named environment entries of a container
pub fn environment_entries(container: &Map<String, Value>) -> impl Iterator<Item = EnvironmentEntry<'_>> {
    container
        .get(ENVIRONMENT)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(EnvironmentEntry::from_value)
}

/// One loaded task definition
#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    body: Value,
}

impl Document {
    /// Wrap a parsed body, rejecting shapes whose containers cannot be located
    pub fn new(id: DocumentId, body: Value) -> Result<Self, DocumentError> {
        check_shape(&body)?;
        Ok(Self { id, body })
    }

    /// Parse a document from JSON text
    pub fn parse(id: DocumentId, text: &str) -> Result<Self, DocumentError> {
        let body: Value = serde_json::from_str(text)?;
        Self::new(id, body)
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// All container specs, in document order
    pub fn containers(&self) -> Result<Vec<&Map<String, Value>>, DocumentError> {
        let root = self.body.as_object().ok_or(DocumentError::NotAnObject)?;
        match root.get(CONTAINER_DEFINITIONS) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    item.as_object()
                        .ok_or(DocumentError::ContainerNotObject { index })
                })
                .collect(),
            Some(_) => Err(DocumentError::ContainersNotArray),
        }
    }

    /// All container specs, mutably
    pub fn containers_mut(&mut self) -> Result<Vec<&mut Map<String, Value>>, DocumentError> {
        let root = self.body.as_object_mut().ok_or(DocumentError::NotAnObject)?;
        match root.get_mut(CONTAINER_DEFINITIONS) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter_mut()
                .enumerate()
                .map(|(index, item)| {
                    item.as_object_mut()
                        .ok_or(DocumentError::ContainerNotObject { index })
                })
                .collect(),
            Some(_) => Err(DocumentError::ContainersNotArray),
        }
    }

    /// Serialize with the given indentation width
    pub fn to_json(&self, indent: usize) -> Result<String, DocumentError> {
        let indent = " ".repeat(indent);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut out = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.body.serialize(&mut serializer)?;
        out.push(b'\n');
        // serde_json only ever emits UTF-8
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// Check that every container and its lists have the expected JSON types
fn check_shape(body: &Value) -> Result<(), DocumentError> {
    let root = body.as_object().ok_or(DocumentError::NotAnObject)?;
    let containers = match root.get(CONTAINER_DEFINITIONS) {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(DocumentError::ContainersNotArray),
    };

    for (index, item) in containers.iter().enumerate() {
        let container = item
            .as_object()
            .ok_or(DocumentError::ContainerNotObject { index })?;
        list_field(container, ENVIRONMENT, index)?;
        list_field(container, SECRETS, index)?;
    }

    Ok(())
}

/// Where and how rewritten documents are written
#[derive(Debug, Clone)]
pub struct OutputOptions {
    /// Directory for output files (current directory when unset)
    pub dir: Option<PathBuf>,
    /// Prepended to the source file name
    pub prefix: String,
    /// Overwrite the source files instead
    pub in_place: bool,
    /// JSON indentation width
    pub indent: usize,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            dir: None,
            prefix: "updated_".to_string(),
            in_place: false,
            indent: 4,
        }
    }
}

impl OutputOptions {
    /// Output path for a document
    pub fn target_for(&self, id: &DocumentId) -> PathBuf {
        let source = Path::new(id.as_str());
        if self.in_place {
            return source.to_path_buf();
        }

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.as_str().to_string());
        let name = format!("{}{}", self.prefix, file_name);

        match &self.dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

/// Result of writing the store out
#[derive(Debug, Default)]
pub struct WriteSummary {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(DocumentId, DocumentError)>,
}

/// In-memory collection of loaded documents, in load order
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: Vec<Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every path, skipping the ones that cannot be used
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> (Self, Vec<Diagnostic>) {
        let mut store = Self::new();
        let mut diagnostics = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let id = DocumentId::from(path);
            let loaded = std::fs::read_to_string(path)
                .map_err(DocumentError::Read)
                .and_then(|text| Document::parse(id.clone(), &text));

            match loaded {
                Ok(document) => {
                    debug!(document = %id, "loaded task definition");
                    store.insert(document);
                }
                Err(e) => {
                    warn!(document = %id, error = %e, "skipping task definition");
                    diagnostics.push(Diagnostic::new(id, e));
                }
            }
        }

        (store, diagnostics)
    }

    /// Add a document, replacing any previous one with the same id
    pub fn insert(&mut self, document: Document) {
        match self.documents.iter().position(|d| d.id == document.id) {
            Some(index) => self.documents[index] = document,
            None => self.documents.push(document),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Document> {
        self.documents.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Write every document; a failing file does not stop the others.
    ///
    /// Documents that would land on the same output path are not written.
    pub fn write_all(&self, options: &OutputOptions) -> WriteSummary {
        let mut summary = WriteSummary::default();

        let targets: Vec<PathBuf> = self
            .documents
            .iter()
            .map(|document| options.target_for(&document.id))
            .collect();
        let mut claims: HashMap<&Path, usize> = HashMap::new();
        for target in &targets {
            *claims.entry(target.as_path()).or_default() += 1;
        }

        if let Some(dir) = &options.dir {
            // Per-file writes below report the failure if this did not work
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(dir = ?dir, error = %e, "could not create output directory");
            }
        }

        for (document, target) in self.documents.iter().zip(&targets) {
            if claims[target.as_path()] > 1 {
                warn!(document = %document.id, target = ?target, "output path shared with another task definition");
                summary.failed.push((
                    document.id.clone(),
                    DocumentError::DuplicateTarget {
                        path: target.clone(),
                    },
                ));
                continue;
            }

            let written = document.to_json(options.indent).and_then(|json| {
                std::fs::write(target, json).map_err(|source| DocumentError::Write {
                    path: target.clone(),
                    source,
                })
            });

            match written {
                Ok(()) => summary.written.push(target.clone()),
                Err(e) => summary.failed.push((document.id.clone(), e)),
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, body: Value) -> Document {
        Document::new(DocumentId::from(id), body).unwrap()
    }

    #[test]
    fn test_environment_entry_reading() {
        let named = json!({"name": "PORT", "value": "8080"});
        let entry = EnvironmentEntry::from_value(&named).unwrap();
        assert_eq!(entry.name, "PORT");
        assert_eq!(entry.value, Some("8080"));

        let no_value = json!({"name": "EMPTY"});
        assert_eq!(EnvironmentEntry::from_value(&no_value).unwrap().value, None);

        let numeric = json!({"name": "N", "value": 3});
        assert_eq!(EnvironmentEntry::from_value(&numeric).unwrap().value, None);

        assert!(EnvironmentEntry::from_value(&json!({"name": "", "value": "x"})).is_none());
        assert!(EnvironmentEntry::from_value(&json!({"value": "x"})).is_none());
    }

    #[test]
    fn test_containers_located() {
        let document = doc(
            "a.json",
            json!({
                "family": "web",
                "containerDefinitions": [{"name": "app"}, {"name": "sidecar"}]
            }),
        );
        assert_eq!(document.containers().unwrap().len(), 2);

        let bare = doc("b.json", json!({"family": "empty"}));
        assert!(bare.containers().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_shapes_rejected() {
        let id = DocumentId::from("bad.json");
        assert!(matches!(
            Document::new(id.clone(), json!([1, 2])),
            Err(DocumentError::NotAnObject)
        ));
        assert!(matches!(
            Document::new(id.clone(), json!({"containerDefinitions": {}})),
            Err(DocumentError::ContainersNotArray)
        ));
        assert!(matches!(
            Document::new(id.clone(), json!({"containerDefinitions": ["app"]})),
            Err(DocumentError::ContainerNotObject { index: 0 })
        ));
        assert!(matches!(
            Document::new(
                id,
                json!({"containerDefinitions": [{}, {"environment": "PORT=1"}]})
            ),
            Err(DocumentError::FieldNotArray { index: 1, field: ENVIRONMENT })
        ));
    }

    #[test]
    fn test_to_json_preserves_key_order() {
        let document = Document::parse(
            DocumentId::from("a.json"),
            r#"{"zeta": 1, "alpha": 2, "containerDefinitions": []}"#,
        )
        .unwrap();

        let out = document.to_json(4).unwrap();
        let zeta = out.find("zeta").unwrap();
        let alpha = out.find("alpha").unwrap();
        assert!(zeta < alpha);
        assert!(out.contains("\n    \"alpha\": 2"));
    }

    #[test]
    fn test_target_naming() {
        let id = DocumentId::from("defs/web.json");

        let options = OutputOptions::default();
        assert_eq!(options.target_for(&id), PathBuf::from("updated_web.json"));

        let options = OutputOptions {
            dir: Some(PathBuf::from("out")),
            prefix: "sealed_".to_string(),
            ..OutputOptions::default()
        };
        assert_eq!(options.target_for(&id), PathBuf::from("out/sealed_web.json"));

        let options = OutputOptions {
            in_place: true,
            ..OutputOptions::default()
        };
        assert_eq!(options.target_for(&id), PathBuf::from("defs/web.json"));
    }

    #[test]
    fn test_load_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        let broken = dir.path().join("broken.json");
        let missing = dir.path().join("missing.json");
        std::fs::write(&good, r#"{"containerDefinitions": []}"#).unwrap();
        std::fs::write(&broken, "{").unwrap();

        let (store, diagnostics) = DocumentStore::load(&[&good, &broken, &missing]);
        assert_eq!(store.len(), 1);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].document, DocumentId::from(broken.as_path()));
        assert_eq!(diagnostics[1].document, DocumentId::from(missing.as_path()));
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let mut store = DocumentStore::new();
        store.insert(doc("a.json", json!({"v": 1})));
        store.insert(doc("a.json", json!({"v": 2})));
        assert_eq!(store.len(), 1);
        assert_eq!(store.iter().next().unwrap().body()["v"], 2);
    }

    #[test]
    fn test_write_all() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DocumentStore::new();
        store.insert(doc("web.json", json!({"containerDefinitions": []})));

        let options = OutputOptions {
            dir: Some(dir.path().join("out")),
            ..OutputOptions::default()
        };
        let summary = store.write_all(&options);

        assert!(summary.failed.is_empty());
        assert_eq!(summary.written, vec![dir.path().join("out/updated_web.json")]);
        let text = std::fs::read_to_string(&summary.written[0]).unwrap();
        let reread: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(reread, json!({"containerDefinitions": []}));
    }

    #[test]
    fn test_colliding_targets_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DocumentStore::new();
        store.insert(doc("prod/web.json", json!({"containerDefinitions": [], "family": "prod"})));
        store.insert(doc("staging/web.json", json!({"containerDefinitions": [], "family": "staging"})));
        store.insert(doc("prod/worker.json", json!({"containerDefinitions": []})));

        let options = OutputOptions {
            dir: Some(dir.path().to_path_buf()),
            ..OutputOptions::default()
        };
        let summary = store.write_all(&options);

        assert_eq!(summary.written, vec![dir.path().join("updated_worker.json")]);
        assert_eq!(summary.failed.len(), 2);
        assert_eq!(summary.failed[0].0, DocumentId::from("prod/web.json"));
        assert_eq!(summary.failed[1].0, DocumentId::from("staging/web.json"));
        assert!(summary
            .failed
            .iter()
            .all(|(_, e)| matches!(e, DocumentError::DuplicateTarget { .. })));
        assert!(!dir.path().join("updated_web.json").exists());
    }
}
