//! File-backed JSON document storage for the reference server.
//!
//! One file per document: `<data_dir>/<collection>/<id>.json`. Collection and
//! document ids are restricted to a safe character set so a request can never
//! name a path outside the data directory.

use serde_json::Value;
use std::path::PathBuf;

/// Errors that can occur reading or writing documents.
#[derive(Debug)]
pub enum DocumentStoreError {
    /// Collection or document id contains characters outside [A-Za-z0-9_-]
    InvalidSegment(String),
    /// Stored document is not valid JSON
    Corrupt(PathBuf, serde_json::Error),
    /// Filesystem error
    Io(PathBuf, std::io::Error),
}

impl std::fmt::Display for DocumentStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStoreError::InvalidSegment(s) => {
                write!(f, "Invalid collection or document id: '{}'", s)
            }
            DocumentStoreError::Corrupt(path, e) => {
                write!(f, "Corrupt document '{}': {}", path.display(), e)
            }
            DocumentStoreError::Io(path, e) => {
                write!(f, "Storage error at '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for DocumentStoreError {}

pub struct DocumentStore {
    data_dir: PathBuf,
}

impl DocumentStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Loads a document. Returns `None` when it does not exist.
    pub fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, DocumentStoreError> {
        let path = self.document_path(collection, id)?;

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DocumentStoreError::Io(path, e)),
        };

        let doc =
            serde_json::from_str(&contents).map_err(|e| DocumentStoreError::Corrupt(path, e))?;
        Ok(Some(doc))
    }

    /// Writes a document, replacing any existing body.
    pub fn put(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<(), DocumentStoreError> {
        let path = self.document_path(collection, id)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DocumentStoreError::Io(parent.to_path_buf(), e))?;
        }

        let contents = serde_json::to_string_pretty(body)
            .map_err(|e| DocumentStoreError::Corrupt(path.clone(), e))?;
        std::fs::write(&path, contents).map_err(|e| DocumentStoreError::Io(path, e))?;
        Ok(())
    }

    /// Merges top-level fields into a document, creating it when missing.
    /// Non-object bodies replace the document wholesale.
    pub fn merge(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<(), DocumentStoreError> {
        let merged = match (self.get(collection, id)?, body) {
            (Some(Value::Object(mut existing)), Value::Object(incoming)) => {
                for (key, value) in incoming {
                    existing.insert(key.clone(), value.clone());
                }
                Value::Object(existing)
            }
            _ => body.clone(),
        };

        self.put(collection, id, &merged)
    }

    /// Deletes a document. Deleting a missing document is a no-op.
    pub fn delete(&self, collection: &str, id: &str) -> Result<(), DocumentStoreError> {
        let path = self.document_path(collection, id)?;

        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DocumentStoreError::Io(path, e)),
        }
    }

    fn document_path(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<PathBuf, DocumentStoreError> {
        validate_segment(collection)?;
        validate_segment(id)?;
        Ok(self
            .data_dir
            .join(collection)
            .join(format!("{}.json", id)))
    }
}

fn validate_segment(segment: &str) -> Result<(), DocumentStoreError> {
    let valid = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(DocumentStoreError::InvalidSegment(segment.to_string()))
    }
}
