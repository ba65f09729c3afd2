//! JSON-file backed [`WorkspaceStore`].
//!
//! The whole document lives in one file. Writes go to a sibling temp file
//! first and are renamed into place, so a crash mid-write leaves the
//! previous document intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use atelier_core::board::WorkspaceDocument;
use atelier_core::error::CoreError;
use atelier_core::persistence::WorkspaceStore;

/// Errors raised by [`JsonFileStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed workspace file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        CoreError::PersistenceFailure(e.to_string())
    }
}

/// Stores the workspace document as pretty-printed JSON at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "workspace.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub fn read(&self) -> Result<Option<WorkspaceDocument>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let document = serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(document))
    }

    pub fn write(&self, document: &WorkspaceDocument) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(document).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let temp = self.temp_path();
        fs::write(&temp, &json).map_err(|e| self.io_error(e))?;
        fs::rename(&temp, &self.path).map_err(|e| self.io_error(e))?;
        tracing::debug!(path = %self.path.display(), bytes = json.len(), "Wrote workspace file");
        Ok(())
    }
}

impl WorkspaceStore for JsonFileStore {
    fn load(&self) -> Result<Option<WorkspaceDocument>, CoreError> {
        Ok(self.read()?)
    }

    fn save(&self, document: &WorkspaceDocument) -> Result<(), CoreError> {
        Ok(self.write(document)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use atelier_core::node::{ImageData, ImageRef, Node, NodeData, Position, Size};

    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = JsonFileStore::new(dir.path().join("workspace.json"));
        assert_matches!(store.load(), Ok(None));
    }

    #[test]
    fn save_then_load_returns_same_document() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = JsonFileStore::new(dir.path().join("nested").join("workspace.json"));
        let doc = WorkspaceDocument::default();

        store.save(&doc).unwrap();
        assert_eq!(store.load().unwrap(), Some(doc));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn image_bytes_are_not_persisted() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = JsonFileStore::new(dir.path().join("workspace.json"));
        let mut doc = WorkspaceDocument::default();
        let image = ImageRef::from_bytes(vec![0u8; 4096], "image/png");
        doc.boards
            .get_mut(&doc.current_board_id)
            .unwrap()
            .nodes
            .push(Node {
                id: "node-1".into(),
                position: Position::default(),
                size: Size::default(),
                data: NodeData::Image(ImageData {
                    image: Some(image),
                    caption: String::new(),
                }),
            });

        store.save(&doc).unwrap();
        let written = std::fs::metadata(store.path()).unwrap().len();
        assert!(written < 4096, "document was {written} bytes");

        let loaded = store.load().unwrap().unwrap();
        let node = &loaded.boards[&loaded.current_board_id].nodes[0];
        assert_matches!(&node.data, NodeData::Image(data) if data.image.as_ref().unwrap().bytes.is_none());
    }

    #[test]
    fn malformed_file_is_persistence_failure() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("workspace.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = JsonFileStore::new(path);
        assert_matches!(store.load(), Err(CoreError::PersistenceFailure(_)));
    }
}
