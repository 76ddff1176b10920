//! Setup manifests read from disk
//!
//! A manifest reference is a path to a YAML file holding one or more
//! resource documents separated by `---`. Empty documents are skipped.

use crate::capability::ManifestSource;
use crate::error::ManifestError;
use async_trait::async_trait;
use kat_scenario::ResourceRef;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Reads manifests from the local filesystem
#[derive(Debug, Clone, Default)]
pub struct FileManifestSource {
    base_dir: Option<PathBuf>,
}

impl FileManifestSource {
    /// Create source resolving paths as given
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative references against `dir`
    #[inline]
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl ManifestSource for FileManifestSource {
    async fn load(&self, reference: &str) -> Result<Vec<Value>, ManifestError> {
        let path = self.resolve(reference);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ManifestError::Io {
                path: path.clone(),
                source,
            })?;
        decode_documents(&text, &path)
    }
}

/// Split multi-document YAML into resource documents
///
/// Every non-empty document must identify a resource (`apiVersion`, `kind`,
/// `metadata.name`).
///
/// # Errors
/// `ManifestError::Decode` for malformed YAML, `ManifestError::Document` for
/// a document that does not identify a resource
pub fn decode_documents(text: &str, path: &Path) -> Result<Vec<Value>, ManifestError> {
    let mut documents = Vec::new();
    for (index, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Value::deserialize(doc).map_err(|source| ManifestError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        if value.is_null() {
            continue;
        }
        ResourceRef::from_document(&value).map_err(|source| ManifestError::Document {
            path: path.to_path_buf(),
            index,
            source,
        })?;
        documents.push(value);
    }
    Ok(documents)
}
