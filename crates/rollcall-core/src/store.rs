//! Enrolled template store.
//!
//! Templates persist as a JSON document mapping identity to a unit-length
//! feature vector. Writers re-read the file, then replace it via a uniquely
//! named temp file + rename, so a reader never observes a half-written
//! document. The in-memory set is an
//! `Arc<TemplateSet>` swapped under a lock; a matcher holding a snapshot
//! keeps seeing that snapshot until it asks for a new one.

use crate::types::{Embedding, InputError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("template file not found: {0}")]
    NotFound(PathBuf),
    #[error("template data is corrupt: {0}")]
    CorruptData(String),
    #[error("template write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid template for {identity}: {source}")]
    InvalidTemplate {
        identity: String,
        #[source]
        source: InputError,
    },
}

/// On-disk layout of the template file.
#[derive(Debug, Serialize, Deserialize)]
struct TemplateFile {
    dimension: Option<usize>,
    templates: BTreeMap<String, Vec<f32>>,
}

/// Immutable identity → embedding set used for matching.
///
/// Iteration order is identity order, which the matcher relies on for
/// deterministic tie-breaking.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, Embedding>,
    dimension: Option<usize>,
    version: String,
}

impl TemplateSet {
    /// Build a set from raw vectors, normalizing each one.
    pub fn from_vectors<I>(vectors: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let mut templates = BTreeMap::new();
        let mut dimension = None;
        for (identity, values) in vectors {
            let embedding = Embedding::normalized(values).map_err(|source| {
                StoreError::InvalidTemplate {
                    identity: identity.clone(),
                    source,
                }
            })?;
            check_dimension(&identity, dimension, &embedding)?;
            dimension = Some(embedding.dimension());
            templates.insert(identity, embedding);
        }
        let mut set = Self {
            templates,
            dimension,
            version: String::new(),
        };
        set.version = version_of(&set.to_bytes()?);
        Ok(set)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let file: TemplateFile = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::CorruptData(format!("malformed template file: {e}")))?;

        let declared = file.dimension;
        let mut set = Self::from_vectors(file.templates).map_err(|e| match e {
            StoreError::InvalidTemplate { identity, source } => {
                StoreError::CorruptData(format!("template {identity}: {source}"))
            }
            other => other,
        })?;

        if let (Some(declared), Some(actual)) = (declared, set.dimension) {
            if declared != actual {
                return Err(StoreError::CorruptData(format!(
                    "declared dimension {declared} but templates have {actual}"
                )));
            }
        }
        set.dimension = set.dimension.or(declared);
        set.version = version_of(bytes);
        Ok(set)
    }

    fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        let file = TemplateFile {
            dimension: self.dimension,
            templates: self
                .templates
                .iter()
                .map(|(id, e)| (id.clone(), e.values().to_vec()))
                .collect(),
        };
        serde_json::to_vec_pretty(&file)
            .map_err(|e| StoreError::CorruptData(format!("serialize templates: {e}")))
    }

    pub fn get(&self, identity: &str) -> Option<&Embedding> {
        self.templates.get(identity)
    }

    /// Templates in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.templates.iter().map(|(id, e)| (id.as_str(), e))
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Vector length shared by every template, if any are enrolled.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// SHA-256 of the serialized set, hex-encoded.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Validate and normalize a probe vector against this set's dimension.
    pub fn probe(&self, values: &[f32]) -> Result<Embedding, InputError> {
        if let Some(expected) = self.dimension {
            if values.len() != expected {
                return Err(InputError::DimensionMismatch {
                    expected,
                    actual: values.len(),
                });
            }
        }
        Embedding::normalized(values.to_vec())
    }
}

fn check_dimension(
    identity: &str,
    dimension: Option<usize>,
    embedding: &Embedding,
) -> Result<(), StoreError> {
    match dimension {
        Some(expected) if expected != embedding.dimension() => Err(StoreError::InvalidTemplate {
            identity: identity.to_string(),
            source: InputError::DimensionMismatch {
                expected,
                actual: embedding.dimension(),
            },
        }),
        _ => Ok(()),
    }
}

fn version_of(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// File-backed template store with atomic snapshot swap.
pub struct TemplateStore {
    path: PathBuf,
    current: RwLock<Arc<TemplateSet>>,
    write_lock: Mutex<()>,
}

impl TemplateStore {
    /// Open the store, failing with `NotFound` if no template file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let set = read_set(&path)?;
        tracing::info!(
            path = %path.display(),
            templates = set.len(),
            version = %set.version(),
            "template store loaded"
        );
        Ok(Self::with_set(path, set))
    }

    /// Open the store, starting empty when no template file exists yet.
    pub fn open_or_empty(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        match read_set(&path) {
            Ok(set) => Ok(Self::with_set(path, set)),
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(path = %path.display(), "no template file; starting with empty set");
                let set = TemplateSet::from_vectors(Vec::new())?;
                Ok(Self::with_set(path, set))
            }
            Err(e) => Err(e),
        }
    }

    fn with_set(path: PathBuf, set: TemplateSet) -> Self {
        Self {
            path,
            current: RwLock::new(Arc::new(set)),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted set without touching the in-memory snapshot.
    pub fn load(&self) -> Result<TemplateSet, StoreError> {
        read_set(&self.path)
    }

    /// Re-read the file and swap it in as the current snapshot.
    ///
    /// On failure the previous snapshot stays in place.
    pub fn reload(&self) -> Result<Arc<TemplateSet>, StoreError> {
        let set = Arc::new(self.load()?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&set);
        tracing::info!(templates = set.len(), version = %set.version(), "templates reloaded");
        Ok(set)
    }

    /// The current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<TemplateSet> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Enroll or replace `identity`, persisting before the swap.
    pub fn upsert(&self, identity: &str, vector: Vec<f32>) -> Result<Arc<TemplateSet>, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.current_on_disk()?;
        let embedding =
            Embedding::normalized(vector).map_err(|source| StoreError::InvalidTemplate {
                identity: identity.to_string(),
                source,
            })?;

        // A sole template may be replaced with a different dimension.
        let others_dimension = if base.len() == 1 && base.get(identity).is_some() {
            None
        } else {
            base.dimension
        };
        check_dimension(identity, others_dimension, &embedding)?;

        let mut templates = base.templates.clone();
        templates.insert(identity.to_string(), embedding);
        let set = self.persist(templates)?;
        tracing::info!(identity, templates = set.len(), "template upserted");
        Ok(set)
    }

    /// Remove `identity`. Returns `false` if it was not enrolled.
    pub fn remove(&self, identity: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.current_on_disk()?;
        if base.get(identity).is_none() {
            return Ok(false);
        }
        let mut templates = base.templates.clone();
        templates.remove(identity);
        let set = self.persist(templates)?;
        tracing::info!(identity, templates = set.len(), "template removed");
        Ok(true)
    }

    /// The persisted set, so a write applies on top of changes made by
    /// other processes since this store last loaded.
    fn current_on_disk(&self) -> Result<TemplateSet, StoreError> {
        match read_set(&self.path) {
            Err(StoreError::NotFound(_)) => TemplateSet::from_vectors(Vec::new()),
            other => other,
        }
    }

    fn persist(&self, templates: BTreeMap<String, Embedding>) -> Result<Arc<TemplateSet>, StoreError> {
        let dimension = templates.values().next().map(Embedding::dimension);
        let mut set = TemplateSet {
            templates,
            dimension,
            version: String::new(),
        };
        let bytes = set.to_bytes()?;
        write_atomic(&self.path, &bytes)?;
        set.version = version_of(&bytes);

        let set = Arc::new(set);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&set);
        Ok(set)
    }
}

fn read_set(path: &Path) -> Result<TemplateSet, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(StoreError::CorruptData(format!("unreadable: {e}"))),
    };
    TemplateSet::from_bytes(&bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
