//! Backing stores for templates.
//!
//! The cache treats the store as the source of truth. Keys are always `/`-separated and
//! relative to the store root, whatever the host platform uses.

use crate::constants::{HIDDEN_ENTRY_PREFIX, KEY_SEPARATOR};
use crate::{FilesError, FilesResult};
use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Key-addressed storage of template bytes.
///
/// Implementations must be shareable across execution units; each unit builds its own
/// [`TemplateCache`](crate::TemplateCache) over the same store.
pub trait TemplateStore: Debug + Send + Sync {
    /// Every key currently held by the store, excluding hidden entries.
    fn list(&self) -> FilesResult<Vec<String>>;

    /// Reads the bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::NotFound`] when no entry exists for `key`.
    fn read(&self, key: &str) -> FilesResult<Vec<u8>>;

    /// Creates or replaces the entry under `key`.
    fn write(&self, key: &str, bytes: &[u8]) -> FilesResult<()>;

    /// Deletes the entry under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::NotFound`] when no entry exists for `key`.
    fn delete(&self, key: &str) -> FilesResult<()>;
}

/// Template store backed by a directory tree on local disk.
#[derive(Debug, Clone)]
pub struct FsTemplateStore {
    root: PathBuf,
}

impl FsTemplateStore {
    /// Creates a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidRootDirectory`] if `root` does not exist, is not a
    /// directory, or cannot be canonicalised.
    pub fn new(root: &Path) -> FilesResult<Self> {
        if !root.exists() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Directory does not exist: {}",
                root.display()
            )));
        }

        if !root.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        let root = root.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a key onto a path under the root, rejecting keys that would leave it.
    fn resolve(&self, key: &str) -> FilesResult<PathBuf> {
        if key.trim().is_empty() {
            return Err(FilesError::InvalidKey("key cannot be empty".into()));
        }

        let relative = Path::new(key);
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return Err(FilesError::InvalidKey(key.to_string())),
            }
        }
        Ok(path)
    }
}

impl TemplateStore for FsTemplateStore {
    fn list(&self) -> FilesResult<Vec<String>> {
        let mut keys = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                keys.push(to_key(relative));
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn read(&self, key: &str) -> FilesResult<Vec<u8>> {
        let path = self.resolve(key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => FilesError::NotFound(key.to_string()),
            _ => FilesError::Io(e),
        })
    }

    fn write(&self, key: &str, bytes: &[u8]) -> FilesResult<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> FilesResult<()> {
        let path = self.resolve(key)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => FilesError::NotFound(key.to_string()),
            _ => FilesError::Io(e),
        })
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with(HIDDEN_ENTRY_PREFIX))
}

fn to_key(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    parts.join(&KEY_SEPARATOR.to_string())
}
