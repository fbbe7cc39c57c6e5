//! Versioned in-memory projection of a [`TemplateStore`].
//!
//! Every indexed key carries two counters. The actual version moves whenever the key is known
//! to have changed; the cached version records which actual version the in-memory bytes
//! belong to. A read only goes back to the store when they differ, so an out-of-band change
//! to the backing tree stays invisible until someone calls [`TemplateCache::invalidate`] or
//! [`TemplateCache::clear`].

use crate::store::TemplateStore;
use crate::{FilesError, FilesResult};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct CacheEntry {
    cached_version: u64,
    actual_version: u64,
    bytes: Option<Vec<u8>>,
}

impl CacheEntry {
    /// An entry known to exist whose bytes have not been read yet.
    fn unread() -> Self {
        Self {
            cached_version: 0,
            actual_version: 1,
            bytes: None,
        }
    }

    fn is_stale(&self) -> bool {
        self.bytes.is_none() || self.cached_version != self.actual_version
    }
}

/// Per-unit template cache.
///
/// The index of keys is built lazily by walking the store on first use.
#[derive(Debug)]
pub struct TemplateCache {
    store: Arc<dyn TemplateStore>,
    index: Option<HashMap<String, CacheEntry>>,
}

impl TemplateCache {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store, index: None }
    }

    pub fn store(&self) -> &Arc<dyn TemplateStore> {
        &self.store
    }

    fn index(&mut self) -> FilesResult<&mut HashMap<String, CacheEntry>> {
        if self.index.is_none() {
            let keys = self.store.list()?;
            tracing::info!(keys = keys.len(), "indexed template store");
            self.index = Some(
                keys.into_iter()
                    .map(|key| (key, CacheEntry::unread()))
                    .collect(),
            );
        }
        Ok(self.index.get_or_insert_with(HashMap::new))
    }

    /// Returns the bytes for `key`, re-reading the store only when the entry is stale.
    ///
    /// Returns `None` for keys absent from the index, and for indexed keys whose backing entry
    /// has disappeared (the entry is dropped in that case).
    ///
    /// # Errors
    ///
    /// Returns `FilesError` if the index walk or the store read fails.
    pub fn get(&mut self, key: &str) -> FilesResult<Option<&[u8]>> {
        let store = Arc::clone(&self.store);
        let index = self.index()?;

        let stale = match index.get(key) {
            None => return Ok(None),
            Some(entry) => entry.is_stale(),
        };

        if stale {
            match store.read(key) {
                Ok(bytes) => {
                    if let Some(entry) = index.get_mut(key) {
                        tracing::debug!(key, version = entry.actual_version, "reloaded template");
                        entry.bytes = Some(bytes);
                        entry.cached_version = entry.actual_version;
                    }
                }
                Err(FilesError::NotFound(_)) => {
                    index.remove(key);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(index.get(key).and_then(|entry| entry.bytes.as_deref()))
    }

    /// Writes `bytes` through to the store and bumps the key's actual version.
    pub fn set(&mut self, key: &str, bytes: Vec<u8>) -> FilesResult<()> {
        self.store.write(key, &bytes)?;
        let index = self.index()?;
        let entry = index.entry(key.to_string()).or_default();
        entry.actual_version += 1;
        entry.cached_version = entry.actual_version;
        entry.bytes = Some(bytes);
        Ok(())
    }

    /// Deletes `key` from the store and the index.
    ///
    /// Returns whether the key was indexed.
    pub fn remove(&mut self, key: &str) -> FilesResult<bool> {
        match self.store.delete(key) {
            Ok(()) | Err(FilesError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let index = self.index()?;
        Ok(index.remove(key).is_some())
    }

    /// Whether `key` is indexed. Never reads template bytes.
    pub fn has(&mut self, key: &str) -> FilesResult<bool> {
        Ok(self.index()?.contains_key(key))
    }

    /// All indexed keys, sorted. Never reads template bytes.
    pub fn keys(&mut self) -> FilesResult<Vec<String>> {
        let mut keys: Vec<String> = self.index()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    /// Marks `key` as changed so the next [`get`](Self::get) re-reads it.
    ///
    /// An unknown key is added to the index, which is how entries created out of band become
    /// visible without a full rewalk.
    pub fn invalidate(&mut self, key: &str) -> FilesResult<()> {
        let index = self.index()?;
        match index.get_mut(key) {
            Some(entry) => entry.actual_version += 1,
            None => {
                index.insert(key.to_string(), CacheEntry::unread());
            }
        }
        Ok(())
    }

    /// Drops the whole index; the next access rewalks the store.
    pub fn clear(&mut self) {
        if self.index.take().is_some() {
            tracing::info!("cleared template cache");
        }
    }
}
