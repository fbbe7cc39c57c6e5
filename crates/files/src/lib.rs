//! Template storage for the converter.
//!
//! Templates are addressed by relative keys namespaced by data type, for example
//! `hl7v2/ADT_A01.hbs` or `cda/Section/Allergies.hbs`. Two layers live here:
//!
//! - [`TemplateStore`], the backing store contract, with [`FsTemplateStore`] rooted at a
//!   directory on local disk
//! - [`TemplateCache`], an in-memory projection of a store that tracks a cached and an actual
//!   version per key and only goes back to the store when the two disagree
//!
//! ```text
//! <template root>/
//! ├── .git/              # hidden, never indexed
//! ├── hl7v2/
//! │   ├── ADT_A01.hbs
//! │   └── Resource/Patient.hbs
//! └── cda/
//!     └── ccd.hbs
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use converter_files::{FsTemplateStore, TemplateCache};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FsTemplateStore::new(Path::new("templates"))?;
//! let mut cache = TemplateCache::new(Arc::new(store));
//!
//! if let Some(bytes) = cache.get("hl7v2/ADT_A01.hbs")? {
//!     println!("{} bytes", bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
mod constants;
mod store;

pub use cache::TemplateCache;
pub use constants::{HIDDEN_ENTRY_PREFIX, KEY_SEPARATOR};
pub use store::{FsTemplateStore, TemplateStore};

/// Errors that can occur during template storage operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// Key validation failed (absolute, empty, or escaping the root)
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// No entry exists for the key in the backing store
    #[error("Template not found: {0}")]
    NotFound(String),

    /// Directory walk failed
    #[error("Failed to walk template directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FilesResult<T> = std::result::Result<T, FilesError>;
