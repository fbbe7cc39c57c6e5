//! Converter runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed in. Conversion units
//! never read environment variables themselves; a running pool only changes configuration
//! through a `ConstantsChanged` broadcast.

use crate::constants::DEFAULT_TEMPLATE_DIR;
use crate::{ConvertError, ConvertResult};
use std::path::{Path, PathBuf};

/// Converter configuration resolved at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConverterConfig {
    template_dir: PathBuf,
    pool_size: usize,
}

impl ConverterConfig {
    /// Create a new `ConverterConfig`.
    pub fn new(template_dir: PathBuf, pool_size: usize) -> ConvertResult<Self> {
        if template_dir.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "template_dir cannot be empty".into(),
            ));
        }
        if pool_size == 0 {
            return Err(ConvertError::InvalidConfig(
                "pool_size must be at least 1".into(),
            ));
        }

        Ok(Self {
            template_dir,
            pool_size,
        })
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

/// Resolve the template directory from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_TEMPLATE_DIR`].
pub fn template_dir_from_env_value(value: Option<String>) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_DIR))
}

/// Parse the pool size from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the number of logical CPUs.
pub fn pool_size_from_env_value(value: Option<String>) -> ConvertResult<usize> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let parsed = value
        .map(|v| {
            v.parse::<usize>().map_err(|e| {
                ConvertError::InvalidConfig(format!("pool size {v:?} is not a number: {e}"))
            })
        })
        .transpose()?;

    Ok(parsed.unwrap_or_else(num_cpus::get))
}
