use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings for the build engine.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Upper bound on concurrently running step bodies. Defaults to the
  /// available parallelism of the host.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_workers: Option<usize>,
  /// Cancel the run once it has been going for this long.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub run_timeout_ms: Option<u64>,
  /// Return a snapshot of every item, not only the requested ones.
  pub include_full_context: bool,
  /// Where the CLI writes the metrics report, if anywhere.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub metrics_path: Option<PathBuf>,
}

impl EngineConfig {
  /// Read and validate a JSON config file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_workers == Some(0) {
      return Err(ConfigError::Invalid {
        field: "max_workers",
        message: "must be at least 1".to_string(),
      });
    }
    if self.run_timeout_ms == Some(0) {
      return Err(ConfigError::Invalid {
        field: "run_timeout_ms",
        message: "must be greater than zero".to_string(),
      });
    }
    Ok(())
  }

  /// Worker count to schedule with: the configured value, or the host's
  /// available parallelism (1 if unknown).
  pub fn effective_workers(&self) -> usize {
    self
      .max_workers
      .filter(|n| *n > 0)
      .unwrap_or_else(|| {
        std::thread::available_parallelism()
          .map(NonZeroUsize::get)
          .unwrap_or(1)
      })
  }
}
