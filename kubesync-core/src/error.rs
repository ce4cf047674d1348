//! Error types for kubesync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// Parsed successfully but failed a semantic check.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// `dirs::home_dir()` returned `None`, so we cannot locate `~/.kubesync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// An object lacked the metadata needed to derive its storage path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("object has no metadata.name")]
    MissingName,

    #[error("object {name} of a namespaced kind has no metadata.namespace")]
    MissingNamespace { name: String },
}
