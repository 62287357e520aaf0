//! Error types for the plugin manager.
//!
//! One `thiserror` enum per subsystem (see [`GraphError`]), folded into a
//! single top-level error via `#[from]` so callers can match broadly
//! (`PluginError::Graph(_)`) or drill into subsystem detail.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for all plugin manager operations.
#[derive(Error, Debug)]
pub enum PluginError {
    /// A public method was called with an invalid plugin name.
    #[error("invalid plugin name '{name}': {reason}")]
    InvalidPluginName {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The requested name+selector could not be located by any fetcher.
    #[error("package '{name}' not found for selector '{selector}'")]
    NotFound {
        /// Package name.
        name: String,
        /// The selector that failed to resolve.
        selector: String,
    },

    /// A fetcher failed to download or resolve a package.
    #[error("failed to fetch '{name}': {reason}")]
    FetchFailed {
        /// Package name.
        name: String,
        /// Failure reason.
        reason: String,
    },

    /// A dependency's selector cannot be satisfied given host/static constraints.
    #[error("version conflict for '{name}': {reason}")]
    VersionConflict {
        /// Package name.
        name: String,
        /// Conflict detail.
        reason: String,
    },

    /// The store's file lock could not be acquired in time.
    #[error("lock busy: could not acquire store lock at '{}' within {wait_ms}ms", path.display())]
    LockBusy {
        /// The sentinel file path.
        path: PathBuf,
        /// How long the caller waited.
        wait_ms: u64,
    },

    /// Dependency graph construction or mutation failed.
    #[error("dependency graph error: {0}")]
    Graph(#[from] GraphError),

    /// The module loader could not resolve a `require` call.
    #[error("module not found: '{spec}' from '{}'", from.display())]
    ModuleNotFound {
        /// The require specifier.
        spec: String,
        /// The requiring file.
        from: PathBuf,
    },

    /// Plugin code threw during evaluation.
    #[error("execution error in '{}': {message}", file.display())]
    ExecutionError {
        /// The file being executed.
        file: PathBuf,
        /// The thrown message.
        message: String,
    },

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure, typically while reading `package.json`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client failure from the registry or git-host fetchers.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Semver parsing or range failure.
    #[error("semver error: {0}")]
    Semver(#[from] semver::Error),

    /// Generic operation error with free-form context, used for conditions that
    /// don't warrant their own variant.
    #[error("operation failed: {operation} - {reason}")]
    Operation {
        /// The operation that failed.
        operation: String,
        /// The reason for failure.
        reason: String,
    },
}

/// Dependency-graph-specific errors.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A cycle was detected while linking dependencies.
    #[error("circular dependency detected: {cycle:?}")]
    CircularDependency {
        /// The (name, version) chain that forms the cycle.
        cycle: Vec<String>,
    },

    /// An edge referenced a (name, version) not present in the store.
    #[error("edge target ({name}@{version}) is not present in the versioned store")]
    DanglingEdge {
        /// Target package name.
        name: String,
        /// Target version.
        version: String,
    },
}

/// Result alias used throughout the crate.
pub type PluginResult<T> = Result<T, PluginError>;

impl PluginError {
    /// Builds a generic [`PluginError::Operation`] with context.
    #[must_use]
    pub fn operation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Operation { operation: operation.into(), reason: reason.into() }
    }

    /// True if this is a [`PluginError::LockBusy`].
    #[must_use]
    pub fn is_lock_busy(&self) -> bool {
        matches!(self, Self::LockBusy { .. })
    }

    /// True if this is a [`PluginError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True if this is a [`PluginError::FetchFailed`] or [`PluginError::NotFound`] — the
    /// two kinds an `optionalDependencies` install is allowed to swallow.
    #[must_use]
    pub fn is_swallowable_for_optional(&self) -> bool {
        matches!(self, Self::FetchFailed { .. } | Self::NotFound { .. })
    }
}
