//! Error types for ssr-render.
//!
//! [`CacheError`] covers misuse of the cache primitive, [`RenderError`] is what
//! every render-path operation returns, and [`SecretError`] is raised while
//! provisioning the shared secret.

use std::path::PathBuf;

use thiserror::Error;

/// Programming errors against [`ByteBoundedCache`](crate::ByteBoundedCache).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache is already configured with {capacity_bytes} bytes; tear it down before reconfiguring")]
    AlreadyConfigured { capacity_bytes: usize },

    #[error("cache used before configure()")]
    NotConfigured,

    #[error("size must be specified when caching '{key}'")]
    MissingSize { key: String },
}

/// Coarse classification of a [`RenderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Cache misuse. Not recoverable at runtime.
    Configuration,
    /// The context could not be built or the entry could not be resolved.
    Build,
    /// The entry module failed while rendering; the context is still valid.
    Execution,
    /// The environment or the render worker itself misbehaved.
    Internal,
}

/// Errors produced while resolving a context or rendering against it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("syntax error in package '{identifier}' at line {line}, column {col}: {message}")]
    Syntax {
        identifier: String,
        message: String,
        line: u32,
        col: u32,
    },

    #[error("package '{identifier}' failed to load: {message}")]
    PackageLoad {
        identifier: String,
        message: String,
        traceback: String,
    },

    #[error("entry module not found: {path}")]
    EntryNotFound { path: String },

    #[error("entry module '{entry}' raised: {message}")]
    Execution {
        entry: String,
        message: String,
        traceback: String,
    },

    #[error("entry module '{entry}' returned {found} instead of markup")]
    InvalidMarkup { entry: String, found: String },

    #[error("execution environment error: {message}")]
    Environment { message: String },

    #[error("render worker is not running")]
    WorkerUnavailable,

    #[error("render worker panicked: {message}")]
    WorkerPanicked { message: String },
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::Cache(_) => ErrorKind::Configuration,
            RenderError::Syntax { .. }
            | RenderError::PackageLoad { .. }
            | RenderError::EntryNotFound { .. } => ErrorKind::Build,
            RenderError::Execution { .. } | RenderError::InvalidMarkup { .. } => {
                ErrorKind::Execution
            }
            RenderError::Environment { .. }
            | RenderError::WorkerUnavailable
            | RenderError::WorkerPanicked { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn environment(message: impl Into<String>) -> Self {
        RenderError::Environment {
            message: message.into(),
        }
    }
}

/// Failures while provisioning the shared secret. Fatal at startup.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("cannot read secret file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("secret file {} is empty", path.display())]
    Empty { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            RenderError::from(CacheError::NotConfigured).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            RenderError::EntryNotFound { path: "x".into() }.kind(),
            ErrorKind::Build
        );
        assert_eq!(
            RenderError::Execution {
                entry: "x".into(),
                message: "boom".into(),
                traceback: String::new(),
            }
            .kind(),
            ErrorKind::Execution
        );
        assert_eq!(RenderError::WorkerUnavailable.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_cache_error_is_transparent() {
        let err = RenderError::from(CacheError::MissingSize { key: "abc".into() });
        assert_eq!(err.to_string(), "size must be specified when caching 'abc'");
    }
}
