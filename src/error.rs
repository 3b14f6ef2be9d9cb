//! Error types for the plugin engine.
//!
//! Callers are expected to branch on the variant: the not-found and
//! ambiguity families are recoverable with corrected input, the
//! integrity family aborts the current operation without touching the
//! catalog, and [`Error::Batch`] carries the per-plugin outcome of a
//! partially failed batch install.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no discovery source named '{0}' is configured")]
    SourceNotFound(String),

    #[error("plugin '{name}' (target '{}') not found in any configured discovery source", .target.as_deref().unwrap_or("any"))]
    PluginNotFound {
        name: String,
        target: Option<String>,
    },

    #[error("plugin group '{0}' not found in any configured discovery source")]
    GroupNotFound(String),

    #[error("plugin '{name}' (target '{}') is not installed", .target.as_deref().unwrap_or("any"))]
    NotInstalled {
        name: String,
        target: Option<String>,
    },

    #[error("plugin '{name}' exists for multiple targets ({}); specify a target", .targets.join(", "))]
    AmbiguousTarget { name: String, targets: Vec<String> },

    #[error("version '{requested}' of '{subject}' not found; available versions: {}", .available.join(", "))]
    VersionNotFound {
        subject: String,
        requested: String,
        available: Vec<String>,
    },

    #[error("digest mismatch for plugin '{plugin}': expected {expected}, got {actual}")]
    DigestMismatch {
        plugin: String,
        expected: String,
        actual: String,
    },

    #[error("inventory snapshot '{}' is corrupt: {reason}", .path.display())]
    CorruptSnapshot { path: PathBuf, reason: String },

    #[error("plugin catalog '{}' is corrupt: {reason}", .path.display())]
    CorruptCatalog { path: PathBuf, reason: String },

    #[error("no cached snapshot for discovery source '{0}' and refresh was disabled")]
    CacheEmpty(String),

    #[error("catalog for {scope} is locked by another process{}", render_holder(.holder))]
    LockContention {
        scope: String,
        holder: Option<String>,
    },

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    External(#[from] anyhow::Error),
}

/// One failed plugin inside a batch install.
#[derive(Debug)]
pub struct BatchFailure {
    pub plugin: String,
    pub error: Error,
}

/// Aggregate outcome of a batch install where at least one plugin
/// failed. Plugins in `succeeded` are committed to the catalog and
/// stay installed.
#[derive(Debug)]
pub struct BatchError {
    pub succeeded: Vec<String>,
    pub failures: Vec<BatchFailure>,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.succeeded.len() + self.failures.len();
        write!(
            f,
            "{} of {} plugins failed to install: ",
            self.failures.len(),
            total
        )?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{} ({})", failure.plugin, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}

fn render_holder(holder: &Option<String>) -> String {
    match holder {
        Some(info) => format!(" ({info})"),
        None => String::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_not_found_display() {
        let err = Error::PluginNotFound {
            name: "secret".to_string(),
            target: None,
        };
        assert_eq!(
            err.to_string(),
            "plugin 'secret' (target 'any') not found in any configured discovery source"
        );

        let err = Error::PluginNotFound {
            name: "secret".to_string(),
            target: Some("kubernetes".to_string()),
        };
        assert!(err.to_string().contains("target 'kubernetes'"));
    }

    #[test]
    fn test_version_not_found_lists_available() {
        let err = Error::VersionNotFound {
            subject: "secret".to_string(),
            requested: "v9.9.9".to_string(),
            available: vec!["v0.0.6".to_string(), "v0.3.0".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("v9.9.9"));
        assert!(msg.contains("v0.0.6, v0.3.0"));
    }

    #[test]
    fn test_lock_contention_with_and_without_holder() {
        let err = Error::LockContention {
            scope: "standalone".to_string(),
            holder: Some("pid 4242 since 2026-08-25T10:00:00Z".to_string()),
        };
        assert!(err.to_string().contains("pid 4242"));

        let err = Error::LockContention {
            scope: "standalone".to_string(),
            holder: None,
        };
        assert_eq!(
            err.to_string(),
            "catalog for standalone is locked by another process"
        );
    }

    #[test]
    fn test_batch_error_display_counts_and_names() {
        let batch = BatchError {
            succeeded: vec![
                "alpha".to_string(),
                "bravo".to_string(),
                "delta".to_string(),
                "echo".to_string(),
            ],
            failures: vec![BatchFailure {
                plugin: "charlie".to_string(),
                error: Error::DigestMismatch {
                    plugin: "charlie".to_string(),
                    expected: "sha256:aa".to_string(),
                    actual: "sha256:bb".to_string(),
                },
            }],
        };
        let msg = batch.to_string();
        assert!(msg.starts_with("1 of 5 plugins failed"));
        assert!(msg.contains("charlie"));
        assert!(!msg.contains("alpha ("));
    }

    #[test]
    fn test_io_error_converts() {
        fn read_missing() -> Result<String> {
            Ok(std::fs::read_to_string("/definitely/not/here")?)
        }
        assert!(matches!(read_missing(), Err(Error::Io(_))));
    }
}
