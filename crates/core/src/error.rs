//! Failure modes for cache construction and persistence.
//!
//! Lookup and store paths never surface these; tiers degrade to misses
//! and log instead. Errors are reserved for construction, index flushes,
//! and shutdown, where the caller can actually act on them.

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use std::path::Path;

use miette::Diagnostic;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures a cache operation can report.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// Rejected configuration.
    #[error("invalid cache configuration: {reason}")]
    #[diagnostic(code(dejavu::cache::config))]
    Configuration {
        /// Which constraint failed.
        reason: String,
    },

    /// Filesystem operation failed in the disk tier.
    #[error("{operation} failed for {}", path.display())]
    #[diagnostic(
        code(dejavu::cache::io),
        help("check permissions on the cache directory")
    )]
    Io {
        /// Operation that failed ("create", "write", "rename", ...).
        operation: &'static str,
        /// File or directory the operation touched.
        path: Box<Path>,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Index contents could not be encoded.
    #[error("cache index serialization failed: {reason}")]
    #[diagnostic(code(dejavu::cache::serialization))]
    Serialization {
        /// What the encoder reported.
        reason: String,
    },

    /// Persisted index exists but cannot be used.
    #[error("corrupt cache index at {}: {reason}", path.display())]
    #[diagnostic(
        code(dejavu::cache::corrupt_index),
        help("the disk tier starts cold when its index cannot be read")
    )]
    CorruptIndex {
        /// Location of the index file.
        path: Box<Path>,
        /// What made it unusable.
        reason: String,
    },
}

impl Error {
    /// Configuration rejection naming the failed constraint.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// I/O failure tagged with the touched path and operation.
    #[must_use]
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: &'static str) -> Self {
        Self::Io {
            operation,
            path: path.as_ref().into(),
            source,
        }
    }

    /// Index encoding failure.
    #[must_use]
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Unusable persisted index.
    #[must_use]
    pub fn corrupt_index(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            path: path.as_ref().into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_operation_and_path() {
        let err = Error::io(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            "/tmp/dejavu/index.json",
            "write",
        );
        assert_eq!(err.to_string(), "write failed for /tmp/dejavu/index.json");
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err = Error::io(std::io::Error::other("boom"), "/cache", "rename");
        let source = std::error::Error::source(&err).expect("source attached");
        assert!(source.to_string().contains("boom"));
    }

    #[test]
    fn test_configuration_error_names_constraint() {
        let err = Error::configuration("memoryBudgetBytes must be non-zero");
        assert_eq!(
            err.to_string(),
            "invalid cache configuration: memoryBudgetBytes must be non-zero"
        );
    }

    #[test]
    fn test_corrupt_index_error_names_path_and_reason() {
        let err = Error::corrupt_index("/cache/index.json", "unsupported index version 9");
        let rendered = err.to_string();
        assert!(rendered.contains("/cache/index.json"));
        assert!(rendered.contains("unsupported index version 9"));
    }

    #[test]
    fn test_diagnostic_codes_are_namespaced() {
        let err = Error::configuration("bad");
        assert_eq!(
            Diagnostic::code(&err).expect("code attached").to_string(),
            "dejavu::cache::config"
        );
        let err = Error::serialization("bad");
        assert_eq!(
            Diagnostic::code(&err).expect("code attached").to_string(),
            "dejavu::cache::serialization"
        );
    }
}
