//! Error types for dump parsing and key reconciliation.
//!
//! Value and dump errors carry the offending text so an operator can find
//! the line in the export; I/O errors are wrapped as-is.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while reading, reconciling or persisting keys.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error while reading an export or a pairing record.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A registry value does not match its expected encoding.
    #[error("Malformed value {value:?}: {reason}")]
    MalformedValue {
        /// Raw value text as found in the export.
        value: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The normalized export text cannot be split into sections.
    #[error("Malformed dump at line {line}: {reason}")]
    MalformedDump {
        /// 1-based line number in the normalized text.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },

    /// The registry export tool failed or produced nothing.
    #[error("Registry export failed: {0}")]
    ExternalToolFailure(String),

    /// A MAC address could not be parsed.
    #[error("Invalid MAC address: {0:?}")]
    InvalidMacAddress(String),

    /// A BlueZ `info` file could not be parsed.
    #[error("Malformed pairing record {}: {reason}", path.display())]
    MalformedRecord {
        /// Path of the record.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// Backup or overwrite of a pairing record failed.
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        /// Path that was being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl SyncError {
    /// Creates a malformed value error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use bt_keysync::error::SyncError;
    /// let err = SyncError::malformed_value("hex:zz", "non-hex character");
    /// assert!(err.to_string().contains("hex:zz"));
    /// ```
    pub fn malformed_value(value: &str, reason: impl Into<String>) -> Self {
        Self::MalformedValue {
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a malformed dump error for a 1-based line number.
    pub fn malformed_dump(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedDump {
            line,
            reason: reason.into(),
        }
    }

    /// Creates a persistence error for the given path.
    pub fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}
