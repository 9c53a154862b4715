//! Error types for the ancalagon IL2CPP structure-recovery library.
//!
//! One crate-wide taxonomy. Most variants are terminal for a run;
//! `Unmapped`, `UnmappedOffset`, and `Truncated` are local faults that search
//! strategies catch and treat as "this candidate is invalid" rather than
//! propagating.

use thiserror::Error;

/// Main error type for ancalagon operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Unrecognized or explicitly unsupported container (e.g. fat Mach-O).
    #[error("unsupported binary format: {0}")]
    UnsupportedFormat(String),

    /// Malformed section/segment tables or container headers.
    #[error("corrupt image: {0}")]
    CorruptImage(String),

    /// No known struct layout for the resolved runtime version.
    #[error("unsupported IL2CPP version: {0}")]
    UnsupportedVersion(String),

    /// Memory-dump image whose load bias cannot be determined automatically.
    #[error("unable to automatically determine metadata address for dumped image (version {version})")]
    AmbiguousDumpAddress { version: String },

    /// Every locator strategy was exhausted without a consistent result.
    #[error("unable to locate CodeRegistration/MetadataRegistration (attempted: {})", attempted.join(", "))]
    StructuresNotFound { attempted: Vec<String> },

    /// Malformed global-metadata blob (bad sanity magic, truncated directory).
    #[error("invalid metadata blob: {0}")]
    InvalidMetadata(String),

    /// Virtual address outside every mapped record.
    #[error("address {addr:#x} is not mapped by any section record")]
    Unmapped { addr: u64 },

    /// File offset not backed by any mapped record.
    #[error("file offset {offset:#x} is not backed by any section record")]
    UnmappedOffset { offset: u64 },

    /// Read crossing past the end of the underlying buffer.
    #[error("truncated read at {offset:#x}: need {needed} bytes")]
    Truncated { offset: u64, needed: usize },

    /// File I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors from the diagnostics summary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for the faults a locator strategy must swallow while probing
    /// candidates (out-of-range pointer, read past the buffer end).
    pub fn is_local_fault(&self) -> bool {
        matches!(
            self,
            Error::Unmapped { .. } | Error::UnmappedOffset { .. } | Error::Truncated { .. }
        )
    }
}

/// Result type alias for ancalagon operations.
pub type Result<T> = std::result::Result<T, Error>;
