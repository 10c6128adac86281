//! Error types for shared cache symbol resolution.
//!
//! Construction failures are surfaced as distinct variants so callers can
//! tell "this platform never carries local symbols" apart from a genuine I/O
//! problem, and lookups report "not found" as an ordinary error value.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for shared cache operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== Discovery Errors ====================
    /// The process has no shared cache mapped.
    #[error("no dyld shared cache is mapped into this process")]
    CacheAbsent,

    /// None of the candidate cache files could be opened.
    #[error("no dyld shared cache file could be opened (tried {})", display_paths(.tried))]
    NoCacheFile { tried: Vec<PathBuf> },

    /// The cache was built without an in-file local symbols region.
    #[error("shared cache carries no local symbols region")]
    NoLocalSymbols,

    // ==================== I/O Errors ====================
    /// Mapping the local symbols region failed.
    #[error("failed to memory map local symbols of '{path}': {source}")]
    MapFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Cache Format Errors ====================
    /// The runtime header has an empty mapping table.
    #[error("runtime cache header declares no mappings")]
    NoMappings,

    /// The declared local symbols region does not fit in the file.
    #[error(
        "local symbols region {offset:#x}+{size:#x} lies outside the cache file (file size: {file_size:#x})"
    )]
    LocalSymbolsOutOfBounds {
        offset: u64,
        size: u64,
        file_size: u64,
    },

    /// A table inside the local symbols region does not fit in it.
    #[error("{table} at offset {offset:#x} ({len:#x} bytes) exceeds local symbols region ({available:#x} bytes)")]
    TableOutOfBounds {
        table: &'static str,
        offset: u64,
        len: u64,
        available: u64,
    },

    /// An image entry points past the end of the symbol table.
    #[error("symbol range {start}+{count} out of bounds (total: {total})")]
    SymbolRangeOutOfBounds { start: u32, count: u32, total: u32 },

    // ==================== Lookup Errors ====================
    /// No local symbols entry matches the image.
    #[error("image at {addr:#x} has no local symbols entry in the shared cache")]
    ImageNotFound { addr: u64 },

    // ==================== Parse Errors ====================
    /// Malformed data.
    #[error("parse error at offset {offset:#x}: {reason}")]
    Parse { offset: usize, reason: String },

    /// A buffer is shorter than the structure read from it.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// A specialized Result type for shared cache operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error is an ordinary negative answer rather than
    /// a fault.
    ///
    /// An image that was never part of the cache, or a process without a
    /// cache at all, simply has nothing to resolve.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ImageNotFound { .. } | Error::CacheAbsent)
    }

    /// Returns true if the platform cannot support local symbol resolution.
    ///
    /// Callers should fall back to exported symbols only.
    #[inline]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::NoLocalSymbols)
    }

    /// Creates a parse error with a formatted message.
    #[inline]
    pub fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Error::BufferTooSmall { needed, available }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "no candidates".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
