//! Locating and opening the shared cache file on disk.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};

/// Directory holding the shared cache on iOS-family devices.
pub const IPHONE_DYLD_SHARED_CACHE_DIR: &str = "/System/Library/Caches/com.apple.dyld";

/// File name prefix of every shared cache file.
pub const DYLD_SHARED_CACHE_BASE_NAME: &str = "dyld_shared_cache_";

/// Architecture suffixes probed in order: the plain 64-bit cache first, then
/// the pointer-authentication variant.
pub const DEFAULT_ARCH_SUFFIXES: &[&str] = &["arm64", "arm64e"];

/// Options controlling where the cache file is looked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Open exactly this file, ignoring the platform's path and probing
    pub cache_path: Option<PathBuf>,
    /// Directory probed when no path is known
    pub cache_dir: PathBuf,
    /// File name prefix used when probing
    pub base_name: String,
    /// Architecture suffixes tried in order when probing
    pub arch_suffixes: Vec<String>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            cache_path: None,
            cache_dir: PathBuf::from(IPHONE_DYLD_SHARED_CACHE_DIR),
            base_name: DYLD_SHARED_CACHE_BASE_NAME.to_string(),
            arch_suffixes: DEFAULT_ARCH_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ResolverOptions {
    /// Sets an explicit cache file.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Sets the directory probed for cache files.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Sets the architecture suffixes probed, in order.
    pub fn with_arch_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arch_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the paths to try, in order.
    ///
    /// An explicit `cache_path` wins, then the path the platform declared.
    /// Only when neither is known is the cache directory probed.
    pub fn candidate_paths(&self, declared: Option<&Path>) -> Vec<PathBuf> {
        if let Some(path) = self.cache_path.as_deref().or(declared) {
            return vec![path.to_path_buf()];
        }
        self.arch_suffixes
            .iter()
            .map(|arch| self.cache_dir.join(format!("{}{}", self.base_name, arch)))
            .collect()
    }
}

/// An opened cache file.
#[derive(Debug)]
pub struct CacheFile {
    /// Open handle, read-only
    pub file: File,
    /// Path the handle was opened from
    pub path: PathBuf,
}

/// Opens the shared cache file.
///
/// Tries every candidate from [`ResolverOptions::candidate_paths`] and
/// returns the first one that opens.
pub fn open_cache_file(declared: Option<&Path>, options: &ResolverOptions) -> Result<CacheFile> {
    let candidates = options.candidate_paths(declared);
    for path in &candidates {
        match File::open(path) {
            Ok(file) => {
                info!("using shared cache file {}", path.display());
                return Ok(CacheFile {
                    file,
                    path: path.clone(),
                });
            }
            Err(e) => debug!("cannot open {}: {}", path.display(), e),
        }
    }
    Err(Error::NoCacheFile { tried: candidates })
}
