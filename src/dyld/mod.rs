//! Dyld shared cache handling.
//!
//! The shared cache is mapped into every process by the loader, but the
//! per-image local (private) symbols are stripped from that in-memory copy
//! and only kept in the cache file on disk.
//!
//! # Resolution Flow
//!
//! 1. [`RuntimeCache`] snapshots the header and mappings of the cache mapped
//!    into this process and computes its slide.
//! 2. [`open_cache_file`] finds the matching cache file on disk.
//! 3. [`SharedCacheContext`] maps only the local symbols region of that file.
//! 4. Queries: [`SharedCacheContext::contains`] and
//!    [`SharedCacheContext::find_local_symbols`].

mod address;
mod context;
mod file;
mod runtime;
mod structs;
mod symbols;

#[cfg(test)]
pub(crate) mod fixture;

pub use address::*;
pub use context::*;
pub use file::*;
pub use runtime::*;
pub use structs::*;
pub use symbols::*;
