//! dscsym - private symbol resolution for the dyld shared cache.
//!
//! Dylibs in the shared cache have their local symbol tables stripped from
//! the copy the loader maps into each process. The symbols still exist in a
//! separate region of the cache file on disk. This crate finds that file,
//! lines it up with the cache mapped into the current process (which is
//! slid), and answers two questions:
//!
//! - does an address range belong to the shared cache?
//! - what are the local symbols of a loaded cached image?
//!
//! # Example
//!
//! ```no_run
//! use dscsym::RuntimeAddr;
//!
//! fn main() -> dscsym::Result<()> {
//!     let ctx = dscsym::init()?;
//!
//!     let image_header = RuntimeAddr(0x1_9a2b_c000);
//!     let symbols = ctx.find_local_symbols(image_header)?;
//!     for sym in symbols.iter() {
//!         println!("{} {:?}", sym.address, sym.name_str());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! The free functions below ([`contains`], [`with_local_symbols`],
//! [`resolve_symbol`]) look the process-wide context up on every call, which
//! takes a short lock. A built [`SharedCacheContext`] is immutable, so hot
//! paths should hold on to the `Arc` returned by [`init`] and query it
//! directly without any locking.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dyld;
pub mod error;
pub mod macho;
pub mod util;

// Re-export main types
pub use dyld::{
    locate_runtime_cache, open_cache_file, CachePlatform, LocalSymbol, LocalSymbols,
    ResolverOptions, RuntimeAddr, RuntimeCache, SharedCacheContext, Slide, SystemPlatform,
    UnslidAddr,
};
pub use error::{Error, Result};
pub use macho::Nlist64;

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

/// The context shared by the whole process, once built.
static CONTEXT: Mutex<Option<Arc<SharedCacheContext>>> = Mutex::new(None);

/// Builds the process-wide context for the running system, or returns the
/// one already built.
pub fn init() -> Result<Arc<SharedCacheContext>> {
    init_with(&SystemPlatform, &ResolverOptions::default())
}

/// Builds the process-wide context from `platform` and `options`, or returns
/// the one already built.
///
/// Construction happens at most once: concurrent callers wait for the first
/// one and share its context. A failed build is not remembered, so a later
/// call tries again.
pub fn init_with<P: CachePlatform + ?Sized>(
    platform: &P,
    options: &ResolverOptions,
) -> Result<Arc<SharedCacheContext>> {
    let mut slot = CONTEXT.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(ctx) = slot.as_ref() {
        return Ok(Arc::clone(ctx));
    }

    let ctx = Arc::new(SharedCacheContext::build(platform, options)?);
    *slot = Some(Arc::clone(&ctx));
    Ok(ctx)
}

/// Returns the process-wide context, if one has been built.
///
/// Each call takes the context lock briefly; keep the returned `Arc` rather
/// than calling this per query.
pub fn shared_context() -> Option<Arc<SharedCacheContext>> {
    CONTEXT
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Drops the process-wide context.
///
/// The local symbols mapping is released once every outstanding `Arc`
/// returned by [`init`] or [`shared_context`] is gone. Returns true if a
/// context was installed.
pub fn teardown() -> bool {
    let previous = CONTEXT.lock().unwrap_or_else(PoisonError::into_inner).take();
    if previous.is_some() {
        debug!("tore down shared cache context");
    }
    previous.is_some()
}

/// Returns true if `[addr, addr + length)` lies inside the process's shared
/// cache.
///
/// Uses the process-wide context when built, and otherwise the bare runtime
/// cache, so it works even where local symbols are unavailable.
pub fn contains(addr: u64, length: u64) -> bool {
    contains_with(&SystemPlatform, addr, length)
}

/// Like [`contains`], but falls back to the runtime cache of `platform` when
/// no process-wide context has been built.
///
/// A process without a shared cache contains nothing.
pub fn contains_with<P: CachePlatform + ?Sized>(platform: &P, addr: u64, length: u64) -> bool {
    let addr = RuntimeAddr(addr);
    match shared_context() {
        Some(ctx) => ctx.contains(addr, length),
        None => platform
            .runtime_cache()
            .is_ok_and(|cache| cache.contains(addr, length)),
    }
}

/// Runs `f` over the local symbols of the image whose mach header is mapped
/// at `image_header`, using the process-wide context.
///
/// Fails with [`Error::CacheAbsent`] if no context has been built.
pub fn with_local_symbols<R>(image_header: u64, f: impl FnOnce(LocalSymbols<'_>) -> R) -> Result<R> {
    let ctx = shared_context().ok_or(Error::CacheAbsent)?;
    let symbols = ctx.find_local_symbols(RuntimeAddr(image_header))?;
    Ok(f(symbols))
}

/// Resolves the private symbol `name` of the image at `image_header` using
/// the process-wide context.
pub fn resolve_symbol(image_header: u64, name: &str) -> Result<Option<u64>> {
    let ctx = shared_context().ok_or(Error::CacheAbsent)?;
    Ok(ctx
        .resolve_symbol(RuntimeAddr(image_header), name)?
        .map(RuntimeAddr::get))
}
