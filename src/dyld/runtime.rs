//! The shared cache as mapped into the running process.
//!
//! The OS loader maps the cache into every process; we never map or unmap
//! it ourselves. A [`RuntimeCache`] is a snapshot of the header and mapping
//! table taken from that live image, which is all the containment check
//! needs.

use std::borrow::Cow;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::OnceLock;

use tracing::{debug, warn};
use zerocopy::FromBytes;

use super::address::{RuntimeAddr, Slide, UnslidAddr};
use super::structs::*;
use crate::error::{Error, Result};
use crate::util::table_range;

// =============================================================================
// Platform Access
// =============================================================================

/// Source of the two facts only the platform knows: where the cache is
/// mapped, and where its file lives.
///
/// # Safety
///
/// A base returned by [`CachePlatform::shared_cache_base`] must point at a
/// readable dyld cache header followed (at `mapping_offset`) by its mapping
/// table, and must stay mapped for as long as any context built from it is
/// alive.
pub unsafe trait CachePlatform {
    /// Returns the in-memory base of the shared cache, or `None` when the
    /// process has no shared cache mapped.
    fn shared_cache_base(&self) -> Option<NonNull<u8>>;

    /// Returns the path the platform reports for the cache file, if any.
    fn shared_cache_file_path(&self) -> Option<PathBuf> {
        None
    }

    /// Returns a snapshot of the cache mapped into the process.
    ///
    /// The default reads the header at [`CachePlatform::shared_cache_base`]
    /// on every call. Platforms with a process-wide snapshot hand that out
    /// instead.
    fn runtime_cache(&self) -> Result<Cow<'_, RuntimeCache>> {
        RuntimeCache::locate(self).map(Cow::Owned)
    }
}

/// The platform of the running process.
///
/// On Apple targets this asks the kernel for the shared region and dyld for
/// the cache path. Elsewhere there is never a shared cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPlatform;

#[cfg(target_vendor = "apple")]
mod sys {
    use libc::{c_char, c_int};

    extern "C" {
        pub fn __shared_region_check_np(start_address: *mut u64) -> c_int;
        pub fn dyld_shared_cache_file_path() -> *const c_char;
    }
}

#[cfg(target_vendor = "apple")]
unsafe impl CachePlatform for SystemPlatform {
    fn shared_cache_base(&self) -> Option<NonNull<u8>> {
        let mut start: u64 = 0;
        // SAFETY: the syscall only writes the start address through the pointer.
        let rc = unsafe { sys::__shared_region_check_np(&mut start) };
        if rc != 0 {
            debug!(rc, "no shared region mapped");
            return None;
        }
        NonNull::new(start as usize as *mut u8)
    }

    fn shared_cache_file_path(&self) -> Option<PathBuf> {
        // SAFETY: dyld returns either NULL or a static NUL-terminated string.
        let raw = unsafe { sys::dyld_shared_cache_file_path() };
        if raw.is_null() {
            return None;
        }
        let path = unsafe { std::ffi::CStr::from_ptr(raw) };
        Some(PathBuf::from(path.to_string_lossy().into_owned()))
    }

    fn runtime_cache(&self) -> Result<Cow<'_, RuntimeCache>> {
        locate_runtime_cache().map(Cow::Borrowed).ok_or(Error::CacheAbsent)
    }
}

#[cfg(not(target_vendor = "apple"))]
unsafe impl CachePlatform for SystemPlatform {
    fn shared_cache_base(&self) -> Option<NonNull<u8>> {
        None
    }

    fn runtime_cache(&self) -> Result<Cow<'_, RuntimeCache>> {
        locate_runtime_cache().map(Cow::Borrowed).ok_or(Error::CacheAbsent)
    }
}

// =============================================================================
// Runtime Cache
// =============================================================================

/// Header and mapping table of the cache mapped into this process.
#[derive(Debug, Clone)]
pub struct RuntimeCache {
    base: RuntimeAddr,
    header: DyldCacheHeader,
    mappings: Vec<DyldCacheMappingInfo>,
    slide: Slide,
}

impl RuntimeCache {
    /// Finds the cache mapped into the process described by `platform`.
    ///
    /// Returns [`Error::CacheAbsent`] when the platform reports no cache.
    pub fn locate<P: CachePlatform + ?Sized>(platform: &P) -> Result<Self> {
        let base = platform.shared_cache_base().ok_or(Error::CacheAbsent)?;
        // SAFETY: guaranteed by the `CachePlatform` contract.
        unsafe { Self::from_base(base) }
    }

    /// Reads the header and mapping table of a cache mapped at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point at a readable cache header whose mapping table is
    /// readable as well.
    pub unsafe fn from_base(base: NonNull<u8>) -> Result<Self> {
        let ptr = base.as_ptr() as *const u8;
        let header_bytes = unsafe { std::slice::from_raw_parts(ptr, DyldCacheHeader::SIZE) };
        let (header, _) = DyldCacheHeader::read_from_prefix(header_bytes)
            .map_err(|_| Error::parse(0, "failed to parse runtime cache header"))?;

        let mappings = table_range(
            u64::from(header.mapping_offset),
            u64::from(header.mapping_count),
            DyldCacheMappingInfo::SIZE as u64,
            u64::MAX,
        )
        .ok_or_else(|| Error::parse(header.mapping_offset as usize, "mapping table overflows"))?;

        let len = mappings.end.max(DyldCacheHeader::SIZE);
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        Self::parse(RuntimeAddr::from_ptr(ptr), bytes)
    }

    /// Parses a cache header and mapping table that live at `base` in this
    /// process. `bytes` is the memory starting at `base`.
    pub fn parse(base: RuntimeAddr, bytes: &[u8]) -> Result<Self> {
        let (header, _) = DyldCacheHeader::read_from_prefix(bytes)
            .map_err(|_| Error::buffer_too_small(DyldCacheHeader::SIZE, bytes.len()))?;

        let range = table_range(
            u64::from(header.mapping_offset),
            u64::from(header.mapping_count),
            DyldCacheMappingInfo::SIZE as u64,
            bytes.len() as u64,
        )
        .ok_or_else(|| {
            let needed = header.mapping_offset as usize
                + header.mapping_count as usize * DyldCacheMappingInfo::SIZE;
            Error::buffer_too_small(needed, bytes.len())
        })?;

        let mappings = bytes[range]
            .chunks_exact(DyldCacheMappingInfo::SIZE)
            .map(|chunk| {
                DyldCacheMappingInfo::read_from_bytes(chunk)
                    .map_err(|_| Error::parse(header.mapping_offset as usize, "failed to parse mapping"))
            })
            .collect::<Result<Vec<_>>>()?;

        let first = mappings.first().ok_or(Error::NoMappings)?;
        let slide = Slide::between(base, UnslidAddr(first.address));
        debug!(%base, %slide, mappings = mappings.len(), "located runtime shared cache");

        Ok(Self {
            base,
            header,
            mappings,
            slide,
        })
    }

    /// Returns the address the cache header is mapped at.
    #[inline]
    pub fn base(&self) -> RuntimeAddr {
        self.base
    }

    /// Returns the runtime header.
    #[inline]
    pub fn header(&self) -> &DyldCacheHeader {
        &self.header
    }

    /// Returns the declared mappings, in header order.
    #[inline]
    pub fn mappings(&self) -> &[DyldCacheMappingInfo] {
        &self.mappings
    }

    /// Returns the slide of this cache in the current process.
    #[inline]
    pub fn slide(&self) -> Slide {
        self.slide
    }

    /// Returns the UUID of the mapped cache.
    #[inline]
    pub fn uuid(&self) -> &[u8; 16] {
        &self.header.uuid
    }

    /// Returns true if `[addr, addr + length)` lies inside one of the cache's
    /// mappings.
    ///
    /// The end of the range must fall strictly before the end of the mapping,
    /// so a range ending exactly on a mapping boundary is not contained.
    pub fn contains(&self, addr: RuntimeAddr, length: u64) -> bool {
        let unslid_start = self.slide.unslide(addr).get();

        // Quick out if after end of cache.
        if let Some(last) = self.mappings.last() {
            if unslid_start > last.end() {
                return false;
            }
        }

        let Some(unslid_end) = unslid_start.checked_add(length) else {
            return false;
        };

        self.mappings
            .iter()
            .any(|m| unslid_start >= m.address && unslid_end < m.end())
    }
}

// =============================================================================
// Process-wide Lookup
// =============================================================================

static RUNTIME_CACHE: OnceLock<Option<RuntimeCache>> = OnceLock::new();

/// Returns the shared cache mapped into this process, if there is one.
///
/// The lookup runs once; every later call returns the same snapshot. This is
/// also what [`SystemPlatform`] hands to context construction.
pub fn locate_runtime_cache() -> Option<&'static RuntimeCache> {
    RUNTIME_CACHE
        .get_or_init(|| match RuntimeCache::locate(&SystemPlatform) {
            Ok(cache) => Some(cache),
            Err(Error::CacheAbsent) => None,
            Err(e) => {
                warn!("ignoring unreadable runtime shared cache: {e}");
                None
            }
        })
        .as_ref()
}
