//! Address spaces of the shared cache.
//!
//! The cache describes itself with *unslid* addresses (the layout it was
//! built for), while the OS maps it at a randomized *runtime* address. The
//! two are separated by the slide. Keeping them as distinct types means the
//! only way to move between them is through [`Slide`].

use std::fmt;

/// An address as declared in the cache's own header and mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnslidAddr(pub u64);

/// An address in the current process's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeAddr(pub u64);

/// Difference between where the cache was loaded and where it was built for.
///
/// Stored as the two's complement difference so that a cache loaded below
/// its declared base still round-trips through `slide`/`unslide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slide(u64);

impl UnslidAddr {
    /// Returns the raw address value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl RuntimeAddr {
    /// Returns the raw address value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Builds a runtime address from a pointer.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        RuntimeAddr(ptr as usize as u64)
    }

    /// Returns the byte offset of `self` from `base`, or `None` if `self`
    /// lies below `base`.
    #[inline]
    pub fn offset_from(self, base: RuntimeAddr) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

impl Slide {
    /// No slide: runtime and unslid addresses coincide.
    pub const ZERO: Slide = Slide(0);

    /// Computes the slide between a runtime base and the declared address of
    /// the cache's first mapping.
    #[inline]
    pub fn between(runtime_base: RuntimeAddr, declared_base: UnslidAddr) -> Self {
        Slide(runtime_base.0.wrapping_sub(declared_base.0))
    }

    /// Converts a declared address to where it lives in this process.
    #[inline]
    pub fn slide(self, addr: UnslidAddr) -> RuntimeAddr {
        RuntimeAddr(addr.0.wrapping_add(self.0))
    }

    /// Converts a runtime address back to the cache's declared layout.
    #[inline]
    pub fn unslide(self, addr: RuntimeAddr) -> UnslidAddr {
        UnslidAddr(addr.0.wrapping_sub(self.0))
    }

    /// Returns the slide as a signed value.
    #[inline]
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for UnslidAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for RuntimeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Slide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.as_i64();
        if value < 0 {
            write!(f, "-{:#x}", value.unsigned_abs())
        } else {
            write!(f, "{:#x}", value)
        }
    }
}
