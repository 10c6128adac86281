//! Dyld shared cache binary structures.
//!
//! These structures match the on-disk format of Apple's dyld shared cache.
//! They are designed for zero-copy parsing using the `zerocopy` crate. The
//! same layout is used for the header mapped into a running process and the
//! header at the start of the cache file.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::macho::VmProt;

// =============================================================================
// Header Structures
// =============================================================================

/// Leading part of the dyld shared cache header.
///
/// The real header keeps growing with every OS release; only the fields up to
/// and including `uuid` are stable across every cache that still carries an
/// in-file local symbols region, so that is all we read.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldCacheHeader {
    /// Magic identifier, e.g., "dyld_v1   arm64e"
    pub magic: [u8; 16],
    /// File offset to first `DyldCacheMappingInfo`
    pub mapping_offset: u32,
    /// Number of mapping entries
    pub mapping_count: u32,
    /// Legacy: file offset to `DyldCacheImageInfo` array
    pub images_offset_old: u32,
    /// Legacy: number of images
    pub images_count_old: u32,
    /// Base address of dyld when cache was built
    pub dyld_base_address: u64,
    /// File offset of code signature
    pub code_signature_offset: u64,
    /// Size of code signature
    pub code_signature_size: u64,
    /// Legacy: slide info offset
    pub slide_info_offset_unused: u64,
    /// Legacy: slide info size
    pub slide_info_size_unused: u64,
    /// File offset of local symbols info
    pub local_symbols_offset: u64,
    /// Size of local symbols info
    pub local_symbols_size: u64,
    /// UUID of this cache
    pub uuid: [u8; 16],
}

impl DyldCacheHeader {
    /// Size of the header prefix in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Returns the architecture from the magic string.
    pub fn architecture(&self) -> &str {
        let magic_str = std::str::from_utf8(&self.magic).unwrap_or("");
        magic_str
            .trim_end_matches('\0')
            .trim_start_matches("dyld_v0")
            .trim_start_matches("dyld_v1")
            .trim()
    }

    /// Returns true if this cache carries an in-file local symbols region.
    ///
    /// Caches built without one (or that moved it into a separate
    /// `.symbols` file) report a size of zero.
    pub fn has_local_symbols(&self) -> bool {
        self.local_symbols_size != 0
    }
}

// =============================================================================
// Mapping Structures
// =============================================================================

/// Basic mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldCacheMappingInfo {
    /// Unslid virtual memory address
    pub address: u64,
    /// Size in bytes
    pub size: u64,
    /// File offset
    pub file_offset: u64,
    /// Maximum memory protection
    pub max_prot: u32,
    /// Initial memory protection
    pub init_prot: u32,
}

impl DyldCacheMappingInfo {
    /// Size of a mapping record in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Returns the first unslid address past this mapping.
    #[inline]
    pub fn end(&self) -> u64 {
        self.address.wrapping_add(self.size)
    }

    /// Returns the initial protection of this mapping.
    #[inline]
    pub fn protection(&self) -> VmProt {
        VmProt::from_bits_truncate(self.init_prot)
    }
}

// =============================================================================
// Local Symbols
// =============================================================================

/// Local symbols information header.
///
/// All offsets are relative to the start of this structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldCacheLocalSymbolsInfo {
    /// Offset to nlist array (from start of this struct)
    pub nlist_offset: u32,
    /// Number of nlist entries
    pub nlist_count: u32,
    /// Offset to string pool
    pub strings_offset: u32,
    /// Size of string pool
    pub strings_size: u32,
    /// Offset to per-dylib entries
    pub entries_offset: u32,
    /// Number of entries
    pub entries_count: u32,
}

impl DyldCacheLocalSymbolsInfo {
    /// Size of the info header in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Per-dylib local symbol entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldCacheLocalSymbolsEntry {
    /// Offset of the dylib's mach header from the cache base
    pub dylib_offset: u32,
    /// Index into nlist array
    pub nlist_start_index: u32,
    /// Number of nlist entries for this dylib
    pub nlist_count: u32,
}

impl DyldCacheLocalSymbolsEntry {
    /// Size of an entry in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

// =============================================================================
// Display Implementations
// =============================================================================

impl fmt::Display for DyldCacheHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DyldCache {{ arch: {}, uuid: {}, mappings: {} }}",
            self.architecture(),
            uuid_to_string(&self.uuid),
            self.mapping_count
        )
    }
}

/// Formats a UUID as a hex string.
pub fn uuid_to_string(uuid: &[u8; 16]) -> String {
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        uuid[0], uuid[1], uuid[2], uuid[3],
        uuid[4], uuid[5],
        uuid[6], uuid[7],
        uuid[8], uuid[9],
        uuid[10], uuid[11], uuid[12], uuid[13], uuid[14], uuid[15]
    )
}
