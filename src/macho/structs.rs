//! Mach-O binary structures.
//!
//! These structures match the on-disk format of Mach-O files.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::constants::*;

/// 64-bit symbol table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Nlist64 {
    /// Index into string table
    pub n_strx: u32,
    /// Type flag
    pub n_type: u8,
    /// Section number, or 0 when not in any section
    pub n_sect: u8,
    /// Flags (see <mach-o/stab.h>)
    pub n_desc: u16,
    /// Value
    pub n_value: u64,
}

impl Nlist64 {
    /// Size of an nlist entry.
    pub const SIZE: usize = 16;

    /// Returns true if this is an external symbol.
    #[inline]
    pub fn is_external(&self) -> bool {
        (self.n_type & N_EXT) != 0
    }

    /// Returns true if this is a private external symbol.
    #[inline]
    pub fn is_private_external(&self) -> bool {
        (self.n_type & N_PEXT) != 0
    }

    /// Returns true if this is an undefined symbol.
    #[inline]
    pub fn is_undefined(&self) -> bool {
        !self.is_debug() && (self.n_type & N_TYPE) == N_UNDF
    }

    /// Returns true if this is a defined symbol.
    #[inline]
    pub fn is_defined(&self) -> bool {
        !self.is_debug() && (self.n_type & N_TYPE) == N_SECT
    }

    /// Returns true if this is a debugging symbol.
    #[inline]
    pub fn is_debug(&self) -> bool {
        (self.n_type & N_STAB) != 0
    }
}
