//! Mach-O constants and flags.

use bitflags::bitflags;

// =============================================================================
// Symbol Types
// =============================================================================

/// If any of these bits set, a symbolic debugging entry
pub const N_STAB: u8 = 0xE0;
/// Private external symbol bit
pub const N_PEXT: u8 = 0x10;
/// Mask for the type bits
pub const N_TYPE: u8 = 0x0E;
/// External symbol bit
pub const N_EXT: u8 = 0x01;

/// Undefined symbol
pub const N_UNDF: u8 = 0x0;
/// Defined in section number n_sect
pub const N_SECT: u8 = 0xE;

// =============================================================================
// Stab Types
// =============================================================================

/// Procedure name (stab)
pub const N_FUN: u8 = 0x24;

// =============================================================================
// Memory Protection
// =============================================================================

bitflags! {
    /// VM protection bits as stored in cache mapping records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmProt: u32 {
        /// Readable
        const READ = 0x1;
        /// Writable
        const WRITE = 0x2;
        /// Executable
        const EXECUTE = 0x4;
    }
}

impl std::fmt::Display for VmProt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = if self.contains(VmProt::READ) { 'r' } else { '-' };
        let w = if self.contains(VmProt::WRITE) { 'w' } else { '-' };
        let x = if self.contains(VmProt::EXECUTE) { 'x' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}
