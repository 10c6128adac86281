//! Mach-O symbol table records.
//!
//! Only the pieces needed to decode the `nlist_64` entries stored in the
//! cache's local symbols region live here.

mod constants;
mod structs;

pub use constants::*;
pub use structs::*;
