//! Utility functions for binary data processing.
//!
//! This module provides:
//! - Overflow-checked table range arithmetic for views into mapped memory
//! - SIMD-accelerated NUL searches (via memchr)
//! - Address parsing for the command line

use std::ops::Range;

// =============================================================================
// Table Ranges
// =============================================================================

/// Computes the byte range of a table of `count` records of `record_size`
/// bytes starting at `offset`.
///
/// Returns `None` if the arithmetic overflows or the table does not fit in a
/// buffer of `available` bytes.
#[inline]
pub fn table_range(offset: u64, count: u64, record_size: u64, available: u64) -> Option<Range<usize>> {
    let len = count.checked_mul(record_size)?;
    let end = offset.checked_add(len)?;
    if end > available {
        return None;
    }
    Some(usize::try_from(offset).ok()?..usize::try_from(end).ok()?)
}

// =============================================================================
// SIMD-Accelerated Byte Search
// =============================================================================

/// Finds the position of the first null byte in a slice.
///
/// Uses the `memchr` crate, which vectorizes the scan where the target
/// supports it.
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> usize {
    memchr::memchr(0, data).unwrap_or(data.len())
}

/// Returns the NUL-terminated byte string starting at `offset`, without the
/// terminator.
///
/// A string running off the end of `data` is truncated at the end of the
/// buffer. Returns `None` if `offset` is out of bounds.
#[inline]
pub fn cstr_at(data: &[u8], offset: usize) -> Option<&[u8]> {
    let bytes = data.get(offset..)?;
    Some(&bytes[..memchr_null(bytes)])
}

// =============================================================================
// Parsing
// =============================================================================

/// Parses an address given either as `0x`-prefixed hex or as plain hex.
pub fn parse_address(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits = digits.replace('_', "");
    u64::from_str_radix(&digits, 16).ok()
}
