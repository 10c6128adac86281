//! Synthetic shared caches for tests.

use std::path::PathBuf;
use std::ptr::NonNull;

use zerocopy::{FromZeros, IntoBytes};

use super::runtime::CachePlatform;
use super::structs::*;
use crate::macho::{Nlist64, N_FUN, N_SECT};

/// File offset the local symbols region is placed at.
pub const LOCAL_SYMBOLS_OFFSET: u64 = 0x2000;

/// A cache image that can be rendered both as the header the loader maps
/// into a process and as the file on disk.
#[derive(Debug, Clone)]
pub struct CacheImage {
    pub mappings: Vec<DyldCacheMappingInfo>,
    pub entries: Vec<DyldCacheLocalSymbolsEntry>,
    pub nlists: Vec<Nlist64>,
    pub strings: Vec<u8>,
    pub local_symbols_offset: u64,
    /// Report a zero-sized local symbols region in the header.
    pub strip_local_symbols: bool,
    /// Overrides the declared local symbols size.
    pub declared_local_symbols_size: Option<u64>,
    /// Overrides the entry count recorded in the info header.
    pub declared_entries_count: Option<u32>,
}

impl CacheImage {
    pub fn with_mappings(mappings: &[(u64, u64)]) -> Self {
        let mut file_offset = 0;
        let mappings = mappings
            .iter()
            .map(|&(address, size)| {
                let mapping = DyldCacheMappingInfo {
                    address,
                    size,
                    file_offset,
                    max_prot: 5,
                    init_prot: 5,
                };
                file_offset += size;
                mapping
            })
            .collect();

        Self {
            mappings,
            entries: Vec::new(),
            nlists: Vec::new(),
            strings: vec![0],
            local_symbols_offset: LOCAL_SYMBOLS_OFFSET,
            strip_local_symbols: false,
            declared_local_symbols_size: None,
            declared_entries_count: None,
        }
    }

    /// A two-mapping cache whose local symbols hold `count` symbols named
    /// `_sym0`, `_sym1`, ... with values `0x1_8000_1000 + 0x10 * i`.
    pub fn with_symbols(count: u32) -> Self {
        let mut image = Self::with_mappings(&[(0x1_8000_0000, 0x10_0000), (0x1_8010_0000, 0x8_0000)]);
        for i in 0..count {
            image.push_symbol(&format!("_sym{i}"), N_SECT, 0x1_8000_1000 + 0x10 * u64::from(i));
        }
        image
    }

    pub fn push_symbol(&mut self, name: &str, n_type: u8, value: u64) {
        let n_strx = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        self.nlists.push(Nlist64 {
            n_strx,
            n_type,
            n_sect: if n_type == N_FUN { 0 } else { 1 },
            n_desc: 0,
            n_value: value,
        });
    }

    pub fn push_entry(&mut self, dylib_offset: u32, nlist_start_index: u32, nlist_count: u32) {
        self.entries.push(DyldCacheLocalSymbolsEntry {
            dylib_offset,
            nlist_start_index,
            nlist_count,
        });
    }

    /// The local symbols region: info header, entries, nlists, strings.
    pub fn local_symbols_bytes(&self) -> Vec<u8> {
        let entries_offset = DyldCacheLocalSymbolsInfo::SIZE;
        let entries_end = entries_offset + self.entries.len() * DyldCacheLocalSymbolsEntry::SIZE;
        let nlist_offset = entries_end.next_multiple_of(8);
        let strings_offset = nlist_offset + self.nlists.len() * Nlist64::SIZE;

        let info = DyldCacheLocalSymbolsInfo {
            nlist_offset: nlist_offset as u32,
            nlist_count: self.nlists.len() as u32,
            strings_offset: strings_offset as u32,
            strings_size: self.strings.len() as u32,
            entries_offset: entries_offset as u32,
            entries_count: self
                .declared_entries_count
                .unwrap_or(self.entries.len() as u32),
        };

        let mut out = Vec::new();
        out.extend_from_slice(info.as_bytes());
        for entry in &self.entries {
            out.extend_from_slice(entry.as_bytes());
        }
        out.resize(nlist_offset, 0);
        for nlist in &self.nlists {
            out.extend_from_slice(nlist.as_bytes());
        }
        out.extend_from_slice(&self.strings);
        out
    }

    pub fn header(&self) -> DyldCacheHeader {
        let mut header = DyldCacheHeader::new_zeroed();
        header.magic = *b"dyld_v1   arm64e";
        header.mapping_offset = DyldCacheHeader::SIZE as u32;
        header.mapping_count = self.mappings.len() as u32;
        header.local_symbols_offset = self.local_symbols_offset;
        header.local_symbols_size = if self.strip_local_symbols {
            0
        } else {
            self.declared_local_symbols_size
                .unwrap_or(self.local_symbols_bytes().len() as u64)
        };
        header.uuid = [0xAB; 16];
        header
    }

    /// The header and mapping table as the loader maps them.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut out = self.header().as_bytes().to_vec();
        for mapping in &self.mappings {
            out.extend_from_slice(mapping.as_bytes());
        }
        out
    }

    /// The full cache file.
    pub fn file_bytes(&self) -> Vec<u8> {
        let mut out = self.header_bytes();
        out.resize(self.local_symbols_offset as usize, 0);
        if !self.strip_local_symbols {
            out.extend_from_slice(&self.local_symbols_bytes());
        }
        out
    }
}

/// A platform whose shared cache is a header held in a test buffer.
pub struct FakePlatform {
    pub runtime: Option<Vec<u8>>,
    pub path: Option<PathBuf>,
}

impl FakePlatform {
    pub fn new(image: &CacheImage, path: Option<PathBuf>) -> Self {
        Self {
            runtime: Some(image.header_bytes()),
            path,
        }
    }

    pub fn without_cache(path: Option<PathBuf>) -> Self {
        Self {
            runtime: None,
            path,
        }
    }
}

// SAFETY: the base points into `runtime`, which holds a complete header and
// mapping table and lives as long as the platform.
unsafe impl CachePlatform for FakePlatform {
    fn shared_cache_base(&self) -> Option<NonNull<u8>> {
        self.runtime
            .as_ref()
            .and_then(|bytes| NonNull::new(bytes.as_ptr() as *mut u8))
    }

    fn shared_cache_file_path(&self) -> Option<PathBuf> {
        self.path.clone()
    }
}
