//! Views over one image's slice of the local symbol table.

use zerocopy::FromBytes;

use super::address::{RuntimeAddr, Slide, UnslidAddr};
use crate::macho::Nlist64;
use crate::util::cstr_at;

/// The local symbols of a single cached image.
///
/// Borrows the nlist records and the shared string pool straight out of the
/// mapped local symbols region. Both slices were bounds-checked when the
/// owning context was built.
#[derive(Debug, Clone, Copy)]
pub struct LocalSymbols<'a> {
    nlists: &'a [u8],
    strings: &'a [u8],
    start_index: u32,
    slide: Slide,
}

/// One decoded local symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSymbol<'a> {
    /// Symbol name, without the NUL terminator
    pub name: &'a [u8],
    /// The raw symbol table entry
    pub nlist: Nlist64,
    /// Where the symbol's value lives in this process
    pub address: RuntimeAddr,
}

impl<'a> LocalSymbols<'a> {
    pub(crate) fn new(nlists: &'a [u8], strings: &'a [u8], start_index: u32, slide: Slide) -> Self {
        debug_assert_eq!(nlists.len() % Nlist64::SIZE, 0);
        Self {
            nlists,
            strings,
            start_index,
            slide,
        }
    }

    /// Returns the number of symbols for this image.
    #[inline]
    pub fn len(&self) -> usize {
        self.nlists.len() / Nlist64::SIZE
    }

    /// Returns true if the image has no local symbols.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nlists.is_empty()
    }

    /// Returns the index of this image's first symbol in the cache-wide
    /// symbol table.
    #[inline]
    pub fn start_index(&self) -> u32 {
        self.start_index
    }

    /// Returns the raw `nlist_64` records for this image.
    #[inline]
    pub fn raw(&self) -> &'a [u8] {
        self.nlists
    }

    /// Returns the string pool shared by every image in the cache.
    #[inline]
    pub fn string_table(&self) -> &'a [u8] {
        self.strings
    }

    /// Returns the `index`th symbol record of this image.
    pub fn get(&self, index: usize) -> Option<Nlist64> {
        let offset = index.checked_mul(Nlist64::SIZE)?;
        let bytes = self.nlists.get(offset..offset.checked_add(Nlist64::SIZE)?)?;
        Nlist64::read_from_bytes(bytes).ok()
    }

    /// Returns the name stored at `strx` in the string pool.
    #[inline]
    pub fn name_at(&self, strx: u32) -> Option<&'a [u8]> {
        cstr_at(self.strings, strx as usize)
    }

    /// Iterates over the symbols of this image.
    ///
    /// Records whose name index points outside the string pool are yielded
    /// with an empty name.
    pub fn iter(&self) -> impl Iterator<Item = LocalSymbol<'a>> + 'a {
        let (nlists, strings, slide) = (self.nlists, self.strings, self.slide);
        nlists.chunks_exact(Nlist64::SIZE).filter_map(move |chunk| {
            let nlist = Nlist64::read_from_bytes(chunk).ok()?;
            let name = cstr_at(strings, nlist.n_strx as usize).unwrap_or_default();
            Some(LocalSymbol {
                name,
                nlist,
                address: slide.slide(UnslidAddr(nlist.n_value)),
            })
        })
    }

    /// Finds the first defined, non-debug symbol named `name`.
    ///
    /// `name` is matched verbatim, so C symbols need their leading
    /// underscore.
    pub fn find(&self, name: &str) -> Option<LocalSymbol<'a>> {
        self.iter()
            .find(|sym| sym.nlist.is_defined() && sym.name == name.as_bytes())
    }
}

impl LocalSymbol<'_> {
    /// Returns the name as UTF-8, if it is valid.
    pub fn name_str(&self) -> Option<&str> {
        std::str::from_utf8(self.name).ok()
    }
}
