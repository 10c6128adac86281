//! Resolver context: the runtime cache paired with its on-disk local symbols.
//!
//! The in-memory copy of the cache has its local symbols stripped; they only
//! exist in the cache file. Building a context maps just that region of the
//! file and records where each table inside it lives, so lookups afterwards
//! are plain reads over immutable memory.

use std::ops::Range;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use tracing::{debug, warn};
use zerocopy::FromBytes;

use super::address::{RuntimeAddr, Slide};
use super::file::{open_cache_file, CacheFile, ResolverOptions};
use super::runtime::{CachePlatform, RuntimeCache};
use super::structs::*;
use super::symbols::LocalSymbols;
use crate::error::{Error, Result};
use crate::macho::Nlist64;
use crate::util::table_range;

// =============================================================================
// Local Symbols Region
// =============================================================================

/// The local symbols region of the cache file, mapped read-only.
///
/// The mapping starts at `file_offset` in the file, but offsets recorded in
/// the cache are relative to the start of the file, so every lookup goes
/// through [`LocalSymbolsRegion::at_file_offset`].
#[derive(Debug)]
struct LocalSymbolsRegion {
    mmap: Mmap,
    file_offset: u64,
}

impl LocalSymbolsRegion {
    fn map(cache_file: &CacheFile, offset: u64, size: u64) -> Result<Self> {
        let file_size = cache_file
            .file
            .metadata()
            .map_err(|e| Error::MapFailed {
                path: cache_file.path.clone(),
                source: e,
            })?
            .len();

        let out_of_bounds = || Error::LocalSymbolsOutOfBounds {
            offset,
            size,
            file_size,
        };
        match offset.checked_add(size) {
            Some(end) if end <= file_size => {}
            _ => return Err(out_of_bounds()),
        }
        let len = usize::try_from(size).map_err(|_| out_of_bounds())?;

        // SAFETY: the mapping is private and read-only; the cache file is a
        // sealed system file that is not modified while we hold it.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(len)
                .map_copy_read_only(&cache_file.file)
        }
        .map_err(|e| {
            warn!("mmap shared cache local symbols failed: {e}");
            Error::MapFailed {
                path: cache_file.path.clone(),
                source: e,
            }
        })?;

        Ok(Self {
            mmap,
            file_offset: offset,
        })
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Translates a cache file offset into an offset within the mapping.
    #[inline]
    fn at_file_offset(&self, offset: u64) -> Option<u64> {
        offset
            .checked_sub(self.file_offset)
            .filter(|&rel| rel <= self.mmap.len() as u64)
    }

    /// Locates a table of `count` records of `record_size` bytes starting at
    /// `offset` bytes past `base` (a region-relative position).
    fn table(
        &self,
        name: &'static str,
        base: u64,
        offset: u32,
        count: u32,
        record_size: usize,
    ) -> Result<Range<usize>> {
        let available = self.mmap.len() as u64;
        let start = base.saturating_add(u64::from(offset));
        table_range(start, u64::from(count), record_size as u64, available).ok_or(
            Error::TableOutOfBounds {
                table: name,
                offset: start,
                len: u64::from(count).saturating_mul(record_size as u64),
                available,
            },
        )
    }
}

// =============================================================================
// Shared Cache Context
// =============================================================================

/// Everything needed to answer queries about the process's shared cache.
///
/// Immutable once built; every query is a read over the runtime snapshot or
/// the mapped local symbols, so a context can be shared freely between
/// threads. Dropping it unmaps the local symbols region.
#[derive(Debug)]
pub struct SharedCacheContext {
    runtime: RuntimeCache,
    path: PathBuf,
    region: LocalSymbolsRegion,
    info: DyldCacheLocalSymbolsInfo,
    entries: Range<usize>,
    symbols: Range<usize>,
    strings: Range<usize>,
}

impl SharedCacheContext {
    /// Builds a context for the shared cache of the process described by
    /// `platform`.
    ///
    /// Fails with [`Error::NoCacheFile`] if no cache file opens,
    /// [`Error::CacheAbsent`] if no cache is mapped, [`Error::NoLocalSymbols`]
    /// if the cache was built without a local symbols region and
    /// [`Error::MapFailed`] if that region cannot be mapped.
    pub fn build<P: CachePlatform + ?Sized>(platform: &P, options: &ResolverOptions) -> Result<Self> {
        let declared = platform.shared_cache_file_path();
        let cache_file = open_cache_file(declared.as_deref(), options)?;
        let runtime = platform.runtime_cache()?.into_owned();
        Self::from_parts(runtime, &cache_file)
    }

    /// Builds a context from an already located runtime cache and an opened
    /// cache file.
    pub fn from_parts(runtime: RuntimeCache, cache_file: &CacheFile) -> Result<Self> {
        let header = runtime.header();
        if !header.has_local_symbols() {
            warn!("shared cache has no local symbols region");
            return Err(Error::NoLocalSymbols);
        }

        let offset = header.local_symbols_offset;
        let size = header.local_symbols_size;
        let region = LocalSymbolsRegion::map(cache_file, offset, size)?;

        // The info header sits at the very start of the region.
        let info_pos = region
            .at_file_offset(offset)
            .ok_or(Error::LocalSymbolsOutOfBounds {
                offset,
                size,
                file_size: offset.saturating_add(size),
            })?;
        let info_range = table_range(info_pos, 1, DyldCacheLocalSymbolsInfo::SIZE as u64, size)
            .ok_or(Error::TableOutOfBounds {
                table: "local symbols info",
                offset: info_pos,
                len: DyldCacheLocalSymbolsInfo::SIZE as u64,
                available: size,
            })?;
        let info = DyldCacheLocalSymbolsInfo::read_from_bytes(&region.bytes()[info_range])
            .map_err(|_| Error::parse(offset as usize, "failed to parse local symbols info"))?;

        let entries = region.table(
            "local symbols entries",
            info_pos,
            info.entries_offset,
            info.entries_count,
            DyldCacheLocalSymbolsEntry::SIZE,
        )?;
        let symbols = region.table(
            "symbol table",
            info_pos,
            info.nlist_offset,
            info.nlist_count,
            Nlist64::SIZE,
        )?;
        let strings = region.table("string table", info_pos, info.strings_offset, info.strings_size, 1)?;

        debug!(
            slide = %runtime.slide(),
            images = info.entries_count,
            symbols = info.nlist_count,
            strings = info.strings_size,
            "mapped shared cache local symbols"
        );

        Ok(Self {
            runtime,
            path: cache_file.path.clone(),
            region,
            info,
            entries,
            symbols,
            strings,
        })
    }

    /// Returns the runtime cache snapshot.
    #[inline]
    pub fn runtime(&self) -> &RuntimeCache {
        &self.runtime
    }

    /// Returns the path of the cache file the local symbols came from.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the slide of the cache in this process.
    #[inline]
    pub fn slide(&self) -> Slide {
        self.runtime.slide()
    }

    /// Returns the local symbols info header.
    #[inline]
    pub fn local_symbols_info(&self) -> &DyldCacheLocalSymbolsInfo {
        &self.info
    }

    /// Returns the number of images with a local symbols entry.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.entries.len() / DyldCacheLocalSymbolsEntry::SIZE
    }

    /// Iterates over the per-image local symbols entries.
    pub fn entries(&self) -> impl Iterator<Item = DyldCacheLocalSymbolsEntry> + '_ {
        self.region.bytes()[self.entries.clone()]
            .chunks_exact(DyldCacheLocalSymbolsEntry::SIZE)
            .filter_map(|chunk| DyldCacheLocalSymbolsEntry::read_from_bytes(chunk).ok())
    }

    /// Returns the raw cache-wide symbol table.
    #[inline]
    pub fn symbol_table(&self) -> &[u8] {
        &self.region.bytes()[self.symbols.clone()]
    }

    /// Returns the cache-wide string table.
    #[inline]
    pub fn string_table(&self) -> &[u8] {
        &self.region.bytes()[self.strings.clone()]
    }

    /// Returns true if `[addr, addr + length)` lies inside the cache.
    #[inline]
    pub fn contains(&self, addr: RuntimeAddr, length: u64) -> bool {
        self.runtime.contains(addr, length)
    }

    /// Returns the local symbols of the cached image whose mach header is
    /// mapped at `image_header`.
    ///
    /// Fails with [`Error::ImageNotFound`] when no entry matches, which is
    /// expected for images that are not part of the cache.
    pub fn find_local_symbols(&self, image_header: RuntimeAddr) -> Result<LocalSymbols<'_>> {
        let not_found = || Error::ImageNotFound {
            addr: image_header.get(),
        };
        let text_offset = image_header.offset_from(self.runtime.base()).ok_or_else(not_found)?;

        let entry = self
            .entries()
            .find(|e| u64::from(e.dylib_offset) == text_offset)
            .ok_or_else(not_found)?;

        let total = self.info.nlist_count;
        let out_of_bounds = || Error::SymbolRangeOutOfBounds {
            start: entry.nlist_start_index,
            count: entry.nlist_count,
            total,
        };
        let end = entry
            .nlist_start_index
            .checked_add(entry.nlist_count)
            .filter(|&end| end <= total)
            .ok_or_else(out_of_bounds)?;

        let table = self.symbol_table();
        let start = entry.nlist_start_index as usize * Nlist64::SIZE;
        let end = end as usize * Nlist64::SIZE;
        Ok(LocalSymbols::new(
            &table[start..end],
            self.string_table(),
            entry.nlist_start_index,
            self.slide(),
        ))
    }

    /// Resolves the private symbol `name` of the image mapped at
    /// `image_header` to its address in this process.
    ///
    /// Returns `Ok(None)` if the image is cached but has no such symbol.
    pub fn resolve_symbol(&self, image_header: RuntimeAddr, name: &str) -> Result<Option<RuntimeAddr>> {
        let symbols = self.find_local_symbols(image_header)?;
        Ok(symbols.find(name).map(|sym| sym.address))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::dyld::address::UnslidAddr;
    use crate::dyld::fixture::{CacheImage, FakePlatform};

    struct Fixture {
        platform: FakePlatform,
        options: ResolverOptions,
        _file: tempfile::NamedTempFile,
    }

    impl Fixture {
        fn new(image: &CacheImage) -> Self {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(&image.file_bytes()).unwrap();
            file.flush().unwrap();
            Self {
                platform: FakePlatform::new(image, Some(file.path().to_path_buf())),
                options: ResolverOptions::default(),
                _file: file,
            }
        }

        fn build(&self) -> Result<SharedCacheContext> {
            SharedCacheContext::build(&self.platform, &self.options)
        }
    }

    fn scenario_image() -> CacheImage {
        let mut image = CacheImage::with_symbols(16);
        image.push_entry(0x1000, 0, 10);
        image.push_entry(0x5000, 10, 5);
        image
    }

    #[test]
    fn test_build_maps_local_symbols() {
        let fixture = Fixture::new(&scenario_image());
        let ctx = fixture.build().unwrap();

        assert_eq!(ctx.image_count(), 2);
        assert_eq!(ctx.local_symbols_info().nlist_count, 16);
        assert_eq!(ctx.symbol_table().len(), 16 * Nlist64::SIZE);
        assert_eq!(&ctx.string_table()[..6], b"\0_sym0");

        let base = ctx.runtime().base();
        let expected = Slide::between(base, UnslidAddr(0x1_8000_0000));
        assert_eq!(ctx.slide(), expected);
    }

    #[test]
    fn test_find_local_symbols_scenario() {
        let fixture = Fixture::new(&scenario_image());
        let ctx = fixture.build().unwrap();
        let base = ctx.runtime().base().get();

        let syms = ctx.find_local_symbols(RuntimeAddr(base + 0x5000)).unwrap();
        assert_eq!(syms.start_index(), 10);
        assert_eq!(syms.len(), 5);
        let names: Vec<_> = syms.iter().map(|s| s.name_str().unwrap().to_string()).collect();
        assert_eq!(names, ["_sym10", "_sym11", "_sym12", "_sym13", "_sym14"]);

        let err = ctx.find_local_symbols(RuntimeAddr(base + 0x6000)).unwrap_err();
        assert!(matches!(err, Error::ImageNotFound { .. }));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_find_local_symbols_is_deterministic() {
        let fixture = Fixture::new(&scenario_image());
        let ctx = fixture.build().unwrap();
        let image = RuntimeAddr(ctx.runtime().base().get() + 0x1000);

        let first = ctx.find_local_symbols(image).unwrap();
        let second = ctx.find_local_symbols(image).unwrap();
        assert_eq!(first.raw().as_ptr(), second.raw().as_ptr());
        assert_eq!(first.len(), second.len());
        assert_eq!(first.start_index(), 0);
        assert_eq!(first.raw().as_ptr(), ctx.symbol_table().as_ptr());
    }

    #[test]
    fn test_image_below_cache_base_not_found() {
        let fixture = Fixture::new(&scenario_image());
        let ctx = fixture.build().unwrap();
        let below = RuntimeAddr(ctx.runtime().base().get() - 0x1000);
        assert!(matches!(
            ctx.find_local_symbols(below),
            Err(Error::ImageNotFound { .. })
        ));
    }

    #[test]
    fn test_first_matching_entry_wins() {
        let mut image = scenario_image();
        image.push_entry(0x5000, 0, 1);
        let fixture = Fixture::new(&image);
        let ctx = fixture.build().unwrap();
        let syms = ctx
            .find_local_symbols(RuntimeAddr(ctx.runtime().base().get() + 0x5000))
            .unwrap();
        assert_eq!(syms.start_index(), 10);
    }

    #[test]
    fn test_resolve_symbol_applies_slide() {
        let fixture = Fixture::new(&scenario_image());
        let ctx = fixture.build().unwrap();
        let image = RuntimeAddr(ctx.runtime().base().get() + 0x5000);

        let addr = ctx.resolve_symbol(image, "_sym12").unwrap().unwrap();
        assert_eq!(addr, ctx.slide().slide(UnslidAddr(0x1_8000_1000 + 0x10 * 12)));
        // Present in the cache but owned by a different image.
        assert_eq!(ctx.resolve_symbol(image, "_sym3").unwrap(), None);
    }

    #[test]
    fn test_entry_symbol_range_is_validated() {
        let mut image = CacheImage::with_symbols(4);
        image.push_entry(0x2000, 2, 3);
        let fixture = Fixture::new(&image);
        let ctx = fixture.build().unwrap();
        let err = ctx
            .find_local_symbols(RuntimeAddr(ctx.runtime().base().get() + 0x2000))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SymbolRangeOutOfBounds {
                start: 2,
                count: 3,
                total: 4
            }
        ));
    }

    #[test]
    fn test_contains_without_local_symbol_queries() {
        let fixture = Fixture::new(&scenario_image());
        let ctx = fixture.build().unwrap();
        let base = ctx.runtime().base();
        assert!(ctx.contains(base, 0x100));
        assert!(!ctx.contains(RuntimeAddr(base.get() + 0x18_0000), 1));
    }

    #[test]
    fn test_zero_local_symbols_size() {
        let mut image = scenario_image();
        image.strip_local_symbols = true;
        let fixture = Fixture::new(&image);
        let err = fixture.build().unwrap_err();
        assert!(matches!(err, Error::NoLocalSymbols));
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_no_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = scenario_image();
        let platform = FakePlatform::new(&image, None);
        let options = ResolverOptions::default().with_cache_dir(dir.path());
        let err = SharedCacheContext::build(&platform, &options).unwrap_err();
        match err {
            Error::NoCacheFile { tried } => assert_eq!(tried.len(), 2),
            other => panic!("expected NoCacheFile, got {other:?}"),
        }
    }

    #[test]
    fn test_no_runtime_cache() {
        let fixture = Fixture::new(&scenario_image());
        let platform = FakePlatform::without_cache(fixture.platform.path.clone());
        let err = SharedCacheContext::build(&platform, &fixture.options).unwrap_err();
        assert!(matches!(err, Error::CacheAbsent));
    }

    #[test]
    fn test_region_past_end_of_file() {
        let mut image = scenario_image();
        let real = image.local_symbols_bytes().len() as u64;
        image.declared_local_symbols_size = Some(real + 0x1000);
        let fixture = Fixture::new(&image);
        let err = fixture.build().unwrap_err();
        assert!(matches!(err, Error::LocalSymbolsOutOfBounds { .. }));
    }

    #[test]
    fn test_entries_table_past_region() {
        let mut image = scenario_image();
        image.declared_entries_count = Some(1000);
        let fixture = Fixture::new(&image);
        let err = fixture.build().unwrap_err();
        assert!(matches!(
            err,
            Error::TableOutOfBounds {
                table: "local symbols entries",
                ..
            }
        ));
    }

    #[test]
    fn test_region_too_small_for_info() {
        let mut image = scenario_image();
        image.declared_local_symbols_size = Some(8);
        let fixture = Fixture::new(&image);
        let err = fixture.build().unwrap_err();
        assert!(matches!(
            err,
            Error::TableOutOfBounds {
                table: "local symbols info",
                ..
            }
        ));
    }

    #[test]
    fn test_contexts_are_independent() {
        let fixture = Fixture::new(&scenario_image());
        let a = fixture.build().unwrap();
        let b = fixture.build().unwrap();
        assert_ne!(a.symbol_table().as_ptr(), b.symbol_table().as_ptr());
        drop(a);
        assert_eq!(b.image_count(), 2);
    }
}
