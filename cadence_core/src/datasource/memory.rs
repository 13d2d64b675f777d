//! Byte regions backing data-source buffers.
//!
//! A region is a fixed-size run of `AtomicU8` cells. Brokers on different
//! threads copy in and out of the same region; configuration guarantees they
//! never touch the same bytes within a state, and relaxed byte atomics make
//! the remaining cross-state overlap (transition copies, external readers)
//! free of data races. Ordering between a transition and the next cycle is
//! provided by the buffer index (release on flip, acquire per cycle).

use std::fs::OpenOptions;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};

use memmap2::MmapMut;

enum Backing {
    Heap(Box<[AtomicU8]>),
    Mapped {
        base: NonNull<AtomicU8>,
        _map: MmapMut,
    },
}

/// One contiguous buffer of a data source.
pub struct MemoryRegion {
    len: usize,
    backing: Backing,
}

// SAFETY: a mapped region is only ever accessed through `&[AtomicU8]`, and
// its base pointer never changes after construction.
unsafe impl Send for MemoryRegion {}
unsafe impl Sync for MemoryRegion {}

impl MemoryRegion {
    /// Zero-filled heap region.
    pub fn heap(len: usize) -> Self {
        let cells: Box<[AtomicU8]> = (0..len).map(|_| AtomicU8::new(0)).collect();
        Self {
            len,
            backing: Backing::Heap(cells),
        }
    }

    /// Zero-filled anonymous mapping.
    pub fn anonymous(len: usize) -> std::io::Result<Self> {
        // Zero-length anonymous maps are rejected by the kernel.
        let map = MmapMut::map_anon(len.max(1))?;
        Ok(Self::from_map(map, len))
    }

    /// File-backed shared mapping, created or resized to `len` bytes and
    /// zero-filled.
    pub fn file(path: &Path, len: usize) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(len.max(1) as u64)?;
        // SAFETY: the file is owned by this data source for its lifetime;
        // external processes only read it.
        let map = unsafe { MmapMut::map_mut(&file)? };
        let region = Self::from_map(map, len);
        region.fill(0);
        Ok(region)
    }

    fn from_map(mut map: MmapMut, len: usize) -> Self {
        let base = NonNull::new(map.as_mut_ptr().cast::<AtomicU8>()).unwrap_or(NonNull::dangling());
        Self {
            len,
            backing: Backing::Mapped { base, _map: map },
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when backed by a memory mapping.
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped { .. })
    }

    /// The whole region as atomic cells.
    #[inline]
    pub fn cells(&self) -> &[AtomicU8] {
        match &self.backing {
            Backing::Heap(cells) => &cells[..],
            // SAFETY: `base` points at at least `len` initialised bytes of
            // `_map`, which lives as long as `self`. `AtomicU8` has the same
            // layout as `u8`, and every access goes through atomic operations.
            Backing::Mapped { base, .. } => unsafe {
                std::slice::from_raw_parts(base.as_ptr(), self.len)
            },
        }
    }

    /// Cells `[offset, offset + len)`, or `None` when out of bounds.
    #[inline]
    pub fn slice(&self, offset: usize, len: usize) -> Option<&[AtomicU8]> {
        let end = offset.checked_add(len)?;
        self.cells().get(offset..end)
    }

    /// Copy `src` into the region at `offset`. Returns false when out of
    /// bounds (nothing is written).
    pub fn write(&self, offset: usize, src: &[u8]) -> bool {
        match self.slice(offset, src.len()) {
            Some(dst) => {
                store_bytes(dst, src);
                true
            }
            None => false,
        }
    }

    /// Copy region bytes at `offset` into `dst`. Returns false when out of
    /// bounds (nothing is read).
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> bool {
        match self.slice(offset, dst.len()) {
            Some(src) => {
                load_bytes(dst, src);
                true
            }
            None => false,
        }
    }

    /// Set every byte to `value`.
    pub fn fill(&self, value: u8) {
        for c in self.cells() {
            c.store(value, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("len", &self.len)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

// ─── Byte copies ────────────────────────────────────────────────────

/// Copy plain bytes into atomic cells. Lengths must match.
#[inline]
pub fn store_bytes(dst: &[AtomicU8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter().zip(src) {
        d.store(*s, Ordering::Relaxed);
    }
}

/// Copy atomic cells into plain bytes. Lengths must match.
#[inline]
pub fn load_bytes(dst: &mut [u8], src: &[AtomicU8]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d = s.load(Ordering::Relaxed);
    }
}

/// Copy between two cell ranges (possibly of different regions).
#[inline]
pub fn copy_cells(dst: &[AtomicU8], src: &[AtomicU8]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter().zip(src) {
        d.store(s.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_region_is_zeroed_and_bounds_checked() {
        let r = MemoryRegion::heap(8);
        assert_eq!(r.len(), 8);
        let mut out = [0xFFu8; 8];
        assert!(r.read(0, &mut out));
        assert_eq!(out, [0; 8]);

        assert!(r.write(6, &[1, 2]));
        assert!(!r.write(7, &[1, 2]));
        assert!(r.slice(usize::MAX, 2).is_none());

        let mut two = [0u8; 2];
        assert!(r.read(6, &mut two));
        assert_eq!(two, [1, 2]);
    }

    #[test]
    fn empty_heap_region() {
        let r = MemoryRegion::heap(0);
        assert!(r.is_empty());
        assert!(r.cells().is_empty());
        assert!(r.write(0, &[]));
    }

    #[test]
    fn anonymous_region_round_trip() {
        let r = MemoryRegion::anonymous(16).unwrap();
        assert!(r.is_mapped());
        assert!(r.write(4, &42u32.to_ne_bytes()));
        let mut out = [0u8; 4];
        assert!(r.read(4, &mut out));
        assert_eq!(u32::from_ne_bytes(out), 42);
    }

    #[test]
    fn file_region_is_visible_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ds.bin");
        let r = MemoryRegion::file(&path, 4).unwrap();
        assert!(r.write(0, &[9, 8, 7, 6]));
        drop(r);
        assert_eq!(std::fs::read(&path).unwrap(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn copy_cells_between_regions() {
        let a = MemoryRegion::heap(4);
        let b = MemoryRegion::heap(4);
        a.write(0, &[1, 2, 3, 4]);
        copy_cells(b.slice(1, 2).unwrap(), a.slice(2, 2).unwrap());
        let mut out = [0u8; 4];
        b.read(0, &mut out);
        assert_eq!(out, [0, 3, 4, 0]);
    }
}
