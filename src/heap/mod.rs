//! Heap subsystem (spec §3.2, §4.1): a uniform abstraction over
//! malloc-backed and memory-mapped storage, with growth, shrink, save,
//! load, delete, and shared-ownership refcounting.
//!
//! Mirrors the teacher's `storage/slab` file-backed design but swaps the
//! slab's fixed-size-class allocation for a single growable byte region
//! per heap, and swaps `zstd`/in-file framing for `memmap2`-backed
//! mmap-shared / mmap-private storage, per spec §3.2.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, warn};

use crate::error::{self, Error, Result};

pub const PAGE_SIZE: usize = 4096;

fn round_up_to_page(n: usize) -> usize {
    n.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// Storage flavor of a heap (spec §3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Mem,
    MmapShared,
    MmapPrivate,
}

enum Buffer {
    Mem(Vec<u8>),
    Mmap(MmapMut),
}

impl Buffer {
    fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::Mem(v) => v,
            Buffer::Mmap(m) => &m[..],
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Buffer::Mem(v) => v,
            Buffer::Mmap(m) => &mut m[..],
        }
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// The mutable, lock-protected state of a heap.
pub struct HeapState {
    buffer: Buffer,
    /// Bytes reserved (capacity of `buffer`).
    pub size: usize,
    /// Bytes currently in use. Invariant: `free <= size`.
    pub free: usize,
    pub farm_id: u32,
    pub storage: StorageKind,
    /// Target storage after the next commit.
    pub newstorage: StorageKind,
    pub dirty: bool,
    /// Column id owning this heap; 0 means orphan.
    pub parentid: i64,
    /// Basename within the farm.
    pub filename: String,
    /// Delete backing files on last decref.
    pub remove: bool,
    path: Option<PathBuf>,
}

impl HeapState {
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.free]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let free = self.free;
        &mut self.buffer.as_mut_slice()[..free]
    }

    fn check_invariant(&self) -> Result<()> {
        if self.free > self.size {
            return Err(error::record(Error::InvariantViolation(format!(
                "heap {}: free {} exceeds size {}",
                self.filename, self.free, self.size
            ))));
        }
        Ok(())
    }
}

/// A named, reference-counted byte region (spec §3.2). Cloning a `Heap`
/// shares the underlying state (used by views); the explicit `incref`
/// /`decref` pair is the logical refcount the pool and views manage by
/// contract, kept independent from Rust's own `Arc` strong count per the
/// design notes in spec §9.
#[derive(Clone)]
pub struct Heap {
    state: Arc<RwLock<HeapState>>,
    refcount: Arc<AtomicUsize>,
}

impl Heap {
    /// `alloc(h, n_items, item_size)` (spec §4.1): selects mem or mmap
    /// storage up front based on the farm's configured threshold.
    pub fn alloc(
        farm_dir: &Path,
        filename: impl Into<String>,
        reserve_bytes: usize,
        mmap_threshold: usize,
        farm_id: u32,
    ) -> Result<Heap> {
        let filename = filename.into();
        let (buffer, storage, path) = if reserve_bytes < mmap_threshold {
            (Buffer::Mem(vec![0u8; reserve_bytes]), StorageKind::Mem, None)
        } else {
            let path = farm_dir.join(&filename);
            let buffer = Self::map_new_file(&path, reserve_bytes)?;
            (Buffer::Mmap(buffer), StorageKind::MmapShared, Some(path))
        };
        debug!(filename = %filename, reserve_bytes, ?storage, "allocated heap");
        Ok(Heap {
            state: Arc::new(RwLock::new(HeapState {
                buffer,
                size: reserve_bytes,
                free: 0,
                farm_id,
                storage,
                newstorage: storage,
                dirty: false,
                parentid: 0,
                filename,
                remove: false,
                path,
            })),
            refcount: Arc::new(AtomicUsize::new(1)),
        })
    }

    fn map_new_file(path: &Path, size: usize) -> Result<MmapMut> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(size as u64)?;
        // Safety: the file is exclusively owned by this heap instance at
        // creation time; concurrent access goes through `state`'s RwLock.
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(mmap)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HeapState> {
        self.state.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HeapState> {
        self.state.write().unwrap()
    }

    /// `extend(h, new_size, may_share)` (spec §4.1). May change `base`;
    /// callers must re-derive pointers (i.e. re-acquire the guard).
    pub fn extend(&self, new_size: usize, mmap_threshold: usize) -> Result<()> {
        let mut st = self.write();
        if new_size <= st.size {
            return Ok(());
        }
        let is_mem = matches!(st.buffer, Buffer::Mem(_));

        if is_mem && new_size < mmap_threshold {
            if let Buffer::Mem(v) = &mut st.buffer {
                v.resize(new_size, 0);
            }
        } else if is_mem {
            // Crossed the mmap threshold: write current contents to disk
            // and re-map (spec §4.1 `extend`, mem branch).
            let path = st
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from(&st.filename));
            let old_free = st.free;
            let old_bytes = st.buffer.as_slice()[..old_free].to_vec();
            let mut mapped = Self::map_new_file(&path, new_size)?;
            mapped[..old_bytes.len()].copy_from_slice(&old_bytes);
            // Point of no return: from here nothing can fail.
            st.buffer = Buffer::Mmap(mapped);
            st.storage = StorageKind::MmapShared;
            st.newstorage = StorageKind::MmapShared;
            st.path = Some(path);
        } else {
            let path = st.path.clone().ok_or_else(|| {
                error::record(Error::Corruption(format!(
                    "mmap heap {} has no backing path",
                    st.filename
                )))
            })?;
            let old_free = st.free;
            let old_bytes = st.buffer.as_slice()[..old_free].to_vec();
            // memmap2 has no portable in-place mremap; remap a new,
            // larger file and copy, matching the spec's documented
            // fallback path.
            let mapped = match Self::map_new_file(&path, new_size) {
                Ok(mut m) => {
                    m[..old_bytes.len()].copy_from_slice(&old_bytes);
                    m
                }
                Err(e) => {
                    return Err(error::record(Error::ResourceExhausted(format!(
                        "failed to extend mmap heap {}: {e}",
                        st.filename
                    ))));
                }
            };
            st.buffer = Buffer::Mmap(mapped);
        }
        st.size = new_size;
        st.dirty = true;
        Ok(())
    }

    /// `shrink(h, new_size)` (spec §4.1): rounds up to page size.
    pub fn shrink(&self, new_size: usize) -> Result<()> {
        let new_size = round_up_to_page(new_size);
        let mut st = self.write();
        if new_size >= st.size {
            return Ok(());
        }
        match &mut st.buffer {
            Buffer::Mem(v) => v.truncate(new_size),
            Buffer::Mmap(_) => {
                let path = st.path.clone().ok_or_else(|| {
                    error::record(Error::Corruption(format!(
                        "mmap heap {} has no backing path",
                        st.filename
                    )))
                })?;
                let file = OpenOptions::new().read(true).write(true).open(&path)?;
                file.set_len(new_size as u64)?;
                let mapped = unsafe { MmapOptions::new().map_mut(&file)? };
                st.buffer = Buffer::Mmap(mapped);
            }
        }
        st.size = new_size;
        st.free = st.free.min(new_size);
        st.dirty = true;
        Ok(())
    }

    /// Append `bytes` at the current `free` offset, growing as needed.
    pub fn append(&self, bytes: &[u8], mmap_threshold: usize) -> Result<usize> {
        let needed = {
            let st = self.read();
            st.free + bytes.len()
        };
        if needed > self.read().size {
            let grown = (needed * 3 / 2).max(needed);
            self.extend(grown, mmap_threshold)?;
        }
        let mut st = self.write();
        let offset = st.free;
        let free = st.free;
        st.buffer.as_mut_slice()[free..free + bytes.len()].copy_from_slice(bytes);
        st.free += bytes.len();
        st.dirty = true;
        st.check_invariant()?;
        Ok(offset)
    }

    /// Save: for `mmap-shared`, an msync is implicit (the OS page cache
    /// is authoritative); `mem` and `mmap-private` heaps are written out
    /// explicitly — `mmap-private` to a sidecar `.new` file (spec §3.2).
    pub fn save(&self, farm_dir: &Path) -> Result<()> {
        let mut st = self.write();
        match st.storage {
            StorageKind::MmapShared => {
                if let Buffer::Mmap(m) = &st.buffer {
                    m.flush()?;
                }
            }
            StorageKind::Mem => {
                let path = farm_dir.join(&st.filename);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut f = File::create(&path)?;
                f.write_all(st.as_slice())?;
                f.sync_all()?;
            }
            StorageKind::MmapPrivate => {
                let path = farm_dir.join(format!("{}.new", st.filename));
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut f = File::create(&path)?;
                f.write_all(st.as_slice())?;
                f.sync_all()?;
            }
        }
        st.dirty = false;
        Ok(())
    }

    /// Load a previously saved heap. Prefers `<filename>.new` over the
    /// base file if both exist (spec §3.2, §4.10 recovery).
    pub fn load(farm_dir: &Path, filename: impl Into<String>, farm_id: u32) -> Result<Heap> {
        let filename = filename.into();
        let new_path = farm_dir.join(format!("{filename}.new"));
        let base_path = farm_dir.join(&filename);
        let path = if new_path.exists() { &new_path } else { &base_path };

        let mut file = File::open(path).map_err(|e| {
            error::record(Error::Corruption(format!(
                "cannot open heap file {path:?}: {e}"
            )))
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let free = bytes.len();

        Ok(Heap {
            state: Arc::new(RwLock::new(HeapState {
                size: bytes.len(),
                free,
                buffer: Buffer::Mem(bytes),
                farm_id,
                storage: StorageKind::Mem,
                newstorage: StorageKind::Mem,
                dirty: false,
                parentid: 0,
                filename,
                remove: false,
                path: Some(path.clone()),
            })),
            refcount: Arc::new(AtomicUsize::new(1)),
        })
    }

    /// Delete the backing file(s), if any.
    pub fn delete(&self, farm_dir: &Path) -> Result<()> {
        let st = self.read();
        let base = farm_dir.join(&st.filename);
        let sidecar = farm_dir.join(format!("{}.new", st.filename));
        for p in [base, sidecar] {
            if p.exists() {
                std::fs::remove_file(&p)?;
            }
        }
        Ok(())
    }

    /// Increment the explicit (logical) refcount.
    pub fn incref(&self) -> usize {
        self.refcount.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }

    /// Decrement the explicit refcount; returns true if it dropped to zero
    /// (the caller should then free memory and, if `remove` is set,
    /// unlink the backing files).
    pub fn decref(&self, farm_dir: &Path) -> Result<bool> {
        let prev = self.refcount.fetch_sub(1, AtomicOrdering::SeqCst);
        if prev == 1 {
            let remove = self.read().remove;
            if remove {
                self.delete(farm_dir)?;
            }
            Ok(true)
        } else if prev == 0 {
            warn!("heap refcount underflow");
            self.refcount.store(0, AtomicOrdering::SeqCst);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(AtomicOrdering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(tag: &str) -> PathBuf {
        let d = std::env::temp_dir().join(format!("gdk_heap_{tag}_{}", std::process::id()));
        std::fs::create_dir_all(&d).unwrap();
        d
    }

    #[test]
    fn mem_heap_append_and_read() {
        let dir = tmp_dir("mem_append");
        let h = Heap::alloc(&dir, "t.tail", 16, 1 << 20, 0).unwrap();
        let off = h.append(b"hello", 1 << 20).unwrap();
        assert_eq!(off, 0);
        assert_eq!(h.read().as_slice(), b"hello");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn extend_crosses_mmap_threshold() {
        let dir = tmp_dir("extend_cross");
        let h = Heap::alloc(&dir, "t.tail", 4, 64, 0).unwrap();
        h.append(b"abcd", 64).unwrap();
        h.extend(128, 64).unwrap();
        assert_eq!(h.read().storage, StorageKind::MmapShared);
        assert_eq!(&h.read().as_slice()[..4], b"abcd");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn save_and_load_mem_heap_roundtrip() {
        let dir = tmp_dir("save_load");
        let h = Heap::alloc(&dir, "x.tail", 8, 1 << 20, 0).unwrap();
        h.append(b"roundtrip", 1 << 20).unwrap();
        h.save(&dir).unwrap();
        let loaded = Heap::load(&dir, "x.tail", 0).unwrap();
        assert_eq!(loaded.read().as_slice(), b"roundtrip");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn refcount_decref_to_zero_removes_file_when_flagged() {
        let dir = tmp_dir("refcount");
        let h = Heap::alloc(&dir, "y.tail", 8, 1 << 20, 0).unwrap();
        h.append(b"data", 1 << 20).unwrap();
        h.save(&dir).unwrap();
        h.write().remove = true;
        assert_eq!(h.refcount(), 1);
        let dropped = h.decref(&dir).unwrap();
        assert!(dropped);
        assert!(!dir.join("y.tail").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn shrink_rounds_up_to_page_size() {
        let dir = tmp_dir("shrink");
        let h = Heap::alloc(&dir, "z.tail", 1 << 20, 1 << 20, 0).unwrap();
        h.shrink(10).unwrap();
        assert_eq!(h.read().size, PAGE_SIZE);
        std::fs::remove_dir_all(dir).ok();
    }
}
