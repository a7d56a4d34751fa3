//! Buffer pool (spec §5, "BBP"): every column a context has handed out
//! lives here, addressed by id, with independent physical/logical
//! refcounts and a load-on-fix state machine that spin-waits on a
//! concurrent loader rather than loading twice.
//!
//! The original's BBP is a literal two-level C array indexed by column
//! id. A concurrent map addressed by the same id gives the same O(1)
//! lookup without the fixed-size-array bookkeeping, so the slot table
//! below is a [`DashMap`] rather than a hand-rolled segment array.

pub mod commit;
pub mod directory;

use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use dashmap::DashMap;

use crate::atoms::AtomRegistry;
use crate::column::{AccessMode, Column, Persistence};
use crate::config::{role, GdkConfig};
use crate::error::{self, Error, Result};
use crate::heap::Heap;
use directory::{ColumnRecord, Directory};

/// Per-slot status bits (spec §5).
pub mod status {
    pub const EXISTING: u32 = 1 << 0;
    pub const NEW: u32 = 1 << 1;
    pub const DELETED: u32 = 1 << 2;
    pub const LOADED: u32 = 1 << 3;
    pub const LOADING: u32 = 1 << 4;
    pub const SAVING: u32 = 1 << 5;
    pub const UNLOADING: u32 = 1 << 6;
    pub const PERSISTENT: u32 = 1 << 7;
    pub const TMP: u32 = 1 << 8;
    pub const SWAPPED: u32 = 1 << 9;
    pub const RENAMED: u32 = 1 << 10;
}

struct Slot {
    record: Mutex<ColumnRecord>,
    column: Mutex<Option<Column>>,
    physical_ref: AtomicU32,
    logical_ref: AtomicU32,
    status: AtomicU32,
    parent: Option<i64>,
}

/// The BBP: every column handed out by a context lives here.
pub struct Pool {
    config: GdkConfig,
    slots: DashMap<i64, Arc<Slot>>,
    free_ids: Mutex<Vec<i64>>,
    next_fresh: Mutex<i64>,
}

impl Pool {
    pub fn new(config: GdkConfig) -> Self {
        Pool {
            config,
            slots: DashMap::new(),
            free_ids: Mutex::new(Vec::new()),
            next_fresh: Mutex::new(1),
        }
    }

    fn alloc_id(&self) -> i64 {
        let mut free = self.free_ids.lock().unwrap();
        if let Some(id) = free.pop() {
            return id;
        }
        drop(free);
        let mut next = self.next_fresh.lock().unwrap();
        let id = *next;
        *next += 1;
        id
    }

    /// Register a freshly built column (spec §5, creation): it starts
    /// resident, with one logical reference (the caller's handle) and one
    /// physical reference (the caller's fix).
    pub fn create(&self, mut column: Column, mut record: ColumnRecord) -> i64 {
        let id = self.alloc_id();
        column.id = id;
        record.id = id;
        let status = status::EXISTING
            | status::NEW
            | status::LOADED
            | if column.persistence == Persistence::Persistent {
                status::PERSISTENT
            } else {
                0
            };
        let slot = Arc::new(Slot {
            record: Mutex::new(record),
            column: Mutex::new(Some(column)),
            physical_ref: AtomicU32::new(1),
            logical_ref: AtomicU32::new(1),
            status: AtomicU32::new(status),
            parent: None,
        });
        self.slots.insert(id, slot);
        id
    }

    /// Register a view (spec §3.3, §5): shares `parent_id`'s heap(s) and
    /// is always resident (a view's body is just a `Column` descriptor,
    /// never evicted on its own).
    pub fn create_view(&self, mut column: Column, mut record: ColumnRecord, parent_id: i64) -> i64 {
        let id = self.alloc_id();
        column.id = id;
        column.parent = Some(parent_id);
        column.is_view = true;
        record.id = id;
        let slot = Arc::new(Slot {
            record: Mutex::new(record),
            column: Mutex::new(Some(column)),
            physical_ref: AtomicU32::new(0),
            logical_ref: AtomicU32::new(1),
            status: AtomicU32::new(status::EXISTING | status::LOADED),
            parent: Some(parent_id),
        });
        self.slots.insert(id, slot);
        id
    }

    /// `BBPfix` (spec §5): bump the physical refcount, loading the
    /// column's body from disk first if it was unloaded. A view fixes its
    /// parent first, since its heaps are borrowed from it.
    pub fn fix(&self, id: i64, atoms: &AtomRegistry) -> Result<()> {
        let slot = self.require_slot(id)?;
        if let Some(parent) = slot.parent {
            self.fix(parent, atoms)?;
        }
        loop {
            let st = slot.status.load(AtomicOrdering::SeqCst);
            if st & status::LOADING != 0 {
                thread::sleep(Duration::from_micros(50));
                continue;
            }
            if st & status::LOADED != 0 {
                slot.physical_ref.fetch_add(1, AtomicOrdering::SeqCst);
                return Ok(());
            }
            if slot
                .status
                .compare_exchange(st, st | status::LOADING, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
                .is_err()
            {
                continue; // lost the race to claim the load; retry
            }
            let loaded = self.load_column(&slot, atoms);
            let mut next_status = slot.status.load(AtomicOrdering::SeqCst) & !status::LOADING;
            match loaded {
                Ok(column) => {
                    *slot.column.lock().unwrap() = Some(column);
                    next_status |= status::LOADED;
                    slot.status.store(next_status, AtomicOrdering::SeqCst);
                    slot.physical_ref.fetch_add(1, AtomicOrdering::SeqCst);
                    return Ok(());
                }
                Err(e) => {
                    slot.status.store(next_status, AtomicOrdering::SeqCst);
                    return Err(e);
                }
            }
        }
    }

    fn load_column(&self, slot: &Slot, atoms: &AtomRegistry) -> Result<Column> {
        let record = slot.record.lock().unwrap().clone();
        let role_bit = if record.persistence == Persistence::Persistent {
            role::PERSISTENT
        } else {
            role::TRANSIENT
        };
        let farm = self.config.farm_for_role(role_bit).ok_or_else(|| {
            error::record(Error::NotFound("no farm configured for that role".into()))
        })?;
        let atom_id = atoms.lookup_by_name(&record.atom_name).ok_or_else(|| {
            error::record(Error::TypeMismatch(format!("unknown atom {}", record.atom_name)))
        })?;
        let desc = atoms.get(atom_id).unwrap();
        let heap = Heap::load(&farm.directory, &record.heap_file, farm.id)?;
        let vheap = match &record.vheap_file {
            Some(f) => Some(Heap::load(&farm.directory, f, farm.id)?),
            None => None,
        };
        let mut column = Column::new(
            record.id,
            atom_id,
            desc.size(),
            desc.is_variable,
            record.count,
            record.hseqbase,
            heap,
            vheap,
            record.persistence,
        );
        column.count = record.count;
        column.tseqbase = record.tseqbase;
        column.access = AccessMode::Read;
        if desc.is_variable && record.width > 0 {
            column.width = record.width;
            column.shift = (record.width as u32).trailing_zeros();
            column.offset_width = record.width as u8;
        }
        Ok(column)
    }

    /// `BBPunfix` (spec §5): drop the physical refcount taken by `fix`.
    pub fn unfix(&self, id: i64) -> Result<()> {
        let slot = self.require_slot(id)?;
        let prev = slot.physical_ref.fetch_sub(1, AtomicOrdering::SeqCst);
        if prev == 0 {
            slot.physical_ref.store(0, AtomicOrdering::SeqCst);
            return Err(error::record(Error::InvariantViolation(format!(
                "physical refcount underflow on column {id}"
            ))));
        }
        Ok(())
    }

    /// `BBPretain` (spec §5): bump the logical refcount — a durable
    /// handle (e.g. held by a catalog entry), independent of residency.
    pub fn retain(&self, id: i64) -> Result<()> {
        let slot = self.require_slot(id)?;
        slot.logical_ref.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    /// `BBPrelease` (spec §5): drop the logical refcount; at zero and not
    /// persistent, the column is destroyed. Returns whether it was.
    pub fn release(&self, id: i64) -> Result<bool> {
        let slot = self.require_slot(id)?;
        let prev = slot.logical_ref.fetch_sub(1, AtomicOrdering::SeqCst);
        if prev == 1 && slot.status.load(AtomicOrdering::SeqCst) & status::PERSISTENT == 0 {
            self.destroy(id);
            return Ok(true);
        }
        Ok(false)
    }

    /// Evict the in-memory column body while keeping its directory
    /// record, reversing `fix`'s load (spec §5). Refuses while physically
    /// fixed, and is a no-op for transient columns (they have no disk
    /// copy to reload from).
    pub fn unload(&self, id: i64) -> Result<()> {
        let slot = self.require_slot(id)?;
        if slot.physical_ref.load(AtomicOrdering::SeqCst) != 0 {
            return Err(error::record(Error::InvariantViolation(format!(
                "cannot unload column {id}: still physically fixed"
            ))));
        }
        let status = slot.status.load(AtomicOrdering::SeqCst);
        if status & status::PERSISTENT == 0 {
            return Ok(());
        }
        slot.status.store(status | status::UNLOADING, AtomicOrdering::SeqCst);
        *slot.column.lock().unwrap() = None;
        let next_status = slot.status.load(AtomicOrdering::SeqCst) & !status::UNLOADING & !status::LOADED;
        slot.status.store(next_status, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn destroy(&self, id: i64) {
        self.slots.remove(&id);
        self.free_ids.lock().unwrap().push(id);
    }

    fn require_slot(&self, id: i64) -> Result<Arc<Slot>> {
        self.slots
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| error::record(Error::NotFound(format!("no such column id {id}"))))
    }

    /// Read-only access to a resident column; fails if it isn't loaded
    /// (callers must `fix` first).
    pub fn with_column<R>(&self, id: i64, f: impl FnOnce(&Column) -> R) -> Result<R> {
        let slot = self.require_slot(id)?;
        let guard = slot.column.lock().unwrap();
        let column = guard.as_ref().ok_or_else(|| {
            error::record(Error::InvariantViolation(format!(
                "column {id} is not loaded; call fix() first"
            )))
        })?;
        Ok(f(column))
    }

    /// Mutable access to a resident column.
    pub fn with_column_mut<R>(&self, id: i64, f: impl FnOnce(&mut Column) -> R) -> Result<R> {
        let slot = self.require_slot(id)?;
        let mut guard = slot.column.lock().unwrap();
        let column = guard.as_mut().ok_or_else(|| {
            error::record(Error::InvariantViolation(format!(
                "column {id} is not loaded; call fix() first"
            )))
        })?;
        Ok(f(column))
    }

    pub fn physical_refcount(&self, id: i64) -> Result<u32> {
        Ok(self.require_slot(id)?.physical_ref.load(AtomicOrdering::SeqCst))
    }

    pub fn logical_refcount(&self, id: i64) -> Result<u32> {
        Ok(self.require_slot(id)?.logical_ref.load(AtomicOrdering::SeqCst))
    }

    /// Snapshot every resident slot's directory record (spec §6.2), with
    /// count/seqbase/width refreshed from the live column when loaded.
    /// Used by the commit protocol to rewrite `BBP.dir`.
    pub fn snapshot_directory(&self) -> Directory {
        let mut dir = Directory::new();
        for entry in self.slots.iter() {
            let slot = entry.value();
            let mut record = slot.record.lock().unwrap().clone();
            if let Some(column) = slot.column.lock().unwrap().as_ref() {
                record.count = column.count;
                record.tseqbase = column.tseqbase;
                record.width = column.width;
            }
            dir.records.push(record);
        }
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ops;

    fn setup(tag: &str) -> (std::path::PathBuf, GdkConfig, AtomRegistry) {
        let dir = std::env::temp_dir().join(format!("gdk_pool_{tag}_{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let config = GdkConfig::single_farm(&dir);
        (dir, config, AtomRegistry::new())
    }

    fn int_column(config: &GdkConfig, filename: &str, values: &[i32]) -> (Column, ColumnRecord) {
        let farm = config.farm_for_role(role::PERSISTENT).unwrap();
        let atoms = AtomRegistry::new();
        let atom = atoms.lookup_by_name("int").unwrap();
        let heap = Heap::alloc(&farm.directory, filename, 64, 1 << 20, farm.id).unwrap();
        let mut col = Column::new(0, atom, 4, false, values.len(), 0, heap.clone(), None, Persistence::Persistent);
        for v in values {
            ops::append_fixed(&mut col, &atoms, &v.to_le_bytes(), 1 << 20).unwrap();
        }
        heap.save(&farm.directory).unwrap();
        let record = ColumnRecord {
            id: 0,
            atom_name: "int".into(),
            width: col.width,
            hseqbase: col.hseqbase,
            tseqbase: col.tseqbase,
            count: col.count,
            persistence: Persistence::Persistent,
            heap_file: filename.to_string(),
            vheap_file: None,
        };
        (col, record)
    }

    #[test]
    fn create_fix_unfix_tracks_refcounts() {
        let (dir, config, atoms) = setup("refcounts");
        let (col, record) = int_column(&config, "1.tail", &[1, 2, 3]);
        let pool = Pool::new(config);
        let id = pool.create(col, record);
        assert_eq!(pool.physical_refcount(id).unwrap(), 1);
        pool.fix(id, &atoms).unwrap();
        assert_eq!(pool.physical_refcount(id).unwrap(), 2);
        pool.unfix(id).unwrap();
        pool.unfix(id).unwrap();
        assert_eq!(pool.physical_refcount(id).unwrap(), 0);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn unload_then_fix_reloads_from_disk() {
        let (dir, config, atoms) = setup("reload");
        let (col, record) = int_column(&config, "2.tail", &[10, 20]);
        let pool = Pool::new(config);
        let id = pool.create(col, record);
        pool.unfix(id).unwrap();
        pool.unload(id).unwrap();

        pool.with_column(id, |_| ()).unwrap_err();
        pool.fix(id, &atoms).unwrap();
        let count = pool.with_column(id, |c| c.count).unwrap();
        assert_eq!(count, 2);
        let first = pool.with_column(id, |c| c.slot_bytes(0).unwrap()).unwrap();
        assert_eq!(i32::from_le_bytes(first.try_into().unwrap()), 10);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn view_fix_also_fixes_parent() {
        let (dir, config, atoms) = setup("view");
        let (col, record) = int_column(&config, "3.tail", &[5, 6, 7]);
        let pool = Pool::new(config);
        let parent_id = pool.create(col, record);
        pool.unfix(parent_id).unwrap();

        let view = pool.with_column(parent_id, |c| crate::column::ops::view_create(c)).unwrap();
        let view_record = ColumnRecord {
            id: 0,
            atom_name: "int".into(),
            width: view.width,
            hseqbase: view.hseqbase,
            tseqbase: view.tseqbase,
            count: view.count,
            persistence: Persistence::Transient,
            heap_file: String::new(),
            vheap_file: None,
        };
        let view_id = pool.create_view(view, view_record, parent_id);

        pool.fix(view_id, &atoms).unwrap();
        assert_eq!(pool.physical_refcount(parent_id).unwrap(), 1);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn release_to_zero_destroys_transient_column() {
        let (dir, config, atoms) = setup("release");
        let (col, mut record) = int_column(&config, "4.tail", &[1]);
        record.persistence = Persistence::Transient;
        let mut col = col;
        col.persistence = Persistence::Transient;
        let pool = Pool::new(config);
        let id = pool.create(col, record);
        let destroyed = pool.release(id).unwrap();
        assert!(destroyed);
        assert!(pool.with_column(id, |_| ()).is_err());
        let _ = &atoms;
        std::fs::remove_dir_all(dir).ok();
    }
}
