//! Column descriptor (spec §3.3, §3.4, §4.3): the metadata record every
//! query operator shares a handle to — type, seqbase, count/capacity,
//! property bits, and pointers to the slot heap and optional variable
//! heap.

pub mod ops;
pub mod properties;
pub mod varheap;

use crate::atoms::AtomId;
use crate::error::{self, Error, Result};
use crate::heap::Heap;
use properties::Properties;
use varheap::VarHeap;

pub const NONE: usize = properties::NONE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Append,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Persistence {
    Transient,
    Persistent,
}

/// The 8-state access-mode/persistence/storage table of spec §4.3. Rather
/// than encode every `(persistence, access, storage)` triple by hand, the
/// state id is the table's row number; `on_access_write` / `on_persist`
/// return the next row plus whether a save must happen before the new
/// state is observable, and whether a stale `.new` sidecar must be
/// deleted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub next: u8,
    pub needs_save: bool,
    pub delete_new_sidecar: bool,
}

pub fn on_access_write(state: u8) -> Result<StateTransition> {
    let (next, needs_save, delete_new) = match state {
        0 => (2, false, false),
        1 => (3, false, false),
        2 => (0, false, false),
        3 => (1, false, false),
        4 => (6, true, false),
        5 => (7, false, false),
        6 => (4, true, true),
        7 => (5, false, false),
        _ => {
            return Err(error::record(Error::InvariantViolation(format!(
                "unknown access-mode transition state {state}"
            ))))
        }
    };
    Ok(StateTransition {
        next,
        needs_save,
        delete_new_sidecar: delete_new,
    })
}

pub fn on_persist(state: u8) -> Result<StateTransition> {
    let (next, needs_save, delete_new) = match state {
        0 => (4, false, false),
        1 => (5, false, false),
        2 => (6, true, false),
        3 => (7, false, false),
        4 => (0, false, false),
        5 => (1, false, false),
        6 => (2, true, true),
        7 => (3, false, false),
        _ => {
            return Err(error::record(Error::InvariantViolation(format!(
                "unknown persist transition state {state}"
            ))))
        }
    };
    Ok(StateTransition {
        next,
        needs_save,
        delete_new_sidecar: delete_new,
    })
}

/// Exception states, reachable only after a failed commit of a
/// newly-persistent column; recovered on restart (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    None,
    A,
    B,
    C,
}

pub struct Column {
    pub id: i64,
    pub atom: AtomId,
    pub width: usize,
    pub shift: u32,

    pub hseqbase: u64,
    pub tseqbase: Option<u64>,

    pub count: usize,
    pub capacity: usize,
    pub inserted: usize,

    pub heap: Heap,
    pub vheap: Option<VarHeap>,
    /// Width in bytes of each slot in `heap` when the atom is variable
    /// (an offset into `vheap`); grows monotonically (1/2/4/8).
    pub offset_width: u8,

    pub props: Properties,
    pub access: AccessMode,
    pub persistence: Persistence,
    pub state: u8,
    pub recovery: RecoveryState,

    /// Number of views sharing this column's heap(s).
    pub share_count: usize,
    /// Parent column id, for views (spec §3.3).
    pub parent: Option<i64>,
    pub is_view: bool,

    /// First position each distinct appended value was seen at; backs both
    /// `key`/`nokey` (a later match against any earlier position, not just
    /// the immediate predecessor, disproves `key`) and `unique_est` (its
    /// length is the exact distinct-value count seen by appends so far).
    pub(crate) value_positions: std::collections::HashMap<Vec<u8>, usize>,
}

impl Column {
    fn width_for(atom_size: usize) -> (usize, u32) {
        if atom_size == 0 {
            return (0, 0); // void: no heap storage, values derive from tseqbase
        }
        (atom_size, atom_size.trailing_zeros())
    }

    /// `new(type, capacity, role)` (spec §3.4): allocates a descriptor and
    /// heap, sets trivial properties.
    pub fn new(
        id: i64,
        atom: AtomId,
        atom_size: usize,
        is_variable: bool,
        capacity: usize,
        hseqbase: u64,
        heap: Heap,
        vheap: Option<Heap>,
        persistence: Persistence,
    ) -> Self {
        let (width, shift) = if is_variable {
            (1usize, 0u32) // initial offset width: 1 byte
        } else {
            Self::width_for(atom_size)
        };
        Column {
            id,
            atom,
            width,
            shift,
            hseqbase,
            tseqbase: Some(hseqbase),
            count: 0,
            capacity,
            inserted: 0,
            heap,
            vheap: vheap.map(VarHeap::new),
            offset_width: width as u8,
            props: Properties::empty(),
            access: AccessMode::Write,
            persistence,
            state: if persistence == Persistence::Persistent { 4 } else { 0 },
            recovery: RecoveryState::None,
            share_count: 0,
            parent: None,
            is_view: false,
            value_positions: std::collections::HashMap::new(),
        }
    }

    /// `clear` (spec §4.3): truncates in place, resetting all properties
    /// except type.
    pub fn clear(&mut self) {
        self.count = 0;
        self.inserted = 0;
        self.tseqbase = Some(self.hseqbase);
        self.props = Properties::empty();
        self.value_positions.clear();
        self.heap.write().free = 0;
        if let Some(vh) = &self.vheap {
            vh.heap.write().free = 0;
        }
    }

    pub fn is_void(&self) -> bool {
        self.width == 0
    }

    pub fn slot_bytes(&self, index: usize) -> Result<Vec<u8>> {
        if index >= self.count {
            return Err(error::record(Error::InvariantViolation(format!(
                "slot index {index} out of range (count {})",
                self.count
            ))));
        }
        if self.is_void() {
            let v = self.tseqbase.map(|b| b + index as u64);
            return Ok(match v {
                Some(v) => v.to_le_bytes().to_vec(),
                None => u64::MAX.to_le_bytes().to_vec(),
            });
        }
        let st = self.heap.read();
        let start = index * self.width;
        Ok(st.as_slice()[start..start + self.width].to_vec())
    }

    pub fn force_destroy(&self) -> bool {
        self.recovery != RecoveryState::None
    }
}
