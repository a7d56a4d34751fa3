//! Atom registry (spec §3.1, §4.2): a process-wide-in-spirit, but
//! context-owned, table mapping small integer atom ids to an operation
//! vector. Comparison and hashing dispatch through the vector except for
//! the built-in fixed-width arithmetic types, which the column ops inline
//! for performance (see `column::ops`).

pub mod builtin;

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{self, Error, Result};

pub type AtomId = i32;

/// Underlying fixed-width representation of an atom (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Void,
    Bit,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Float32,
    Float64,
    Pointer,
    Uuid,
    /// Slots hold offsets into a variable heap; `width` is the offset width.
    StringOffset,
}

impl Storage {
    /// Slot width in bytes, 0 for void.
    pub const fn width(self) -> usize {
        match self {
            Storage::Void => 0,
            Storage::Bit => 1,
            Storage::Int8 => 1,
            Storage::Int16 => 2,
            Storage::Int32 => 4,
            Storage::Int64 => 8,
            Storage::Int128 => 16,
            Storage::Float32 => 4,
            Storage::Float64 => 8,
            Storage::Pointer => 8,
            Storage::Uuid => 16,
            // Default/maximal offset width; narrower widths are chosen
            // per-column by the offset-heap widening logic.
            Storage::StringOffset => 8,
        }
    }
}

/// Comparator: nil is smallest, nil == nil, NaN substitutes for nil in
/// float comparisons (spec §3.1).
pub type CmpFn = fn(&[u8], &[u8]) -> Ordering;
pub type HashFn = fn(&[u8]) -> u64;
pub type NilFn = fn() -> Vec<u8>;
pub type FromStrFn = fn(&str) -> Result<Vec<u8>>;
pub type ToStrFn = fn(&[u8]) -> String;
/// Binary, endianness-aware encode/decode between the in-memory
/// representation and the canonical little-endian on-disk representation.
pub type ReadFn = fn(&[u8]) -> Vec<u8>;
pub type WriteFn = fn(&[u8]) -> Vec<u8>;
/// For atoms that carry sub-references (a column whose slots name other
/// columns): extract the referenced column id from a slot value.
pub type FixFn = fn(&[u8]) -> Option<i64>;

#[derive(Clone)]
pub struct AtomDescriptor {
    pub id: AtomId,
    pub name: &'static str,
    pub storage: Storage,
    pub linear: bool,
    pub is_variable: bool,
    pub cmp: CmpFn,
    pub hash: HashFn,
    pub nil: NilFn,
    pub from_str: FromStrFn,
    pub to_str: ToStrFn,
    pub read: ReadFn,
    pub write: WriteFn,
    pub fix: Option<FixFn>,
    pub unfix: Option<FixFn>,
}

impl AtomDescriptor {
    pub fn size(&self) -> usize {
        self.storage.width()
    }

    pub fn nil_bytes(&self) -> Vec<u8> {
        (self.nil)()
    }

    pub fn is_nil(&self, bytes: &[u8]) -> bool {
        bytes == self.nil_bytes().as_slice()
    }
}

/// A column referring to an atom that hasn't registered itself yet is
/// parked here under a negative placeholder id (spec §3.1, last paragraph).
#[derive(Debug, Clone)]
pub struct UnknownAtom {
    pub placeholder_id: AtomId,
    pub name: String,
}

pub struct AtomRegistry {
    by_id: HashMap<AtomId, AtomDescriptor>,
    by_name: HashMap<String, AtomId>,
    unknown: Vec<UnknownAtom>,
    next_unknown_id: AtomId,
    max_atoms: usize,
}

impl AtomRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            unknown: Vec::new(),
            next_unknown_id: -1,
            max_atoms: 4096,
        };
        builtin::register_all(&mut reg);
        reg
    }

    /// Register an atom type, serialised in spirit by requiring `&mut self`
    /// (the context owns the registry behind its own lock).
    pub fn register(&mut self, desc: AtomDescriptor) -> Result<()> {
        if self.by_id.len() >= self.max_atoms {
            return Err(error::record(Error::ResourceExhausted(
                "atom registry is full".into(),
            )));
        }
        self.by_name.insert(desc.name.to_string(), desc.id);
        self.by_id.insert(desc.id, desc);
        Ok(())
    }

    pub fn get(&self, id: AtomId) -> Option<&AtomDescriptor> {
        self.by_id.get(&id)
    }

    /// Linear scan over the table; callers that need this repeatedly should
    /// cache the id (spec §4.2).
    pub fn lookup_by_name(&self, name: &str) -> Option<AtomId> {
        self.by_name.get(name).copied()
    }

    /// A column refers to an atom not yet registered: park it and hand back
    /// a negative placeholder id that resolves once the real type arrives.
    pub fn reserve_unknown(&mut self, name: &str) -> AtomId {
        if let Some(existing) = self.unknown.iter().find(|u| u.name == name) {
            return existing.placeholder_id;
        }
        let id = self.next_unknown_id;
        self.next_unknown_id -= 1;
        self.unknown.push(UnknownAtom {
            placeholder_id: id,
            name: name.to_string(),
        });
        id
    }

    /// Resolve any parked unknown atoms matching a newly registered name.
    pub fn resolve_unknown(&mut self, name: &str) -> Option<AtomId> {
        self.lookup_by_name(name)
    }
}

impl Default for AtomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let reg = AtomRegistry::new();
        for name in ["void", "bit", "bte", "sht", "int", "lng", "hge", "flt", "dbl", "oid", "ptr", "uuid", "str"] {
            assert!(reg.lookup_by_name(name).is_some(), "missing atom {name}");
        }
    }

    #[test]
    fn unknown_atom_gets_negative_placeholder() {
        let mut reg = AtomRegistry::new();
        let id = reg.reserve_unknown("point");
        assert!(id < 0);
        let id2 = reg.reserve_unknown("point");
        assert_eq!(id, id2);
    }
}
