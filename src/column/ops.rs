//! append / replace / delete / clear / materialize / slice / view / copy
//! (spec §4.3, §4.4, §4.5): the primitives every query operator composes.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::properties::NONE;
use super::varheap::VarHeap;
use super::{AccessMode, Column, Persistence};
use crate::atoms::{AtomId, AtomRegistry};
use crate::error::{self, Error, Result};
use crate::heap::Heap;

fn cmp_bytes(reg: &AtomRegistry, atom: AtomId, l: &[u8], r: &[u8]) -> Result<Ordering> {
    let desc = reg
        .get(atom)
        .ok_or_else(|| error::record(Error::TypeMismatch(format!("unknown atom {atom}"))))?;
    Ok((desc.cmp)(l, r))
}

fn is_nil(reg: &AtomRegistry, atom: AtomId, v: &[u8]) -> Result<bool> {
    let desc = reg
        .get(atom)
        .ok_or_else(|| error::record(Error::TypeMismatch(format!("unknown atom {atom}"))))?;
    Ok(desc.is_nil(v))
}

fn ensure_writable(col: &Column) -> Result<()> {
    if col.is_view {
        return Err(error::record(Error::InvariantViolation(
            "cannot mutate a view directly".into(),
        )));
    }
    if col.access == AccessMode::Read {
        return Err(error::record(Error::InvariantViolation(
            "column is read-only".into(),
        )));
    }
    Ok(())
}

/// Track sorted/revsorted (and their disproof positions) across one
/// freshly-compared adjacent pair at absolute position `pos` (the position
/// of the right-hand, newer value). Equal neighbours disprove neither.
fn fold_order(props: &mut super::properties::Properties, pos: usize, ord: Ordering) {
    match ord {
        Ordering::Less => {
            if props.sorted {
                props.sorted = false;
                props.nosorted = pos;
            }
        }
        Ordering::Greater => {
            if props.revsorted {
                props.revsorted = false;
                props.norevsorted = pos;
            }
        }
        Ordering::Equal => {}
    }
}

/// Record `value` as newly appended at `pos` against every earlier
/// appended value (not just its immediate predecessor): a match anywhere
/// disproves `key`, and the map's size is the exact unique-value count so
/// far (spec §8 scenarios 1 and 2).
fn fold_duplicate(
    props: &mut super::properties::Properties,
    positions: &mut HashMap<Vec<u8>, usize>,
    pos: usize,
    value: &[u8],
) {
    if let Some(&first) = positions.get(value) {
        if props.key {
            props.key = false;
            props.nokey = [first, pos];
        }
    } else {
        positions.insert(value.to_vec(), pos);
    }
    props.unique_est = positions.len() as f64;
}

/// Append `n` fixed-width values (concatenated in `values`, `width` bytes
/// each) to a non-variable column (spec §4.3).
pub fn append_fixed(
    col: &mut Column,
    reg: &AtomRegistry,
    values: &[u8],
    mmap_threshold: usize,
) -> Result<()> {
    ensure_writable(col)?;
    if col.is_void() {
        return Err(error::record(Error::TypeMismatch(
            "append_fixed called on a void column".into(),
        )));
    }
    let width = col.width;
    if values.len() % width != 0 {
        return Err(error::record(Error::InvalidArgument(format!(
            "values length {} is not a multiple of width {width}",
            values.len()
        ))));
    }
    let n = values.len() / width;
    if n == 0 {
        return Ok(());
    }
    let get = |i: usize| -> &[u8] { &values[i * width..(i + 1) * width] };

    let count_before = col.count;
    let is_oid = reg.lookup_by_name("oid") == Some(col.atom);

    if count_before == 0 {
        col.props.sorted = true;
        col.props.revsorted = true;
        col.props.key = true;
    }
    for i in 0..n {
        let pos = count_before + i;
        if pos > 0 {
            let prev = if i == 0 {
                col.slot_bytes(count_before - 1)?
            } else {
                get(i - 1).to_vec()
            };
            let ord = cmp_bytes(reg, col.atom, get(i), &prev)?;
            fold_order(&mut col.props, pos, ord);
        }
        fold_duplicate(&mut col.props, &mut col.value_positions, pos, get(i));
    }

    let mut any_nil = false;
    for i in 0..n {
        if is_nil(reg, col.atom, get(i))? {
            any_nil = true;
            break;
        }
    }
    if count_before == 0 {
        col.props.nil = any_nil;
        col.props.nonil = !any_nil;
        if is_oid && !any_nil {
            col.tseqbase = consecutive_ascending_base(&get, n);
        }
    } else if any_nil {
        col.props.nil = true;
        col.props.nonil = false;
        if is_oid {
            col.tseqbase = None;
        }
    }

    if count_before == 0 {
        for i in 0..n {
            if is_nil(reg, col.atom, get(i))? {
                continue;
            }
            if col.props.minpos == NONE {
                col.props.minpos = i;
                col.props.maxpos = i;
                continue;
            }
            let min_val = get(col.props.minpos).to_vec();
            let max_val = get(col.props.maxpos).to_vec();
            if cmp_bytes(reg, col.atom, get(i), &min_val)? == Ordering::Less {
                col.props.minpos = i;
            }
            if cmp_bytes(reg, col.atom, get(i), &max_val)? == Ordering::Greater {
                col.props.maxpos = i;
            }
        }
    } else {
        if col.props.minpos != NONE {
            for i in 0..n {
                if is_nil(reg, col.atom, get(i))? {
                    continue;
                }
                let min_val = col.slot_bytes(col.props.minpos)?;
                if cmp_bytes(reg, col.atom, get(i), &min_val)? == Ordering::Less {
                    col.props.minpos = count_before + i;
                }
            }
        }
        if col.props.maxpos != NONE {
            for i in 0..n {
                if is_nil(reg, col.atom, get(i))? {
                    continue;
                }
                let max_val = col.slot_bytes(col.props.maxpos)?;
                if cmp_bytes(reg, col.atom, get(i), &max_val)? == Ordering::Greater {
                    col.props.maxpos = count_before + i;
                }
            }
        }
    }

    col.heap.append(values, mmap_threshold)?;
    col.count += n;
    col.capacity = col.capacity.max(col.count);
    Ok(())
}

fn consecutive_ascending_base(get: &impl Fn(usize) -> &[u8], n: usize) -> Option<u64> {
    let first = u64::from_le_bytes(get(0).try_into().ok()?);
    for i in 1..n {
        let v = u64::from_le_bytes(get(i).try_into().ok()?);
        if v != first + i as u64 {
            return None;
        }
    }
    Some(first)
}

/// Append `n` strings to a variable-sized column (spec §4.6).
pub fn append_strings(col: &mut Column, strings: &[&[u8]], mmap_threshold: usize) -> Result<()> {
    ensure_writable(col)?;
    if col.vheap.is_none() {
        return Err(error::record(Error::TypeMismatch(
            "column has no variable heap".into(),
        )));
    }
    let n = strings.len();
    if n == 0 {
        return Ok(());
    }

    let mut offsets = Vec::with_capacity(n);
    {
        let vh = col.vheap.as_mut().unwrap();
        for s in strings {
            offsets.push(vh.intern(s, mmap_threshold)?);
        }
    }

    let high_water = col.vheap.as_ref().unwrap().high_water_mark();
    let needed_width = super::varheap::width_for(high_water);
    if needed_width > col.offset_width {
        widen_offset_heap(col, needed_width, mmap_threshold)?;
    }

    let width = col.offset_width;
    let mut buf = Vec::with_capacity(n * width as usize);
    for off in &offsets {
        buf.extend(super::varheap::offset_bytes(*off, width));
    }

    let count_before = col.count;
    if count_before == 0 {
        col.props.sorted = true;
        col.props.revsorted = true;
        col.props.key = true;
    }
    for i in 0..n {
        let pos = count_before + i;
        if pos > 0 {
            let prev: Vec<u8> = if i == 0 {
                let prev_offset_bytes = col.slot_bytes(count_before - 1)?;
                col.vheap.as_ref().unwrap().get(super::varheap::offset_from_bytes(
                    &prev_offset_bytes,
                    col.offset_width,
                ))?
            } else {
                strings[i - 1].to_vec()
            };
            fold_order(&mut col.props, pos, strings[i].cmp(prev.as_slice()));
        }
        fold_duplicate(&mut col.props, &mut col.value_positions, pos, strings[i]);
    }

    col.heap.append(&buf, mmap_threshold)?;
    col.count += n;
    col.capacity = col.capacity.max(col.count);
    Ok(())
}

/// Widen the offset heap in one pass (spec §4.1 `grow_widen`, §4.6).
pub fn widen_offset_heap(col: &mut Column, new_width: u8, mmap_threshold: usize) -> Result<()> {
    let old_width = col.offset_width;
    if new_width <= old_width {
        return Ok(());
    }
    let raw = {
        let st = col.heap.read();
        st.as_slice()[..col.count * old_width as usize].to_vec()
    };
    let widened = super::varheap::widen_offsets(&raw, col.count, old_width, new_width);
    col.heap.write().free = 0;
    col.heap.append(&widened, mmap_threshold)?;
    col.offset_width = new_width;
    col.width = new_width as usize;
    Ok(())
}

/// Replace the value at slot `p` (spec §4.3). `force` allows touching a
/// committed slot (`p < inserted`).
pub fn replace_fixed(
    col: &mut Column,
    reg: &AtomRegistry,
    p: usize,
    new_value: &[u8],
    force: bool,
) -> Result<()> {
    ensure_writable(col)?;
    if p >= col.count {
        return Err(error::record(Error::InvariantViolation(format!(
            "replace position {p} out of range"
        ))));
    }
    if p < col.inserted && !force {
        return Err(error::record(Error::InvariantViolation(
            "cannot update committed slot without force".into(),
        )));
    }
    let old = col.slot_bytes(p)?;
    if cmp_bytes(reg, col.atom, &old, new_value)? == Ordering::Equal {
        return Ok(());
    }

    {
        let width = col.width;
        let mut st = col.heap.write();
        let start = p * width;
        st.as_mut_slice()[start..start + width].copy_from_slice(new_value);
        st.dirty = true;
    }

    if p > 0 {
        let left = col.slot_bytes(p - 1)?;
        match cmp_bytes(reg, col.atom, new_value, &left)? {
            Ordering::Less => {
                col.props.sorted = false;
                col.props.nosorted = p;
            }
            Ordering::Greater => {
                col.props.revsorted = false;
                col.props.norevsorted = p;
            }
            Ordering::Equal => {
                col.props.key = false;
                col.props.nokey = [p - 1, p];
            }
        }
    }
    if p + 1 < col.count {
        let right = col.slot_bytes(p + 1)?;
        if cmp_bytes(reg, col.atom, new_value, &right)? == Ordering::Equal {
            col.props.key = false;
            col.props.nokey = [p, p + 1];
        }
    }

    if col.props.minpos != NONE {
        let min_val = col.slot_bytes(col.props.minpos)?;
        if cmp_bytes(reg, col.atom, new_value, &min_val)? == Ordering::Less {
            col.props.minpos = p;
        } else if col.props.minpos == p
            && cmp_bytes(reg, col.atom, &old, new_value)? != Ordering::Equal
        {
            col.props.minpos = NONE;
        }
    }
    if col.props.maxpos != NONE {
        let max_val = col.slot_bytes(col.props.maxpos)?;
        if cmp_bytes(reg, col.atom, new_value, &max_val)? == Ordering::Greater {
            col.props.maxpos = p;
        } else if col.props.maxpos == p
            && cmp_bytes(reg, col.atom, &old, new_value)? != Ordering::Equal
        {
            col.props.maxpos = NONE;
        }
    }
    Ok(())
}

/// Delete the slot at OID `o` (spec §4.3). Deleting the last slot simply
/// shrinks the count; deleting any other slot swaps the last slot into
/// the freed position, which invalidates sortedness.
pub fn delete(col: &mut Column, o: u64, force: bool) -> Result<()> {
    ensure_writable(col)?;
    if o < col.hseqbase || o >= col.hseqbase + col.count as u64 {
        return Ok(());
    }
    let p = (o - col.hseqbase) as usize;
    if p < col.inserted && !force {
        return Err(error::record(Error::InvariantViolation(
            "cannot delete a committed slot without force".into(),
        )));
    }

    let last = col.count - 1;
    if p != last {
        let last_bytes = col.slot_bytes(last)?;
        {
            let width = col.width;
            let mut st = col.heap.write();
            let start = p * width;
            st.as_mut_slice()[start..start + width].copy_from_slice(&last_bytes);
            st.dirty = true;
        }
        if col.props.minpos == last {
            col.props.minpos = p;
        } else if col.props.minpos == p {
            col.props.minpos = NONE;
        }
        if col.props.maxpos == last {
            col.props.maxpos = p;
        } else if col.props.maxpos == p {
            col.props.maxpos = NONE;
        }
        col.props.sorted = false;
        col.props.revsorted = false;
    }

    col.count -= 1;
    if col.count == 0 {
        col.props.nil = false;
        col.props.nonil = true;
        col.props.sorted = true;
        col.props.revsorted = true;
        col.props.key = true;
        col.props.nosorted = 0;
        col.props.norevsorted = 0;
        col.props.nokey = [0, 0];
        col.props.minpos = NONE;
        col.props.maxpos = NONE;
    }
    Ok(())
}

/// Convert a void column to a fully populated `oid` column (spec §4.4).
pub fn materialize(col: &mut Column, mmap_threshold: usize) -> Result<()> {
    if col.is_view {
        return Err(error::record(Error::InvariantViolation(
            "cannot materialize a view".into(),
        )));
    }
    if !col.is_void() {
        return Ok(());
    }
    let base = col.tseqbase.ok_or_else(|| {
        error::record(Error::InvariantViolation(
            "void column has no seqbase to materialize".into(),
        ))
    })?;
    let mut buf = Vec::with_capacity(col.count * 8);
    for i in 0..col.count {
        buf.extend_from_slice(&(base + i as u64).to_le_bytes());
    }
    col.width = 8;
    col.shift = 3;
    col.heap.write().free = 0;
    col.heap.append(&buf, mmap_threshold)?;
    Ok(())
}

/// `slice(b, lo, hi)` (spec §4.4): a zero-copy view when `b` is read-only,
/// otherwise a copy.
pub fn slice(col: &Column, lo: usize, hi: usize) -> Result<Column> {
    if hi < lo || hi > col.count {
        return Err(error::record(Error::InvalidArgument(format!(
            "slice range [{lo},{hi}) out of bounds for count {}",
            col.count
        ))));
    }
    let n = hi - lo;
    if col.access == AccessMode::Read {
        let mut view = view_create(col);
        view.hseqbase = col.hseqbase + lo as u64;
        view.tseqbase = col.tseqbase.map(|b| b + lo as u64);
        view.count = n;
        view.capacity = n;
        view.props.sorted = col.props.sorted;
        view.props.revsorted = col.props.revsorted;
        view.props.key = col.props.key;
        view.props.minpos = NONE;
        view.props.maxpos = NONE;
        Ok(view)
    } else {
        copy_bun_range(col, lo, hi, false)
    }
}

/// Share the parent's heap(s); force read-only (spec §4.4). The caller
/// (pool) is responsible for assigning a real column id and bumping
/// `parent.share_count`.
pub fn view_create(parent: &Column) -> Column {
    Column {
        id: 0,
        atom: parent.atom,
        width: parent.width,
        shift: parent.shift,
        hseqbase: parent.hseqbase,
        tseqbase: parent.tseqbase,
        count: parent.count,
        capacity: parent.capacity,
        inserted: parent.inserted,
        heap: parent.heap.clone(),
        vheap: None,
        offset_width: parent.offset_width,
        props: parent.props.clone(),
        access: AccessMode::Read,
        persistence: Persistence::Transient,
        state: 0,
        recovery: super::RecoveryState::None,
        share_count: 0,
        parent: Some(parent.id),
        is_view: true,
        value_positions: HashMap::new(),
    }
}

/// BUN-by-BUN copy (spec §4.5 strategy 4): also used to materialise a void
/// source into a dense `oid` target (`elem_width` widens to 8 in that case).
/// `propagate_properties` carries `col`'s property bits over bit-for-bit
/// when the caller is copying the whole column at the same type (spec
/// §4.5: "when types match exactly, all properties are carried over");
/// a genuine sub-range (from `slice`) keeps the conservative reset, since
/// sortedness/key-ness of an arbitrary sub-range isn't re-derived here.
fn copy_bun_range(col: &Column, lo: usize, hi: usize, propagate_properties: bool) -> Result<Column> {
    let n = hi - lo;
    let elem_width = if col.is_void() { 8 } else { col.width };
    let heap = Heap::alloc(
        std::env::temp_dir().as_path(),
        format!("slice-{}-{lo}-{hi}.tail", col.id),
        0,
        1 << 30,
        0,
    )?;
    let mut buf = Vec::with_capacity(n * elem_width);
    for i in lo..hi {
        buf.extend(col.slot_bytes(i)?);
    }
    heap.append(&buf, 1 << 30)?;
    let (props, value_positions) = if propagate_properties {
        (col.props.clone(), col.value_positions.clone())
    } else {
        (super::properties::Properties::empty(), HashMap::new())
    };
    Ok(Column {
        id: 0,
        atom: col.atom,
        width: elem_width,
        shift: elem_width.trailing_zeros(),
        hseqbase: col.hseqbase + lo as u64,
        tseqbase: col.tseqbase.map(|b| b + lo as u64),
        count: n,
        capacity: n,
        inserted: 0,
        heap,
        vheap: None,
        offset_width: col.offset_width,
        props,
        access: AccessMode::Write,
        persistence: Persistence::Transient,
        state: 0,
        recovery: super::RecoveryState::None,
        share_count: 0,
        parent: None,
        is_view: false,
        value_positions,
    })
}

/// Void source, void target (spec §4.5 strategy 2): no heap data to copy,
/// only `count`/seqbase metadata. Gets its own (empty) heap rather than
/// sharing `col`'s, since a later `materialize` of the copy must not
/// overwrite the source.
fn copy_void_metadata(col: &Column) -> Result<Column> {
    let heap = Heap::alloc(
        std::env::temp_dir().as_path(),
        format!("void-copy-{}.tail", col.id),
        0,
        1 << 30,
        0,
    )?;
    Ok(Column {
        id: 0,
        atom: col.atom,
        width: 0,
        shift: 0,
        hseqbase: col.hseqbase,
        tseqbase: col.tseqbase,
        count: col.count,
        capacity: col.count,
        inserted: 0,
        heap,
        vheap: None,
        offset_width: 0,
        props: col.props.clone(),
        access: AccessMode::Write,
        persistence: Persistence::Transient,
        state: 0,
        recovery: super::RecoveryState::None,
        share_count: 0,
        parent: None,
        is_view: false,
        value_positions: col.value_positions.clone(),
    })
}

/// Whole-heap `memcpy` (spec §4.5 strategy 3), including the variable heap
/// when present: cheaper than a BUN-by-BUN copy for an atom with no custom
/// fix/unfix behaviour, since the stored bytes (and offsets into the
/// copied variable heap) stay valid verbatim.
fn copy_whole_heap(col: &Column) -> Result<Column> {
    let bytes = col.heap.read().as_slice().to_vec();
    let heap = Heap::alloc(
        std::env::temp_dir().as_path(),
        format!("copy-{}.tail", col.id),
        0,
        1 << 30,
        0,
    )?;
    heap.append(&bytes, 1 << 30)?;

    let vheap = match &col.vheap {
        Some(src_vh) => {
            let vbytes = src_vh.heap.read().as_slice().to_vec();
            let vh_heap = Heap::alloc(
                std::env::temp_dir().as_path(),
                format!("copy-{}.theap", col.id),
                0,
                1 << 30,
                0,
            )?;
            vh_heap.append(&vbytes, 1 << 30)?;
            let mut vh = VarHeap::new(vh_heap);
            vh.rebuild_index();
            Some(vh)
        }
        None => None,
    };

    Ok(Column {
        id: 0,
        atom: col.atom,
        width: col.width,
        shift: col.shift,
        hseqbase: col.hseqbase,
        tseqbase: col.tseqbase,
        count: col.count,
        capacity: col.count,
        inserted: 0,
        heap,
        vheap,
        offset_width: col.offset_width,
        props: col.props.clone(),
        access: AccessMode::Write,
        persistence: Persistence::Transient,
        state: 0,
        recovery: super::RecoveryState::None,
        share_count: 0,
        parent: None,
        is_view: false,
        value_positions: col.value_positions.clone(),
    })
}

/// `copy(b, writable)` (spec §4.4, §4.5): a zero-copy view, a
/// metadata-only copy for void columns, a whole-heap `memcpy` for atoms
/// without custom fix/unfix behaviour, or a BUN-by-BUN copy otherwise.
/// Propagates all property bits whenever the copy keeps `col`'s exact
/// type (every path here does, since `copy` never changes the atom).
pub fn copy(col: &Column, writable: bool, reg: &AtomRegistry) -> Result<Column> {
    if !writable && col.access == AccessMode::Read {
        let mut view = view_create(col);
        view.persistence = Persistence::Transient;
        return Ok(view);
    }
    if col.is_void() {
        return copy_void_metadata(col);
    }
    let desc = reg
        .get(col.atom)
        .ok_or_else(|| error::record(Error::TypeMismatch(format!("unknown atom {}", col.atom))))?;
    if desc.fix.is_none() && desc.unfix.is_none() {
        return copy_whole_heap(col);
    }
    copy_bun_range(col, 0, col.count, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::AtomRegistry;
    use crate::column::{Column, Persistence};
    use std::path::PathBuf;

    fn tmp_dir(tag: &str) -> PathBuf {
        let d = std::env::temp_dir().join(format!("gdk_colops_{tag}_{}", std::process::id()));
        std::fs::create_dir_all(&d).unwrap();
        d
    }

    fn int_col(dir: &std::path::Path, id: i64, reg: &AtomRegistry) -> Column {
        let atom = reg.lookup_by_name("int").unwrap();
        let heap = Heap::alloc(dir, format!("{id}.tail"), 64, 1 << 20, 0).unwrap();
        Column::new(id, atom, 4, false, 4, 0, heap, None, Persistence::Transient)
    }

    #[test]
    fn scenario_1_append_and_replace() {
        let reg = AtomRegistry::new();
        let dir = tmp_dir("scenario1");
        let mut col = int_col(&dir, 1, &reg);

        append_fixed(&mut col, &reg, &1i32.to_le_bytes(), 1 << 20).unwrap();
        append_fixed(&mut col, &reg, &2i32.to_le_bytes(), 1 << 20).unwrap();
        append_fixed(&mut col, &reg, &3i32.to_le_bytes(), 1 << 20).unwrap();
        assert!(col.props.sorted);
        assert!(col.props.key);
        assert!(col.props.nonil);
        assert_eq!(col.props.minpos, 0);
        assert_eq!(col.props.maxpos, 2);

        append_fixed(&mut col, &reg, &2i32.to_le_bytes(), 1 << 20).unwrap();
        assert!(!col.props.key);
        assert_eq!(col.props.nokey, [1, 3]);
        assert_eq!(col.props.maxpos, 2);

        replace_fixed(&mut col, &reg, 3, &5i32.to_le_bytes(), true).unwrap();
        assert_eq!(col.props.maxpos, 3);
        assert!(!col.props.key);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn delete_last_slot_skips_swap_path() {
        let reg = AtomRegistry::new();
        let dir = tmp_dir("delete_last");
        let mut col = int_col(&dir, 2, &reg);
        for v in [10i32, 20, 30] {
            append_fixed(&mut col, &reg, &v.to_le_bytes(), 1 << 20).unwrap();
        }
        delete(&mut col, 2, true).unwrap();
        assert_eq!(col.count, 2);
        assert_eq!(
            i32::from_le_bytes(col.slot_bytes(0).unwrap().try_into().unwrap()),
            10
        );
        assert_eq!(
            i32::from_le_bytes(col.slot_bytes(1).unwrap().try_into().unwrap()),
            20
        );
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn delete_to_empty_resets_properties() {
        let reg = AtomRegistry::new();
        let dir = tmp_dir("delete_empty");
        let mut col = int_col(&dir, 3, &reg);
        append_fixed(&mut col, &reg, &1i32.to_le_bytes(), 1 << 20).unwrap();
        delete(&mut col, 0, true).unwrap();
        assert_eq!(col.count, 0);
        assert!(col.props.nonil);
        assert!(!col.props.nil);
        assert!(col.props.sorted);
        assert!(col.props.key);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn void_column_materializes_to_dense_oid() {
        let reg = AtomRegistry::new();
        let oid = reg.lookup_by_name("oid").unwrap();
        let dir = tmp_dir("materialize");
        let heap = Heap::alloc(&dir, "4.tail", 0, 1 << 20, 0).unwrap();
        let mut col = Column::new(4, oid, 0, false, 5, 100, heap, None, Persistence::Transient);
        col.count = 5;
        col.tseqbase = Some(100);
        materialize(&mut col, 1 << 20).unwrap();
        assert!(!col.is_void());
        for i in 0..5u64 {
            let bytes = col.slot_bytes(i as usize).unwrap();
            assert_eq!(u64::from_le_bytes(bytes.try_into().unwrap()), 100 + i);
        }
        assert_eq!(col.tseqbase, Some(100));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn slice_of_read_only_column_is_a_view_sharing_the_heap() {
        let reg = AtomRegistry::new();
        let dir = tmp_dir("slice_view");
        let mut col = int_col(&dir, 5, &reg);
        for v in [1i32, 2, 3, 4] {
            append_fixed(&mut col, &reg, &v.to_le_bytes(), 1 << 20).unwrap();
        }
        col.access = AccessMode::Read;
        let view = slice(&col, 1, 3).unwrap();
        assert!(view.is_view);
        assert_eq!(view.count, 2);
        assert_eq!(view.hseqbase, col.hseqbase + 1);
        assert_eq!(view.heap.refcount(), col.heap.refcount());
        std::fs::remove_dir_all(dir).ok();
    }

    fn str_col(dir: &std::path::Path, id: i64, reg: &AtomRegistry) -> Column {
        let atom = reg.lookup_by_name("str").unwrap();
        let heap = Heap::alloc(dir, format!("{id}.tail"), 64, 1 << 20, 0).unwrap();
        let vheap = Heap::alloc(dir, format!("{id}.theap"), 64, 1 << 20, 0).unwrap();
        Column::new(id, atom, 0, true, 4, 0, heap, Some(vheap), Persistence::Transient)
    }

    #[test]
    fn scenario_2_string_unique_estimate() {
        let reg = AtomRegistry::new();
        let dir = tmp_dir("scenario2");
        let mut col = str_col(&dir, 6, &reg);

        append_strings(&mut col, &[b"a", b"bb", b"ccc", b"a"], 1 << 20).unwrap();
        assert!(!col.props.key);
        assert_eq!(col.props.nokey, [0, 3]);
        assert_eq!(col.props.unique_est, 3.0);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn copy_void_column_is_metadata_only_and_independent() {
        let reg = AtomRegistry::new();
        let oid = reg.lookup_by_name("oid").unwrap();
        let dir = tmp_dir("copy_void");
        let heap = Heap::alloc(&dir, "7.tail", 0, 1 << 20, 0).unwrap();
        let mut col = Column::new(7, oid, 0, false, 5, 100, heap, None, Persistence::Transient);
        col.count = 5;
        col.tseqbase = Some(100);

        let copy_col = copy(&col, true, &reg).unwrap();
        assert!(copy_col.is_void());
        assert_eq!(copy_col.count, 5);
        assert_eq!(copy_col.tseqbase, Some(100));

        let mut materialized = copy_col;
        materialize(&mut materialized, 1 << 20).unwrap();
        assert!(col.is_void());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn copy_whole_heap_propagates_properties_for_fix_free_atom() {
        let reg = AtomRegistry::new();
        let dir = tmp_dir("copy_memcpy");
        let mut col = int_col(&dir, 8, &reg);
        for v in [1i32, 2, 3] {
            append_fixed(&mut col, &reg, &v.to_le_bytes(), 1 << 20).unwrap();
        }
        assert!(col.props.sorted);
        assert!(col.props.key);

        let copy_col = copy(&col, true, &reg).unwrap();
        assert_eq!(copy_col.count, 3);
        assert!(copy_col.props.sorted);
        assert!(copy_col.props.key);
        assert_eq!(copy_col.props.unique_est, col.props.unique_est);
        for i in 0..3 {
            assert_eq!(copy_col.slot_bytes(i).unwrap(), col.slot_bytes(i).unwrap());
        }

        std::fs::remove_dir_all(dir).ok();
    }
}
