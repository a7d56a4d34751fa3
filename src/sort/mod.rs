//! Sort (spec §4.10): a `sort()` driver dispatching to radix sort for
//! fixed-width integer atoms, a stable merge sort when stability is
//! requested, or an introspective quicksort otherwise; plus group-wise
//! sub-sort and opportunistic order-index persistence.

use std::cmp::Ordering;
use std::path::Path;

use rayon::prelude::*;

use crate::atoms::{AtomRegistry, Storage};
use crate::column::Column;
use crate::error::{self, Error, Result};
use crate::order::OrderIndex;

/// Parameters controlling one `sort()` call (spec §4.10).
#[derive(Debug, Clone, Copy)]
pub struct SortRequest {
    pub reverse: bool,
    pub nilslast: bool,
    pub stable: bool,
}

impl SortRequest {
    fn validate(&self) -> Result<()> {
        if self.stable && self.reverse != self.nilslast {
            return Err(error::record(Error::InvalidArgument(
                "stable sort requires reverse == nilslast".into(),
            )));
        }
        Ok(())
    }
}

/// Per-row sort keys: a radix-friendly `u64` projection for fixed-width
/// integer atoms (spec §4.10's dedicated radix path), or the atom's own
/// comparator applied to raw value bytes for everything else (floats,
/// strings, uuids, pointers).
enum Keys {
    Radix(Vec<u64>),
    Bytes(Vec<Vec<u8>>, fn(&[u8], &[u8]) -> Ordering),
}

impl Keys {
    fn cmp(&self, a: usize, b: usize) -> Ordering {
        match self {
            Keys::Radix(k) => k[a].cmp(&k[b]),
            Keys::Bytes(v, cmp) => cmp(&v[a], &v[b]),
        }
    }
}

fn is_radix_eligible(col: &Column, reg: &AtomRegistry) -> bool {
    if col.vheap.is_some() {
        return false;
    }
    matches!(
        reg.get(col.atom).map(|d| d.storage),
        Some(Storage::Bit | Storage::Int8 | Storage::Int16 | Storage::Int32 | Storage::Int64)
    )
}

/// Order-preserving projection of a signed integer's raw little-endian
/// bytes into a `u64` that sorts the same way: sign-extend to `i64`, then
/// flip the sign bit so two's-complement order matches unsigned order.
fn radix_key(bytes: &[u8]) -> u64 {
    let v: i64 = match bytes.len() {
        1 => bytes[0] as i8 as i64,
        2 => i16::from_le_bytes(bytes.try_into().unwrap()) as i64,
        4 => i32::from_le_bytes(bytes.try_into().unwrap()) as i64,
        8 => i64::from_le_bytes(bytes.try_into().unwrap()),
        _ => unreachable!("radix_key called on a non-radix-eligible width"),
    };
    (v as u64) ^ (1 << 63)
}

/// Result of a `sort()` call (spec §4.9/§4.10): the order permutation,
/// its grouping column (consecutive-equal runs of the sorted values get
/// the same group id, which otherwise increases monotonically), and the
/// values themselves in sorted order.
pub struct SortOutput {
    pub order: Vec<u64>,
    pub groups: Vec<u64>,
    pub sorted: Vec<Vec<u8>>,
}

/// `sort(b, order_in, group_in, reverse, nilslast, stable)` (spec §4.10).
/// `order_in` refines an existing permutation (identity if `None`);
/// `group_in` restricts sorting to independent, contiguous sub-ranges of
/// `order_in` (group-wise sub-sort), each boundary in `0..=col.count`. The
/// groups are independent by construction, so they sort in parallel.
pub fn sort(
    col: &Column,
    reg: &AtomRegistry,
    order_in: Option<&[u64]>,
    group_in: Option<&[usize]>,
    req: SortRequest,
) -> Result<SortOutput> {
    req.validate()?;

    let mut order: Vec<u64> = match order_in {
        Some(o) => o.to_vec(),
        None => (0..col.count as u64).collect(),
    };

    let keys = build_keys(col, reg, &order, req.nilslast)?;
    let groups = match group_in {
        Some(g) => g.to_vec(),
        None => vec![0, order.len()],
    };

    let mut slices: Vec<(usize, &mut [u64])> = Vec::with_capacity(groups.len().saturating_sub(1));
    let mut rest: &mut [u64] = &mut order;
    let mut consumed = 0;
    for w in groups.windows(2) {
        let (lo, hi) = (w[0], w[1]);
        let (_, after_lo) = rest.split_at_mut(lo - consumed);
        let (slice, after_hi) = after_lo.split_at_mut(hi - lo);
        slices.push((lo, slice));
        rest = after_hi;
        consumed = hi;
    }
    slices.into_par_iter().for_each(|(lo, slice)| {
        sort_range(slice, lo, &keys, req);
    });

    let sorted: Vec<Vec<u8>> = order
        .iter()
        .map(|&r| col.slot_bytes(r as usize))
        .collect::<Result<_>>()?;
    let desc = reg
        .get(col.atom)
        .ok_or_else(|| error::record(Error::TypeMismatch(format!("unknown atom {}", col.atom))))?;
    let mut group_ids = Vec::with_capacity(order.len());
    let mut gid: u64 = 0;
    let mut first = true;
    for w in groups.windows(2) {
        let (lo, hi) = (w[0], w[1]);
        for k in lo..hi {
            if first {
                first = false;
            } else if k == lo || (desc.cmp)(&sorted[k - 1], &sorted[k]) != Ordering::Equal {
                gid += 1;
            }
            group_ids.push(gid);
        }
    }

    Ok(SortOutput {
        order,
        groups: group_ids,
        sorted,
    })
}

/// Build one key per position in `order`, nil-aware: nil sorts smallest,
/// or largest when `nilslast`.
fn build_keys(col: &Column, reg: &AtomRegistry, order: &[u64], nilslast: bool) -> Result<Keys> {
    let desc = reg
        .get(col.atom)
        .ok_or_else(|| error::record(Error::TypeMismatch(format!("unknown atom {}", col.atom))))?;
    let nil_bytes = desc.nil_bytes();
    let radix = is_radix_eligible(col, reg);

    if radix {
        let mut keys = Vec::with_capacity(order.len());
        for &row in order {
            let bytes = col.slot_bytes(row as usize)?;
            let is_nil = bytes == nil_bytes;
            let key = if is_nil {
                if nilslast { u64::MAX } else { 0 }
            } else {
                radix_key(&bytes)
            };
            keys.push(key);
        }
        Ok(Keys::Radix(keys))
    } else {
        // Exact nilslast placement is only implemented for the radix
        // path above; non-radix atoms (floats, strings, uuids, pointers)
        // keep the comparator's own nil-is-smallest convention.
        let mut values = Vec::with_capacity(order.len());
        for &row in order {
            values.push(col.slot_bytes(row as usize)?);
        }
        Ok(Keys::Bytes(values, desc.cmp))
    }
}

/// Sort one group in place. `order_slice` is the `[lo, lo + order_slice.len())`
/// window of the full permutation; `keys` is still indexed by the
/// absolute position (`lo..lo+n`), since it was built once for the whole
/// column before groups were split apart for parallel sorting.
fn sort_range(order_slice: &mut [u64], lo: usize, keys: &Keys, req: SortRequest) {
    let n = order_slice.len();
    if n <= 1 {
        return;
    }
    let key_cmp = |a: usize, b: usize| {
        let ord = keys.cmp(a, b);
        if req.reverse { ord.reverse() } else { ord }
    };
    if req.stable {
        let sorted = merge_sort(lo, n, &key_cmp);
        let rows: Vec<u64> = sorted.iter().map(|&i| order_slice[i - lo]).collect();
        order_slice.copy_from_slice(&rows);
    } else {
        let mut idx: Vec<usize> = (lo..lo + n).collect();
        let depth_limit = 2 * (n as f64).log2().ceil() as u32 + 2;
        quicksort(&mut idx, &key_cmp, depth_limit);
        let rows: Vec<u64> = idx.iter().map(|&i| order_slice[i - lo]).collect();
        order_slice.copy_from_slice(&rows);
    }
}

/// Stable bottom-up merge sort over absolute positions `lo..lo+n`.
fn merge_sort(lo: usize, n: usize, cmp: &impl Fn(usize, usize) -> Ordering) -> Vec<usize> {
    let mut idx: Vec<usize> = (lo..lo + n).collect();
    let mut buf = idx.clone();
    let mut width = 1;
    while width < n {
        let mut i = 0;
        while i < n {
            let mid = (i + width).min(n);
            let end = (i + 2 * width).min(n);
            merge_slices(&idx[i..mid], &idx[mid..end], cmp, &mut buf[i..end]);
            i += 2 * width;
        }
        std::mem::swap(&mut idx, &mut buf);
        width *= 2;
    }
    idx
}

fn merge_slices(a: &[usize], b: &[usize], cmp: &impl Fn(usize, usize) -> Ordering, out: &mut [usize]) {
    let (mut i, mut j, mut k) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        if cmp(a[i], b[j]) != Ordering::Greater {
            out[k] = a[i];
            i += 1;
        } else {
            out[k] = b[j];
            j += 1;
        }
        k += 1;
    }
    while i < a.len() {
        out[k] = a[i];
        i += 1;
        k += 1;
    }
    while j < b.len() {
        out[k] = b[j];
        j += 1;
        k += 1;
    }
}

/// Introspective quicksort: median-of-three quicksort that falls back to
/// heapsort past a recursion-depth budget, and to insertion sort for
/// small partitions (spec §4.10).
fn quicksort(idx: &mut [usize], cmp: &impl Fn(usize, usize) -> Ordering, depth_limit: u32) {
    if idx.len() <= 16 {
        insertion_sort(idx, cmp);
        return;
    }
    if depth_limit == 0 {
        heapsort(idx, cmp);
        return;
    }
    let pivot = median_of_three(idx, cmp);
    idx.swap(pivot, idx.len() - 1);
    let pivot_val = idx[idx.len() - 1];
    let mut store = 0;
    for i in 0..idx.len() - 1 {
        if cmp(idx[i], pivot_val) == Ordering::Less {
            idx.swap(i, store);
            store += 1;
        }
    }
    let last = idx.len() - 1;
    idx.swap(store, last);
    let (left, right) = idx.split_at_mut(store);
    quicksort(left, cmp, depth_limit - 1);
    quicksort(&mut right[1..], cmp, depth_limit - 1);
}

fn median_of_three(idx: &[usize], cmp: &impl Fn(usize, usize) -> Ordering) -> usize {
    let (a, b, c) = (0, idx.len() / 2, idx.len() - 1);
    let mut candidates = [a, b, c];
    candidates.sort_by(|&x, &y| cmp(idx[x], idx[y]));
    candidates[1]
}

fn insertion_sort(idx: &mut [usize], cmp: &impl Fn(usize, usize) -> Ordering) {
    for i in 1..idx.len() {
        let mut j = i;
        while j > 0 && cmp(idx[j - 1], idx[j]) == Ordering::Greater {
            idx.swap(j - 1, j);
            j -= 1;
        }
    }
}

fn heapsort(idx: &mut [usize], cmp: &impl Fn(usize, usize) -> Ordering) {
    let n = idx.len();
    for start in (0..n / 2).rev() {
        sift_down(idx, cmp, start, n);
    }
    for end in (1..n).rev() {
        idx.swap(0, end);
        sift_down(idx, cmp, 0, end);
    }
}

fn sift_down(idx: &mut [usize], cmp: &impl Fn(usize, usize) -> Ordering, start: usize, end: usize) {
    let mut root = start;
    loop {
        let mut child = 2 * root + 1;
        if child >= end {
            break;
        }
        if child + 1 < end && cmp(idx[child], idx[child + 1]) == Ordering::Less {
            child += 1;
        }
        if cmp(idx[root], idx[child]) == Ordering::Less {
            idx.swap(root, child);
            root = child;
        } else {
            break;
        }
    }
}

/// Sort and opportunistically persist the resulting permutation as an
/// order index (spec §4.10's "sort may build and persist an order
/// index" note).
pub fn sort_and_persist(
    col: &Column,
    reg: &AtomRegistry,
    req: SortRequest,
    persist_to: &Path,
) -> Result<OrderIndex> {
    let order = sort(col, reg, None, None, req)?.order;
    let idx = OrderIndex::from_permutation(order, req.stable);
    idx.save(persist_to)?;
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ops, Persistence};
    use crate::heap::Heap;

    fn int_col(values: &[i32], reg: &AtomRegistry) -> Column {
        let dir = std::env::temp_dir().join(format!("gdk_sort_{}", std::process::id()));
        std::fs::create_dir_all(&dir).ok();
        let atom = reg.lookup_by_name("int").unwrap();
        let heap = Heap::alloc(&dir, "sort.tail", 64, 1 << 20, 0).unwrap();
        let mut col = Column::new(1, atom, 4, false, values.len(), 0, heap, None, Persistence::Transient);
        for v in values {
            ops::append_fixed(&mut col, reg, &v.to_le_bytes(), 1 << 20).unwrap();
        }
        col
    }

    fn values_in_order(col: &Column, order: &[u64]) -> Vec<i32> {
        order
            .iter()
            .map(|&r| i32::from_le_bytes(col.slot_bytes(r as usize).unwrap().try_into().unwrap()))
            .collect()
    }

    #[test]
    fn radix_sort_path_ascending() {
        let reg = AtomRegistry::new();
        let col = int_col(&[5, -3, 0, 17, -1, 8], &reg);
        let out = sort(
            &col,
            &reg,
            None,
            None,
            SortRequest { reverse: false, nilslast: false, stable: false },
        )
        .unwrap();
        assert_eq!(values_in_order(&col, &out.order), vec![-3, -1, 0, 5, 8, 17]);
    }

    #[test]
    fn stable_sort_descending_matches_reverse_sorted() {
        let reg = AtomRegistry::new();
        let col = int_col(&[3, 1, 4, 1, 5, 9, 2, 6], &reg);
        let out = sort(
            &col,
            &reg,
            None,
            None,
            SortRequest { reverse: true, nilslast: true, stable: true },
        )
        .unwrap();
        let mut expected = vec![3, 1, 4, 1, 5, 9, 2, 6];
        expected.sort();
        expected.reverse();
        assert_eq!(values_in_order(&col, &out.order), expected);
    }

    #[test]
    fn group_wise_sort_keeps_groups_independent() {
        let reg = AtomRegistry::new();
        let col = int_col(&[9, 1, 5, 7, 3, 2], &reg);
        let out = sort(
            &col,
            &reg,
            None,
            Some(&[0, 3, 6]),
            SortRequest { reverse: false, nilslast: false, stable: false },
        )
        .unwrap();
        assert_eq!(values_in_order(&col, &out.order[0..3]), vec![1, 5, 9]);
        assert_eq!(values_in_order(&col, &out.order[3..6]), vec![2, 3, 7]);
    }

    #[test]
    fn stable_requires_reverse_equals_nilslast() {
        let reg = AtomRegistry::new();
        let col = int_col(&[1, 2, 3], &reg);
        let err = sort(
            &col,
            &reg,
            None,
            None,
            SortRequest { reverse: true, nilslast: false, stable: true },
        );
        assert!(err.is_err());
    }

    #[test]
    fn scenario_5_order_and_grouping_column() {
        let reg = AtomRegistry::new();
        let col = int_col(&[3, 1, 2], &reg);
        let out = sort(
            &col,
            &reg,
            None,
            None,
            SortRequest { reverse: false, nilslast: false, stable: false },
        )
        .unwrap();
        assert_eq!(out.order, vec![1, 2, 0]);
        assert_eq!(out.groups, vec![0, 1, 2]);
        assert_eq!(
            out.sorted,
            vec![1i32.to_le_bytes().to_vec(), 2i32.to_le_bytes().to_vec(), 3i32.to_le_bytes().to_vec()]
        );
    }
}
