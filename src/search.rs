//! Binary and linear search (spec §4.9): binary search over a column
//! known to be sorted (or over an order index's permutation), falling
//! back to a linear scan otherwise.

use std::cmp::Ordering;

use crate::atoms::{AtomId, AtomRegistry};
use crate::column::Column;
use crate::error::{self, Error, Result};

fn cmp_bytes(reg: &AtomRegistry, atom: AtomId, l: &[u8], r: &[u8]) -> Result<Ordering> {
    let desc = reg
        .get(atom)
        .ok_or_else(|| error::record(Error::TypeMismatch(format!("unknown atom {atom}"))))?;
    Ok((desc.cmp)(l, r))
}

/// Binary search a column known to be sorted (spec §4.9), returning the
/// half-open range of positions equal to `target`.
pub fn binary_search_sorted(
    col: &Column,
    reg: &AtomRegistry,
    target: &[u8],
) -> Result<(usize, usize)> {
    if !col.props.sorted {
        return Err(error::record(Error::InvariantViolation(
            "binary_search_sorted requires a sorted column".into(),
        )));
    }
    let lo = lower_bound(col.count, |i| cmp_bytes(reg, col.atom, &col.slot_bytes(i)?, target))?;
    let hi = upper_bound(col.count, |i| cmp_bytes(reg, col.atom, &col.slot_bytes(i)?, target))?;
    Ok((lo, hi))
}

/// Binary search over an order index permutation (spec §4.9): `key(pos)`
/// extracts the comparable bytes for the row at permutation-relative
/// index `pos`.
pub fn binary_search_order(
    order: &[u64],
    reg: &AtomRegistry,
    atom: AtomId,
    key: impl Fn(u64) -> Result<Vec<u8>>,
    target: &[u8],
) -> Result<(usize, usize)> {
    let lo = lower_bound(order.len(), |i| cmp_bytes(reg, atom, &key(order[i])?, target))?;
    let hi = upper_bound(order.len(), |i| cmp_bytes(reg, atom, &key(order[i])?, target))?;
    Ok((lo, hi))
}

fn lower_bound(n: usize, cmp_at: impl Fn(usize) -> Result<Ordering>) -> Result<usize> {
    let (mut lo, mut hi) = (0usize, n);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp_at(mid)? == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

fn upper_bound(n: usize, cmp_at: impl Fn(usize) -> Result<Ordering>) -> Result<usize> {
    let (mut lo, mut hi) = (0usize, n);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp_at(mid)? == Ordering::Greater {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(lo)
}

/// Linear scan fallback (spec §4.9): every position equal to `target`.
pub fn linear_scan(col: &Column, reg: &AtomRegistry, target: &[u8]) -> Result<Vec<usize>> {
    let mut hits = Vec::new();
    for i in 0..col.count {
        let v = col.slot_bytes(i)?;
        if cmp_bytes(reg, col.atom, &v, target)? == Ordering::Equal {
            hits.push(i);
        }
    }
    Ok(hits)
}
