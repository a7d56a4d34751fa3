//! Order index (spec §4.8): a persisted permutation array plus a k-way
//! merge used to combine partial, already-sorted order indexes (e.g. one
//! per heap segment) into a single index.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{self, Error, Result};

const MAGIC_VERSION: u64 = 1;

/// A permutation over row positions: `order[i]` is the original position
/// of the element that sorts into slot `i`.
pub struct OrderIndex {
    pub version: u64,
    pub stable: bool,
    pub order: Vec<u64>,
}

impl OrderIndex {
    pub fn identity(n: usize) -> Self {
        OrderIndex {
            version: MAGIC_VERSION,
            stable: true,
            order: (0..n as u64).collect(),
        }
    }

    pub fn from_permutation(order: Vec<u64>, stable: bool) -> Self {
        OrderIndex {
            version: MAGIC_VERSION,
            stable,
            order,
        }
    }

    /// Write the 3-OID header (version, count, stable) followed by the
    /// permutation, all little-endian `u64`s (spec §6.3).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = File::create(path)?;
        f.write_all(&self.version.to_le_bytes())?;
        f.write_all(&(self.order.len() as u64).to_le_bytes())?;
        f.write_all(&(self.stable as u64).to_le_bytes())?;
        for v in &self.order {
            f.write_all(&v.to_le_bytes())?;
        }
        f.sync_all()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut f = File::open(path)
            .map_err(|e| error::record(Error::Corruption(format!("cannot open order index: {e}"))))?;
        let mut header = [0u8; 24];
        f.read_exact(&mut header)
            .map_err(|e| error::record(Error::Corruption(format!("truncated order index header: {e}"))))?;
        let version = u64::from_le_bytes(header[0..8].try_into().unwrap());
        let count = u64::from_le_bytes(header[8..16].try_into().unwrap()) as usize;
        let stable = u64::from_le_bytes(header[16..24].try_into().unwrap()) != 0;
        let mut body = Vec::new();
        f.read_to_end(&mut body)?;
        if body.len() != count * 8 {
            return Err(error::record(Error::Corruption(format!(
                "order index body length {} does not match header count {count}",
                body.len()
            ))));
        }
        let order = body
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        Ok(OrderIndex {
            version,
            stable,
            order,
        })
    }
}

/// Merge two already-sorted partial order indexes under `cmp` (comparing
/// two row positions by their underlying values), O(n) (spec §4.8).
pub fn merge_two(a: &[u64], b: &[u64], cmp: impl Fn(u64, u64) -> Ordering) -> Vec<u64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if cmp(a[i], b[j]) != Ordering::Greater {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Merge more than two partial order indexes. Repeated pairwise `merge_two`
/// degrades to O(n * k); for `k <= 2` this is exactly `merge_two`. Larger
/// fan-ins pick the minimum head across all k parts on each step, which is
/// also O(n * k) but avoids materializing intermediate merges.
pub fn merge_many(parts: &[Vec<u64>], cmp: impl Fn(u64, u64) -> Ordering) -> Vec<u64> {
    match parts.len() {
        0 => return Vec::new(),
        1 => return parts[0].clone(),
        2 => return merge_two(&parts[0], &parts[1], cmp),
        _ => {}
    }
    let total: usize = parts.iter().map(|p| p.len()).sum();
    let mut cursors = vec![0usize; parts.len()];
    let mut out = Vec::with_capacity(total);
    loop {
        let mut best: Option<(usize, u64)> = None;
        for (p, cursor) in cursors.iter().enumerate() {
            if *cursor >= parts[p].len() {
                continue;
            }
            let candidate = parts[p][*cursor];
            best = match best {
                None => Some((p, candidate)),
                Some((_, cur)) if cmp(candidate, cur) == Ordering::Less => Some((p, candidate)),
                other => other,
            };
        }
        match best {
            Some((p, v)) => {
                out.push(v);
                cursors[p] += 1;
            }
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_index_is_the_natural_order() {
        let idx = OrderIndex::identity(4);
        assert_eq!(idx.order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn merge_two_preserves_sortedness() {
        let values = [5i32, 1, 3, 9, 2, 8];
        let cmp = |a: u64, b: u64| values[a as usize].cmp(&values[b as usize]);
        let a = vec![1u64, 2, 0]; // values 1,3,5
        let b = vec![4u64, 5, 3]; // values 2,8,9
        let merged = merge_two(&a, &b, cmp);
        let merged_values: Vec<i32> = merged.iter().map(|&i| values[i as usize]).collect();
        assert_eq!(merged_values, vec![1, 2, 3, 5, 8, 9]);
    }

    #[test]
    fn merge_many_k_way_matches_full_sort() {
        let values = [7i32, 2, 9, 0, 5, 3, 8, 1, 6, 4];
        let cmp = |a: u64, b: u64| values[a as usize].cmp(&values[b as usize]);
        let mut parts = vec![vec![3u64, 7, 1], vec![5u64, 9, 4], vec![0u64, 8, 6, 2]];
        for p in parts.iter_mut() {
            p.sort_by(|&a, &b| cmp(a, b));
        }
        let merged = merge_many(&parts, cmp);
        let merged_values: Vec<i32> = merged.iter().map(|&i| values[i as usize]).collect();
        let mut expected = values.to_vec();
        expected.sort();
        assert_eq!(merged_values, expected);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let path = std::env::temp_dir().join(format!("gdk_orderidx_{}.orderidx", std::process::id()));
        let idx = OrderIndex::from_permutation(vec![2, 0, 1], false);
        idx.save(&path).unwrap();
        let loaded = OrderIndex::load(&path).unwrap();
        assert_eq!(loaded.order, vec![2, 0, 1]);
        assert!(!loaded.stable);
        std::fs::remove_file(&path).ok();
    }
}
