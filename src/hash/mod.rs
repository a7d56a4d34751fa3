//! Hash index (spec §4.7): open addressing with link chains over a
//! power-of-two bucket array, grown one bucket at a time (linear hashing)
//! instead of a full rehash, and persisted as a `.hashb`/`.hashl` sidecar
//! pair.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{self, Error, Result};

const NIL: u32 = u32::MAX;
/// Linear-hashing splits once a bucket's average chain length passes this
/// fraction of 1 (i.e. `nonempty / bucket_count >= 7/8`).
const GROW_LOAD_FACTOR: f64 = 7.0 / 8.0;

/// Pick an initial bucket count by probing hashes of the first 25% of
/// candidates at increasing sizes (spec §4.7): the smallest size that
/// keeps the sampled collision rate low wins, avoiding both an
/// undersized table (long chains) and an oversized one (wasted buckets).
pub fn choose_bucket_count(ncand: usize, sample: &[u64]) -> usize {
    let steps = [ncand / 64, ncand / 16, ncand / 4, ncand];
    for step in steps {
        let count = step.max(1).next_power_of_two();
        let mask = (count - 1) as u64;
        if sample.is_empty() {
            return count;
        }
        let seen: HashSet<u64> = sample.iter().map(|h| h & mask).collect();
        if seen.len() as f64 >= 0.8 * sample.len() as f64 {
            return count;
        }
    }
    ncand.max(1).next_power_of_two()
}

#[derive(Serialize, Deserialize)]
struct HashFile {
    mask: usize,
    split: usize,
    bucket: Vec<u32>,
    link: Vec<u32>,
    hash: Vec<u64>,
    persisted: bool,
}

/// An open-addressed hash index over one column's values.
pub struct HashIndex {
    mask: usize,
    /// Next bucket to split when the load factor trips (linear hashing).
    split: usize,
    bucket: Vec<u32>,
    /// `link[row]` is the previous row hashing to the same bucket, or NIL.
    link: Vec<u32>,
    /// `hash[row]` is cached so a split can re-bucket without recomputing.
    hash: Vec<u64>,
    nonempty: usize,
    nunique_buckets: usize,
    persisted: bool,
}

impl HashIndex {
    pub fn new(ncand: usize, sample: &[u64]) -> Self {
        let count = choose_bucket_count(ncand, sample);
        HashIndex {
            mask: count - 1,
            split: 0,
            bucket: vec![NIL; count],
            link: Vec::new(),
            hash: Vec::new(),
            nonempty: 0,
            nunique_buckets: 0,
            persisted: false,
        }
    }

    fn bucket_count(&self) -> usize {
        self.bucket.len()
    }

    fn ensure_capacity(&mut self, row: usize) {
        if self.link.len() <= row {
            self.link.resize(row + 1, NIL);
            self.hash.resize(row + 1, 0);
        }
    }

    /// Chain length at bucket `b`, capped at 2 (all callers only need to
    /// distinguish 0 / 1 / many).
    fn bucket_len_capped(&self, b: usize) -> usize {
        self.chain_len_capped(self.bucket[b])
    }

    /// Insert `row` (whose value hashes to `hash`), maintaining the
    /// nonempty-bucket and singleton-bucket counters and splitting a
    /// bucket if the load factor has tripped (spec §4.7).
    pub fn insert(&mut self, row: u32, hash: u64) {
        self.ensure_capacity(row as usize);
        self.hash[row as usize] = hash;

        let b = self.bucket_index(hash);
        let before = self.bucket_len_capped(b);
        self.link[row as usize] = self.bucket[b];
        self.bucket[b] = row;
        match before {
            0 => {
                self.nonempty += 1;
                self.nunique_buckets += 1;
            }
            1 => self.nunique_buckets -= 1,
            _ => {}
        }

        if self.nonempty as f64 / self.bucket_count() as f64 >= GROW_LOAD_FACTOR {
            self.split_one_bucket();
        }
    }

    /// Remove `row` (whose value hashes to `hash`) from its chain.
    pub fn delete(&mut self, row: u32, hash: u64) -> Result<()> {
        let b = self.bucket_index(hash);
        let mut cur = self.bucket[b];
        let mut prev: Option<u32> = None;
        while cur != NIL {
            if cur == row {
                let next = self.link[cur as usize];
                match prev {
                    Some(p) => self.link[p as usize] = next,
                    None => self.bucket[b] = next,
                }
                let after = self.bucket_len_capped(b);
                match after {
                    0 => {
                        self.nonempty -= 1;
                        self.nunique_buckets -= 1;
                    }
                    1 => self.nunique_buckets += 1,
                    _ => {}
                }
                return Ok(());
            }
            prev = Some(cur);
            cur = self.link[cur as usize];
        }
        Err(error::record(Error::NotFound(format!(
            "row {row} not present in hash bucket {b}"
        ))))
    }

    fn bucket_index(&self, hash: u64) -> usize {
        let low = (hash & self.mask as u64) as usize;
        // Linear hashing: rows in [0, split) have already migrated to the
        // expanded table and must be looked up with the wider mask.
        if low < self.split {
            (hash & (2 * self.mask as u64 + 1)) as usize
        } else {
            low
        }
    }

    fn chain_len_capped(&self, mut node: u32) -> usize {
        let mut n = 0;
        while node != NIL && n < 2 {
            n += 1;
            node = self.link[node as usize];
        }
        n
    }

    /// Split bucket `split` in two, appending one bucket to the table
    /// (spec §4.7's incremental grow, as opposed to a full rehash).
    fn split_one_bucket(&mut self) {
        let new_index = self.bucket_count();
        self.bucket.push(NIL);
        let high_bit = (self.mask as u64) + 1;

        let old_head = self.bucket[self.split];
        let len_before = self.chain_len_capped(old_head);

        let mut stays = NIL;
        let mut moves = NIL;
        let mut node = old_head;
        while node != NIL {
            let next = self.link[node as usize];
            if self.hash[node as usize] & high_bit == 0 {
                self.link[node as usize] = stays;
                stays = node;
            } else {
                self.link[node as usize] = moves;
                moves = node;
            }
            node = next;
        }
        self.bucket[self.split] = stays;
        self.bucket[new_index] = moves;

        if old_head != NIL && stays == NIL {
            self.nonempty -= 1;
        }
        if moves != NIL {
            self.nonempty += 1;
        }
        if len_before == 1 {
            self.nunique_buckets -= 1;
        }
        if self.chain_len_capped(stays) == 1 {
            self.nunique_buckets += 1;
        }
        if self.chain_len_capped(moves) == 1 {
            self.nunique_buckets += 1;
        }

        self.split += 1;
        if self.split > self.mask {
            self.split = 0;
            self.mask = 2 * self.mask + 1;
        }
    }

    pub fn nonempty_buckets(&self) -> usize {
        self.nonempty
    }

    pub fn unique_estimate(&self) -> usize {
        self.nunique_buckets
    }

    /// Iterate candidate rows for `hash` (the caller filters by equality).
    pub fn probe(&self, hash: u64) -> HashProbe<'_> {
        let b = self.bucket_index(hash);
        HashProbe {
            index: self,
            cur: self.bucket[b],
        }
    }

    pub fn save(&mut self, dir: &Path, basename: &str) -> Result<()> {
        self.persisted = true;
        let file = HashFile {
            mask: self.mask,
            split: self.split,
            bucket: self.bucket.clone(),
            link: self.link.clone(),
            hash: self.hash.clone(),
            persisted: true,
        };
        std::fs::create_dir_all(dir)?;
        let f = File::create(dir.join(format!("{basename}.hashb")))?;
        bincode::serialize_into(BufWriter::new(f), &file.bucket)
            .map_err(|e| error::record(Error::Corruption(format!("hash bucket save: {e}"))))?;
        let f = File::create(dir.join(format!("{basename}.hashl")))?;
        bincode::serialize_into(BufWriter::new(f), &(file.mask, file.split, &file.link, &file.hash))
            .map_err(|e| error::record(Error::Corruption(format!("hash link save: {e}"))))?;
        Ok(())
    }

    pub fn load(dir: &Path, basename: &str) -> Result<Self> {
        let bf = File::open(dir.join(format!("{basename}.hashb")))
            .map_err(|e| error::record(Error::Corruption(format!("missing .hashb: {e}"))))?;
        let bucket: Vec<u32> = bincode::deserialize_from(BufReader::new(bf))
            .map_err(|e| error::record(Error::Corruption(format!("hash bucket load: {e}"))))?;
        let lf = File::open(dir.join(format!("{basename}.hashl")))
            .map_err(|e| error::record(Error::Corruption(format!("missing .hashl: {e}"))))?;
        let (mask, split, link, hash): (usize, usize, Vec<u32>, Vec<u64>) =
            bincode::deserialize_from(BufReader::new(lf))
                .map_err(|e| error::record(Error::Corruption(format!("hash link load: {e}"))))?;

        let mut nonempty = 0;
        let mut nunique_buckets = 0;
        for &head in &bucket {
            if head == NIL {
                continue;
            }
            nonempty += 1;
            if link[head as usize] == NIL {
                nunique_buckets += 1;
            }
        }
        Ok(HashIndex {
            mask,
            split,
            bucket,
            link,
            hash,
            nonempty,
            nunique_buckets,
            persisted: true,
        })
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }
}

pub struct HashProbe<'a> {
    index: &'a HashIndex,
    cur: u32,
}

impl<'a> Iterator for HashProbe<'a> {
    type Item = u32;
    fn next(&mut self) -> Option<u32> {
        if self.cur == NIL {
            return None;
        }
        let row = self.cur;
        self.cur = self.index.link[row as usize];
        Some(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_i32(v: i32) -> u64 {
        // A cheap, deterministic stand-in for the atom registry's hash fn.
        let mut h = v as u64;
        h ^= h >> 16;
        h = h.wrapping_mul(0x85ebca6b);
        h ^= h >> 13;
        h
    }

    #[test]
    fn insert_and_probe_finds_matching_rows() {
        let values = [10i32, 20, 10, 30, 10];
        let sample: Vec<u64> = values.iter().map(|v| hash_i32(*v)).collect();
        let mut idx = HashIndex::new(values.len(), &sample);
        for (row, v) in values.iter().enumerate() {
            idx.insert(row as u32, hash_i32(*v));
        }
        let hits: Vec<u32> = idx.probe(hash_i32(10)).collect();
        let mut found: Vec<i32> = hits.iter().map(|&r| values[r as usize]).collect();
        found.sort();
        assert_eq!(found, vec![10, 10, 10]);
    }

    #[test]
    fn delete_removes_row_from_chain() {
        let values = [1i32, 2, 1];
        let sample: Vec<u64> = values.iter().map(|v| hash_i32(*v)).collect();
        let mut idx = HashIndex::new(values.len(), &sample);
        for (row, v) in values.iter().enumerate() {
            idx.insert(row as u32, hash_i32(*v));
        }
        idx.delete(0, hash_i32(1)).unwrap();
        let hits: Vec<u32> = idx.probe(hash_i32(1)).collect();
        assert_eq!(hits, vec![2]);
    }

    #[test]
    fn grows_when_load_factor_trips() {
        let n = 200;
        let sample: Vec<u64> = (0..n as i32).map(hash_i32).collect();
        let mut idx = HashIndex::new(n, &sample);
        let initial_buckets = idx.bucket_count();
        for row in 0..n {
            idx.insert(row as u32, hash_i32(row as i32));
        }
        assert!(idx.bucket_count() >= initial_buckets);
        assert!(idx.nonempty_buckets() <= idx.bucket_count());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("gdk_hash_roundtrip_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let values = [5i32, 6, 5, 7];
        let sample: Vec<u64> = values.iter().map(|v| hash_i32(*v)).collect();
        let mut idx = HashIndex::new(values.len(), &sample);
        for (row, v) in values.iter().enumerate() {
            idx.insert(row as u32, hash_i32(*v));
        }
        idx.save(&dir, "t").unwrap();
        let loaded = HashIndex::load(&dir, "t").unwrap();
        assert!(loaded.is_persisted());
        let hits: Vec<u32> = loaded.probe(hash_i32(5)).collect();
        assert_eq!(hits.len(), 2);
        std::fs::remove_dir_all(dir).ok();
    }
}
