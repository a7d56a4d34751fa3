//! Property bits and their disproofs (spec §3.3, §4.3): sortedness,
//! key-ness, nil presence, and min/max position tracking. These are
//! may-know, not must-know — `!sorted` only records that evidence of a
//! violation exists at `nosorted`.

/// Sentinel meaning "no extremum slot recorded".
pub const NONE: usize = usize::MAX;

#[derive(Debug, Clone)]
pub struct Properties {
    pub sorted: bool,
    pub revsorted: bool,
    pub key: bool,
    pub nil: bool,
    pub nonil: bool,

    /// First position violating `sorted`; 0 while `sorted` holds.
    pub nosorted: usize,
    /// First position violating `revsorted`; 0 while `revsorted` holds.
    pub norevsorted: usize,
    /// Two positions holding equal values, disproving `key`; `(0, 0)`
    /// while `key` holds.
    pub nokey: [usize; 2],

    pub minpos: usize,
    pub maxpos: usize,

    /// Bloom-style unique-value-count estimate.
    pub unique_est: f64,
}

impl Properties {
    /// Trivial properties for a freshly created, empty column.
    pub fn empty() -> Self {
        Properties {
            sorted: true,
            revsorted: true,
            key: true,
            nil: false,
            nonil: true,
            nosorted: 0,
            norevsorted: 0,
            nokey: [0, 0],
            minpos: NONE,
            maxpos: NONE,
            unique_est: 0.0,
        }
    }

    pub fn check_invariants(&self, count: usize) -> Result<(), String> {
        if self.sorted && self.nosorted != 0 {
            return Err("sorted set but nosorted != 0".into());
        }
        if self.key && (self.nokey[0] != 0 || self.nokey[1] != 0) {
            return Err("key set but nokey != (0,0)".into());
        }
        if self.nil && self.nonil {
            return Err("nil and nonil both set".into());
        }
        if count == 0 && !self.nonil {
            return Err("empty column must have nonil set".into());
        }
        if self.minpos != NONE && self.minpos >= count {
            return Err("minpos out of range".into());
        }
        if self.maxpos != NONE && self.maxpos >= count {
            return Err("maxpos out of range".into());
        }
        Ok(())
    }
}

impl Default for Properties {
    fn default() -> Self {
        Self::empty()
    }
}
