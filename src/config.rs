//! Process-wide configuration: storage farms and tuning knobs (spec §6.1, §6.3).

use std::path::{Path, PathBuf};

/// Bitmask identifying which roles a [`Farm`] serves. Role 1 (bit 0) is the
/// mandatory transient farm; additional bits denote persistent data, hash
/// heaps, order-index heaps, and variable heaps.
pub mod role {
    pub const TRANSIENT: u32 = 1 << 0;
    pub const PERSISTENT: u32 = 1 << 1;
    pub const HASH: u32 = 1 << 2;
    pub const ORDERIDX: u32 = 1 << 3;
    pub const VARHEAP: u32 = 1 << 4;
}

/// A storage root directory tagged with a role bitmask (spec §6.1).
#[derive(Debug, Clone)]
pub struct Farm {
    pub id: u32,
    pub roles: u32,
    pub directory: PathBuf,
}

impl Farm {
    pub fn new(id: u32, roles: u32, directory: impl Into<PathBuf>) -> Self {
        Self {
            id,
            roles,
            directory: directory.into(),
        }
    }

    pub fn serves(&self, role_bit: u32) -> bool {
        self.roles & role_bit != 0
    }

    /// `<farm>/bat/<subdir>/<id-in-octal>.<ext>`, the layout from spec §6.1.
    /// `<subdir>` groups 64 columns via two-digit octal nesting.
    pub fn column_path(&self, column_id: i64, ext: &str) -> PathBuf {
        let octal = format!("{:o}", column_id.unsigned_abs());
        let subdir = if octal.len() > 2 {
            &octal[..octal.len() - 2]
        } else {
            "0"
        };
        self.directory
            .join("bat")
            .join(subdir)
            .join(format!("{octal}.{ext}"))
    }
}

/// Process-wide tuning knobs (spec §6.3).
#[derive(Debug, Clone)]
pub struct GdkConfig {
    pub farms: Vec<Farm>,
    /// Byte threshold above which a persistent heap switches from mem to mmap.
    pub mmap_minsize_persistent: usize,
    /// Byte threshold above which a transient heap switches from mem to mmap.
    pub mmap_minsize_transient: usize,
    /// VM budget; above this, new heap allocations prefer mmap.
    pub mem_maxsize: usize,
    /// Bitmask enabling assertions, property rechecks, no-sync.
    pub debug: u32,
}

pub mod debug_flag {
    pub const ASSERTIONS: u32 = 1 << 0;
    pub const PROPERTY_RECHECK: u32 = 1 << 1;
    pub const NO_SYNC: u32 = 1 << 2;
}

impl GdkConfig {
    /// A single transient farm rooted at `directory`, with the defaults the
    /// original uses for a desktop-class machine.
    pub fn single_farm(directory: impl AsRef<Path>) -> Self {
        Self {
            farms: vec![Farm::new(
                0,
                role::TRANSIENT | role::PERSISTENT | role::HASH | role::ORDERIDX | role::VARHEAP,
                directory.as_ref(),
            )],
            mmap_minsize_persistent: 64 * 1024,
            mmap_minsize_transient: 1024 * 1024,
            mem_maxsize: 512 * 1024 * 1024,
            debug: debug_flag::ASSERTIONS,
        }
    }

    pub fn farm_for_role(&self, role_bit: u32) -> Option<&Farm> {
        self.farms.iter().find(|f| f.serves(role_bit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_path_groups_by_octal_prefix() {
        let farm = Farm::new(0, role::PERSISTENT, "/tmp/farm0");
        let p = farm.column_path(64, "tail");
        // 64 decimal = 100 octal; prefix is "1", file "100.tail"
        assert_eq!(p, Path::new("/tmp/farm0/bat/1/100.tail"));
    }

    #[test]
    fn single_farm_serves_all_roles() {
        let cfg = GdkConfig::single_farm("/tmp/x");
        assert!(cfg.farm_for_role(role::PERSISTENT).is_some());
        assert!(cfg.farm_for_role(role::HASH).is_some());
    }
}
