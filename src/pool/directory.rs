//! `BBP.dir` (spec §6.2): a JSON catalog of every column's metadata,
//! read at startup and rewritten atomically on commit.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::column::Persistence;
use crate::error::{self, Error, Result};

pub const FORMAT_VERSION: u32 = 1;

/// One column's persisted metadata (spec §6.2's per-column directory entry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnRecord {
    pub id: i64,
    pub atom_name: String,
    pub width: usize,
    pub hseqbase: u64,
    pub tseqbase: Option<u64>,
    pub count: usize,
    pub persistence: Persistence,
    pub heap_file: String,
    pub vheap_file: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct DirectoryFile {
    version: u32,
    records: Vec<ColumnRecord>,
}

pub struct Directory {
    pub version: u32,
    pub records: Vec<ColumnRecord>,
}

impl Directory {
    pub fn new() -> Self {
        Directory {
            version: FORMAT_VERSION,
            records: Vec::new(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let f = File::create(path)?;
        let on_disk = DirectoryFile {
            version: self.version,
            records: self.records.clone(),
        };
        serde_json::to_writer_pretty(BufWriter::new(&f), &on_disk)
            .map_err(|e| error::record(Error::Corruption(format!("cannot write BBP.dir: {e}"))))?;
        f.sync_all()?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let f = File::open(path)
            .map_err(|e| error::record(Error::Corruption(format!("cannot open BBP.dir: {e}"))))?;
        let on_disk: DirectoryFile = serde_json::from_reader(BufReader::new(f))
            .map_err(|e| error::record(Error::Corruption(format!("malformed BBP.dir: {e}"))))?;
        if on_disk.version > FORMAT_VERSION {
            return Err(error::record(Error::Corruption(format!(
                "BBP.dir format version {} is newer than this build supports ({FORMAT_VERSION})",
                on_disk.version
            ))));
        }
        Ok(Directory {
            version: on_disk.version,
            records: on_disk.records,
        })
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}
