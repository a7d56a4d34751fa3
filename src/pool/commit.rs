//! Atomic commit and crash recovery (spec §4.10): stage every file about
//! to be overwritten into a backup directory, write the new heaps and
//! directory, then atomically retire the backup. A crash at any point
//! leaves either the old state or the new state fully intact, never a mix.

use std::path::Path;

use crate::error::Result;
use crate::heap::Heap;

use super::directory::Directory;

pub const BAKDIR: &str = "BACKUP";
pub const SUBDIR: &str = "SUBCOMMIT";
pub const DELDIR: &str = "DELETE_ME";
const KILL_MARKER: &str = ".kill";

/// Full commit (spec §4.10, "prelude / backup / write / directory /
/// rename / epilogue"): backs up every file about to change, writes the
/// new contents, then retires the backup by renaming it to `DELDIR`
/// before removing it.
pub fn commit(farm_dir: &Path, directory: &Directory, dirty: &[(&str, &Heap)]) -> Result<()> {
    let bak = farm_dir.join(BAKDIR);
    std::fs::create_dir_all(&bak)?;
    backup_existing(farm_dir, &bak, dirty)?;

    // Point of no return: if the process dies after this marker is
    // written but before it is removed, recovery knows the backup is
    // still authoritative and must be rolled forward from.
    std::fs::write(bak.join(KILL_MARKER), b"")?;

    for (_, heap) in dirty {
        heap.save(farm_dir)?;
    }
    directory.write(&farm_dir.join("BBP.dir"))?;

    std::fs::remove_file(bak.join(KILL_MARKER))?;
    retire_backup(farm_dir)?;
    Ok(())
}

fn backup_existing(farm_dir: &Path, bak: &Path, dirty: &[(&str, &Heap)]) -> Result<()> {
    for (filename, _) in dirty {
        let src = farm_dir.join(filename);
        if src.exists() {
            std::fs::copy(&src, bak.join(filename))?;
        }
    }
    let src = farm_dir.join("BBP.dir");
    if src.exists() {
        std::fs::copy(&src, bak.join("BBP.dir"))?;
    }
    Ok(())
}

fn retire_backup(farm_dir: &Path) -> Result<()> {
    let bak = farm_dir.join(BAKDIR);
    if !bak.exists() {
        return Ok(());
    }
    let del = farm_dir.join(DELDIR);
    if del.exists() {
        std::fs::remove_dir_all(&del)?;
    }
    std::fs::rename(&bak, &del)?;
    std::fs::remove_dir_all(&del)?;
    Ok(())
}

/// Sub-commit (spec §4.10): stage into a `SUBDIR` nested under `BAKDIR`
/// instead of the farm root, so a concurrent top-level commit can still
/// run. The caller promotes it once no top-level commit is in flight.
pub fn sub_commit(farm_dir: &Path, directory: &Directory, dirty: &[(&str, &Heap)]) -> Result<()> {
    let sub = farm_dir.join(BAKDIR).join(SUBDIR);
    std::fs::create_dir_all(&sub)?;
    for (_, heap) in dirty {
        heap.save(&sub)?;
    }
    directory.write(&sub.join("BBP.dir"))?;
    Ok(())
}

/// Merge a completed sub-commit into the farm root and discard `SUBDIR`.
pub fn promote_sub_commit(farm_dir: &Path) -> Result<()> {
    let sub = farm_dir.join(BAKDIR).join(SUBDIR);
    if !sub.exists() {
        return Ok(());
    }
    merge_up(&sub, farm_dir)?;
    std::fs::remove_dir_all(&sub)?;
    Ok(())
}

/// Startup recovery (spec §4.10): reconcile a `SUBDIR`/`BAKDIR`/`DELDIR`
/// left behind by a crash mid-commit.
pub fn recover(farm_dir: &Path) -> Result<()> {
    let bak = farm_dir.join(BAKDIR);
    let sub = bak.join(SUBDIR);
    let del = farm_dir.join(DELDIR);

    if sub.exists() {
        // A sub-commit's files are newer than anything in the farm root.
        merge_up(&sub, farm_dir)?;
        std::fs::remove_dir_all(&sub)?;
    }

    if bak.exists() {
        if bak.join(KILL_MARKER).exists() {
            // Crashed past the point of no return's start but before the
            // farm root was fully rewritten: roll back from the backup.
            merge_up(&bak, farm_dir)?;
        }
        // Otherwise the crash was after the farm root was fully
        // rewritten; the backup is garbage left over from the rename.
        std::fs::remove_dir_all(&bak)?;
    }

    if del.exists() {
        std::fs::remove_dir_all(&del)?;
    }
    Ok(())
}

fn merge_up(src: &Path, dst: &Path) -> Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == KILL_MARKER || name == SUBDIR || entry.file_type()?.is_dir() {
            continue;
        }
        std::fs::copy(entry.path(), dst.join(name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn tmp_dir(tag: &str) -> std::path::PathBuf {
        let d = std::env::temp_dir().join(format!("gdk_commit_{tag}_{}", std::process::id()));
        std::fs::remove_dir_all(&d).ok();
        std::fs::create_dir_all(&d).unwrap();
        d
    }

    #[test]
    fn commit_leaves_no_backup_behind_on_success() {
        let dir = tmp_dir("ok");
        let heap = Heap::alloc(&dir, "1.tail", 16, 1 << 20, 0).unwrap();
        heap.append(b"abcd", 1 << 20).unwrap();
        let directory = Directory::new();
        commit(&dir, &directory, &[("1.tail", &heap)]).unwrap();
        assert!(dir.join("1.tail").exists());
        assert!(!dir.join(BAKDIR).exists());
        assert!(!dir.join(DELDIR).exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn recover_rolls_back_when_kill_marker_present() {
        let dir = tmp_dir("rollback");
        std::fs::write(dir.join("1.tail"), b"half-written-garbage").unwrap();
        let bak = dir.join(BAKDIR);
        std::fs::create_dir_all(&bak).unwrap();
        std::fs::write(bak.join("1.tail"), b"old").unwrap();
        std::fs::write(bak.join(".kill"), b"").unwrap();

        recover(&dir).unwrap();

        assert_eq!(std::fs::read(dir.join("1.tail")).unwrap(), b"old");
        assert!(!bak.exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn recover_merges_up_a_stray_subcommit() {
        let dir = tmp_dir("subcommit");
        let sub = dir.join(BAKDIR).join(SUBDIR);
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("2.tail"), b"new-from-subcommit").unwrap();

        recover(&dir).unwrap();

        assert_eq!(std::fs::read(dir.join("2.tail")).unwrap(), b"new-from-subcommit");
        assert!(!dir.join(BAKDIR).exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn recover_is_a_no_op_on_a_clean_farm() {
        let dir = tmp_dir("clean");
        recover(&dir).unwrap();
        std::fs::remove_dir_all(dir).ok();
    }
}
