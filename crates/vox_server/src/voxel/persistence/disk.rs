//! Disk-backed column persistence: one file per column under the world root.

use std::path::{Path, PathBuf};

use vox_schemas::coordinates::CHUNK_DIM2Z;

use super::{ColumnPersistence, ColumnTops};
use crate::atomic_file::write_atomic;
use crate::prelude::*;

/// Persists column-top heights as flat 256-byte files named `<cx>_<cz>.chunk` under a
/// `columns/` subdirectory of the world root, written with the atomic tmp/bak/rename protocol.
pub struct DiskColumnPersistence {
    columns_dir: PathBuf,
}

impl DiskColumnPersistence {
    /// Constructs a disk-backed persistence layer rooted at `world_root/columns/`.
    pub fn new(world_root: &Path) -> Self {
        Self { columns_dir: world_root.join("columns") }
    }

    fn path_for(&self, cx: i32, cz: i32) -> PathBuf {
        self.columns_dir.join(format!("{cx}_{cz}.chunk"))
    }
}

impl ColumnPersistence for DiskColumnPersistence {
    fn load_column(&self, cx: i32, cz: i32) -> Result<Option<ColumnTops>> {
        let path = self.path_for(cx, cz);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading column file {}", path.display())),
        };
        ensure!(
            bytes.len() == CHUNK_DIM2Z,
            "column file {} has {} bytes, expected {}",
            path.display(),
            bytes.len(),
            CHUNK_DIM2Z
        );
        let mut tops = [0u8; CHUNK_DIM2Z];
        tops.copy_from_slice(&bytes);
        Ok(Some(tops))
    }

    fn save_column(&self, cx: i32, cz: i32, tops: &ColumnTops) -> Result<()> {
        write_atomic(&self.path_for(cx, cz), tops)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_a_column() {
        let dir = std::env::temp_dir().join(format!("vox_server_disk_persist_test_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let persist = DiskColumnPersistence::new(&dir);

        assert!(persist.load_column(3, -2).unwrap().is_none());

        let mut tops = [0u8; CHUNK_DIM2Z];
        tops[0] = 63;
        tops[255] = 40;
        persist.save_column(3, -2, &tops).unwrap();

        let loaded = persist.load_column(3, -2).unwrap().unwrap();
        assert_eq!(loaded, tops);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn overwrite_keeps_a_backup() {
        let dir = std::env::temp_dir().join(format!("vox_server_disk_persist_bak_test_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let persist = DiskColumnPersistence::new(&dir);

        let first = [1u8; CHUNK_DIM2Z];
        persist.save_column(0, 0, &first).unwrap();
        let second = [2u8; CHUNK_DIM2Z];
        persist.save_column(0, 0, &second).unwrap();

        let bak_path = persist.columns_dir.join("0_0.chunk.bak");
        assert_eq!(std::fs::read(&bak_path).unwrap(), first);
        assert_eq!(persist.load_column(0, 0).unwrap().unwrap(), second);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
