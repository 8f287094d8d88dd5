//! Append-only log of player block edits, replayed at world load to reconstruct the edit
//! overlay independently of chunk LRU eviction (spec.md's residency cache may evict a chunk's
//! generated content at any time; the overlay that sits above it must outlive that).
//!
//! Each record is fixed-width — `x: i32`, `y: i32`, `z: i32`, `id: u16`, little-endian, 14 bytes,
//! no length prefix or checksum. A trailing partial record (the tail of a crash mid-append) is
//! simply dropped on replay.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use vox_schemas::voxel::block::BlockId;

use crate::prelude::*;

const RECORD_LEN: usize = 14;

/// An append-only overlay edit log backed by a single file, opened once and kept for the
/// lifetime of the store.
pub struct OverlayLog {
    file: Mutex<File>,
}

impl OverlayLog {
    /// Opens (creating if absent) the overlay log at `path` for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }

    /// Appends one edit record and flushes it to disk before returning.
    pub fn append(&self, x: i32, y: i32, z: i32, id: BlockId) -> Result<()> {
        let mut buf = Vec::with_capacity(RECORD_LEN);
        buf.write_i32::<LittleEndian>(x)?;
        buf.write_i32::<LittleEndian>(y)?;
        buf.write_i32::<LittleEndian>(z)?;
        buf.write_u16::<LittleEndian>(id.0)?;
        let mut file = self.file.lock().unwrap();
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    /// Replays every complete record in the log at `path` into an overlay map, in file order
    /// (later records for the same position win). Returns an empty map if the file doesn't
    /// exist yet.
    pub fn replay(path: &Path) -> Result<HashMap<(i32, i32, i32), BlockId>> {
        let mut overlay = HashMap::new();
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(overlay),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let whole_records = bytes.len() / RECORD_LEN;
        let mut cursor = &bytes[..whole_records * RECORD_LEN];
        for _ in 0..whole_records {
            let x = cursor.read_i32::<LittleEndian>()?;
            let y = cursor.read_i32::<LittleEndian>()?;
            let z = cursor.read_i32::<LittleEndian>()?;
            let id = cursor.read_u16::<LittleEndian>()?;
            overlay.insert((x, y, z), BlockId(id));
        }
        Ok(overlay)
    }
}
