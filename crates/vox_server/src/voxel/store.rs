//! The chunk store: in-memory LRU of chunks, disk-backed persistence, and the player-edit
//! overlay that sits above both.

use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use vox_schemas::coordinates::{AbsChunkPos, InChunkPos, CHUNK_DIM, CHUNK_DIM2Z, CHUNK_DIM3Z};
use vox_schemas::voxel::block::BlockId;
use vox_schemas::voxel::chunk::Chunk;

use crate::prelude::*;
use crate::voxel::generator::VoxelGenerator;
use crate::voxel::overlay_log::OverlayLog;
use crate::voxel::persistence::{ColumnPersistence, ColumnTops};

type ChunkKey = (i32, i32, i32);

struct ResidentChunk {
    chunk: Chunk,
    dirty: bool,
}

/// Converts an absolute block position into its containing chunk's coordinates.
fn chunk_key_of(x: i32, y: i32, z: i32) -> ChunkKey {
    (x.div_euclid(CHUNK_DIM), y.div_euclid(CHUNK_DIM), z.div_euclid(CHUNK_DIM))
}

fn in_chunk_pos_of(x: i32, y: i32, z: i32) -> InChunkPos {
    InChunkPos::try_new(x.rem_euclid(CHUNK_DIM), y.rem_euclid(CHUNK_DIM), z.rem_euclid(CHUNK_DIM)).unwrap()
}

/// The chunk store: `get_block`/`set_block` plus whole-chunk access for the streaming
/// pipeline, backed by a generator, a column-top persistence layer, and an in-memory LRU of
/// resident chunks.
pub struct ChunkStore {
    generator: Arc<dyn VoxelGenerator>,
    persistence: Arc<dyn ColumnPersistence>,
    resident: Mutex<LruCache<ChunkKey, ResidentChunk>>,
    overlay: Mutex<HashMap<(i32, i32, i32), BlockId>>,
    resident_cap: usize,
    overlay_log: Option<OverlayLog>,
}

impl ChunkStore {
    /// Constructs a chunk store with no resident chunks, an empty overlay, and no durable
    /// overlay log (edits are lost on restart — suitable for tests and ephemeral worlds).
    pub fn new(generator: Arc<dyn VoxelGenerator>, persistence: Arc<dyn ColumnPersistence>, resident_cap: usize) -> Self {
        Self {
            generator,
            persistence,
            resident: Mutex::new(LruCache::new(NonZeroUsize::new(resident_cap.max(1)).unwrap())),
            overlay: Mutex::new(HashMap::new()),
            resident_cap,
            overlay_log: None,
        }
    }

    /// Constructs a chunk store whose edit overlay is backed by an append-only log at
    /// `overlay_log_path`: any previously logged edits are replayed into the overlay
    /// immediately, and every subsequent `set_block` is appended to the same log.
    pub fn with_overlay_log(
        generator: Arc<dyn VoxelGenerator>,
        persistence: Arc<dyn ColumnPersistence>,
        resident_cap: usize,
        overlay_log_path: &Path,
    ) -> Result<Self> {
        let overlay = OverlayLog::replay(overlay_log_path)?;
        let log = OverlayLog::open(overlay_log_path)?;
        Ok(Self {
            generator,
            persistence,
            resident: Mutex::new(LruCache::new(NonZeroUsize::new(resident_cap.max(1)).unwrap())),
            overlay: Mutex::new(overlay),
            resident_cap,
            overlay_log: Some(log),
        })
    }

    /// Reads the block at an absolute position: the overlay wins if it has an explicit entry
    /// (including an explicit air/deletion entry), otherwise the resident (loaded or generated)
    /// chunk is consulted.
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> BlockId {
        if let Some(&id) = self.overlay.lock().unwrap().get(&(x, y, z)) {
            return id;
        }
        let key = chunk_key_of(x, y, z);
        let in_pos = in_chunk_pos_of(x, y, z);
        let mut resident = self.resident.lock().unwrap();
        let rc = self.ensure_loaded(&mut resident, key);
        rc.chunk.get_block(in_pos)
    }

    /// Writes an overlay entry for an absolute position. `id == BlockId::AIR` records an
    /// explicit deletion rather than clearing the overlay entry. The containing chunk's
    /// generated content is left untouched — only its `version` is bumped, so clients relying
    /// on chunk version to decide whether to re-fetch see the edit.
    pub fn set_block(&self, x: i32, y: i32, z: i32, id: BlockId) {
        self.overlay.lock().unwrap().insert((x, y, z), id);
        if let Some(log) = &self.overlay_log {
            if let Err(e) = log.append(x, y, z, id) {
                tracing::warn!("failed to append overlay edit at ({x}, {y}, {z}) to the log: {e}");
            }
        }
        let key = chunk_key_of(x, y, z);
        let mut resident = self.resident.lock().unwrap();
        let rc = self.ensure_loaded(&mut resident, key);
        rc.chunk.version += 1;
        rc.dirty = true;
    }

    /// Fills every block in the axis-aligned cuboid `[min, max)` with `id`, one overlay entry
    /// per block. Intended for occasional mod/worldgen-adjacent fills, not per-tick use.
    pub fn fill_region(&self, min: (i32, i32, i32), max: (i32, i32, i32), id: BlockId) {
        for x in min.0..max.0 {
            for y in min.1..max.1 {
                for z in min.2..max.2 {
                    self.set_block(x, y, z, id);
                }
            }
        }
    }

    /// Returns the dense block array for a chunk, combining its resident (generated/persisted)
    /// content with any overlay entries that fall within its bounds.
    pub fn materialize_chunk(&self, pos: AbsChunkPos) -> Arc<[BlockId; CHUNK_DIM3Z]> {
        let ivec = pos.into_ivec3();
        let key = (ivec.x, ivec.y, ivec.z);
        let mut dense = {
            let mut resident = self.resident.lock().unwrap();
            let rc = self.ensure_loaded(&mut resident, key);
            let mut dense = [BlockId::AIR; CHUNK_DIM3Z];
            rc.chunk.copy_dense(&mut dense);
            dense
        };
        let overlay = self.overlay.lock().unwrap();
        if !overlay.is_empty() {
            let base_x = ivec.x * CHUNK_DIM;
            let base_y = ivec.y * CHUNK_DIM;
            let base_z = ivec.z * CHUNK_DIM;
            for in_y in 0..CHUNK_DIM {
                for in_z in 0..CHUNK_DIM {
                    for in_x in 0..CHUNK_DIM {
                        let abs = (base_x + in_x, base_y + in_y, base_z + in_z);
                        if let Some(&id) = overlay.get(&abs) {
                            let idx = ((in_y * CHUNK_DIM + in_z) * CHUNK_DIM + in_x) as usize;
                            dense[idx] = id;
                        }
                    }
                }
            }
        }
        Arc::new(dense)
    }

    /// Chunk positions within `radius` chunks (Chebyshev distance) of `center`, sorted so
    /// nearer chunks come first — an outward, center-biased streaming order.
    pub fn chunks_in_range(&self, center: AbsChunkPos, radius: i32) -> Vec<AbsChunkPos> {
        let c = center.into_ivec3();
        let mut positions = Vec::new();
        for dy in -radius..=radius {
            for dz in -radius..=radius {
                for dx in -radius..=radius {
                    positions.push(AbsChunkPos::new(c.x + dx, c.y + dy, c.z + dz));
                }
            }
        }
        positions.sort_by_key(|p| {
            let v = p.into_ivec3();
            let (ddx, ddy, ddz) = (v.x - c.x, v.y - c.y, v.z - c.z);
            ddx * ddx + ddy * ddy + ddz * ddz
        });
        positions
    }

    /// Evicts resident chunks beyond the configured cap, least-recently-used first, writing
    /// dirty ones back as column-top buffers before dropping them. `LruCache::push` already
    /// evicts on every insert that grows the cache past its capacity, so in steady state this
    /// is a no-op; it exists as the periodic pressure check (see the streaming config's LRU
    /// pressure check interval) in case the cap was never exercised via a fresh insert.
    pub fn enforce_resident_cap(&self) {
        let mut resident = self.resident.lock().unwrap();
        while resident.len() > self.resident_cap {
            let Some((key, rc)) = resident.pop_lru() else { break };
            if rc.dirty {
                self.write_back_column_top(key, &rc.chunk);
            }
        }
    }

    /// Number of currently resident chunks. Exposed for tests and diagnostics.
    pub fn resident_len(&self) -> usize {
        self.resident.lock().unwrap().len()
    }

    /// The current version of a chunk (loading/generating it if not already resident). Used by
    /// the streaming pipeline to stamp outgoing frames and to detect whether a cached frame has
    /// gone stale since it was encoded.
    pub fn chunk_version(&self, pos: AbsChunkPos) -> i32 {
        let ivec = pos.into_ivec3();
        let key = (ivec.x, ivec.y, ivec.z);
        let mut resident = self.resident.lock().unwrap();
        let rc = self.ensure_loaded(&mut resident, key);
        rc.chunk.version as i32
    }

    /// Returns the resident entry for `key`, loading or generating it first if it's not
    /// already cached. A fresh insert that pushes the cache past `resident_cap` evicts the
    /// least-recently-used entry, writing it back first if dirty.
    fn ensure_loaded<'a>(&self, resident: &'a mut LruCache<ChunkKey, ResidentChunk>, key: ChunkKey) -> &'a mut ResidentChunk {
        if !resident.contains(&key) {
            let chunk = self.load_or_generate(key);
            if let Some((evicted_key, evicted)) = resident.push(key, ResidentChunk { chunk, dirty: false }) {
                if evicted.dirty {
                    self.write_back_column_top(evicted_key, &evicted.chunk);
                }
            }
        }
        resident.get_mut(&key).expect("just inserted or already present")
    }

    fn load_or_generate(&self, key: ChunkKey) -> Chunk {
        let (cx, cy, cz) = key;
        match self.persistence.load_column(cx, cz) {
            Ok(Some(tops)) => Chunk::from_dense(&self.blocks_from_tops(cy, &tops)),
            Ok(None) => {
                let dense = self.generator.generate_chunk(AbsChunkPos::new(cx, cy, cz));
                Chunk::from_dense(&dense)
            }
            Err(e) => {
                tracing::warn!("failed to load column ({cx}, {cz}), regenerating: {e}");
                let dense = self.generator.generate_chunk(AbsChunkPos::new(cx, cy, cz));
                Chunk::from_dense(&dense)
            }
        }
    }

    fn blocks_from_tops(&self, cy: i32, tops: &ColumnTops) -> [BlockId; CHUNK_DIM3Z] {
        let mut blocks = [BlockId::AIR; CHUNK_DIM3Z];
        let base_y = cy * CHUNK_DIM;
        for in_z in 0..CHUNK_DIM {
            for in_x in 0..CHUNK_DIM {
                let top = tops[(in_x + in_z * CHUNK_DIM) as usize] as i32;
                for in_y in 0..CHUNK_DIM {
                    let block = self.generator.block_for_height(base_y + in_y, top);
                    if !block.is_air() {
                        let idx = ((in_y * CHUNK_DIM + in_z) * CHUNK_DIM + in_x) as usize;
                        blocks[idx] = block;
                    }
                }
            }
        }
        blocks
    }

    /// Recomputes the column-top heights from this chunk's own local content and persists
    /// them. Columns with no solid block in this chunk are left at their previously persisted
    /// height (the chunk doesn't own the world's topmost layer for that column).
    fn write_back_column_top(&self, key: ChunkKey, chunk: &Chunk) {
        let (cx, cy, cz) = key;
        let mut tops = match self.persistence.load_column(cx, cz) {
            Ok(Some(existing)) => existing,
            _ => [0u8; CHUNK_DIM2Z],
        };
        let base_y = cy * CHUNK_DIM;
        for in_z in 0..CHUNK_DIM {
            for in_x in 0..CHUNK_DIM {
                for in_y in (0..CHUNK_DIM).rev() {
                    let pos = InChunkPos::try_new(in_x, in_y, in_z).unwrap();
                    if !chunk.get_block(pos).is_air() {
                        tops[(in_x + in_z * CHUNK_DIM) as usize] = (base_y + in_y).clamp(0, 255) as u8;
                        break;
                    }
                }
            }
        }
        if let Err(e) = self.persistence.save_column(cx, cz, &tops) {
            tracing::warn!("failed to persist column ({cx}, {cz}) on eviction: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use vox_schemas::voxel::block::BlockId;

    use super::*;
    use crate::voxel::block_registry::BlockRegistry;
    use crate::voxel::generator::flat::FlatGenerator;
    use crate::voxel::persistence::memory::InMemoryColumnPersistence;

    fn store() -> ChunkStore {
        let registry = BlockRegistry::builtin();
        let generator: Arc<dyn VoxelGenerator> = Arc::new(FlatGenerator::new(63, &registry).unwrap());
        let persistence: Arc<dyn ColumnPersistence> = Arc::new(InMemoryColumnPersistence::new());
        ChunkStore::new(generator, persistence, 256)
    }

    #[test]
    fn get_block_reads_generated_terrain() {
        let store = store();
        let registry = BlockRegistry::builtin();
        assert_eq!(store.get_block(0, 63, 0), registry.id_of("grass").unwrap());
        assert_eq!(store.get_block(0, 64, 0), BlockId::AIR);
    }

    #[test]
    fn set_block_overlay_wins_over_generation() {
        let store = store();
        assert_ne!(store.get_block(5, 63, 5), BlockId::AIR);
        store.set_block(5, 63, 5, BlockId::AIR);
        assert_eq!(store.get_block(5, 63, 5), BlockId::AIR);
    }

    #[test]
    fn set_block_bumps_chunk_version_without_mutating_generated_content() {
        let store = store();
        store.get_block(0, 0, 0); // force residency
        let before = {
            let resident = store.resident.lock().unwrap();
            resident.peek(&(0, 0, 0)).unwrap().chunk.version
        };
        store.set_block(1, 1, 1, BlockId(9));
        let after = {
            let resident = store.resident.lock().unwrap();
            resident.peek(&(0, 0, 0)).unwrap().chunk.version
        };
        assert_eq!(after, before + 1);
    }

    #[test]
    fn materialize_chunk_includes_overlay() {
        let store = store();
        let pos = AbsChunkPos::new(0, 3, 0);
        store.set_block(1, 63, 1, BlockId::AIR);
        let dense = store.materialize_chunk(pos);
        let local = InChunkPos::try_new(1, 15, 1).unwrap();
        assert_eq!(dense[local.as_index()], BlockId::AIR);
    }

    #[test]
    fn chunks_in_range_is_center_biased() {
        let store = store();
        let center = AbsChunkPos::new(0, 0, 0);
        let positions = store.chunks_in_range(center, 2);
        assert_eq!(positions[0], center);
        assert_eq!(positions.len(), 5 * 5 * 5);
    }

    #[test]
    fn enforce_resident_cap_evicts_oldest() {
        let store = store();
        for i in 0..10 {
            store.get_block(i * CHUNK_DIM, 0, 0);
        }
        assert_eq!(store.resident_len(), 10);
        let small_cap_store = ChunkStore::new(
            Arc::new(FlatGenerator::new(63, &BlockRegistry::builtin()).unwrap()),
            Arc::new(InMemoryColumnPersistence::new()),
            5,
        );
        for i in 0..10 {
            small_cap_store.get_block(i * CHUNK_DIM, 0, 0);
        }
        small_cap_store.enforce_resident_cap();
        assert!(small_cap_store.resident_len() < 10);
    }

    #[test]
    fn overlay_log_survives_a_restart() {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("vox_store_overlay_log_test_{}_{n}", std::process::id()));

        let registry = BlockRegistry::builtin();
        {
            let generator: Arc<dyn VoxelGenerator> = Arc::new(FlatGenerator::new(63, &registry).unwrap());
            let persistence: Arc<dyn ColumnPersistence> = Arc::new(InMemoryColumnPersistence::new());
            let store = ChunkStore::with_overlay_log(generator, persistence, 256, &path).unwrap();
            store.set_block(0, 63, 0, BlockId::AIR);
        }

        let generator: Arc<dyn VoxelGenerator> = Arc::new(FlatGenerator::new(63, &registry).unwrap());
        let persistence: Arc<dyn ColumnPersistence> = Arc::new(InMemoryColumnPersistence::new());
        let reopened = ChunkStore::with_overlay_log(generator, persistence, 256, &path).unwrap();
        assert_eq!(reopened.get_block(0, 63, 0), BlockId::AIR);

        std::fs::remove_file(&path).unwrap();
    }
}
