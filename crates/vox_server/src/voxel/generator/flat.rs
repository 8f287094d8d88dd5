//! The default flat terrain generator.

use std::num::NonZeroUsize;

use lru::LruCache;
use vox_schemas::coordinates::{AbsChunkPos, CHUNK_DIM, CHUNK_DIM3Z};
use vox_schemas::voxel::block::BlockId;

use super::VoxelGenerator;
use crate::prelude::*;
use crate::voxel::block_registry::BlockRegistry;

const GRASS_THICKNESS: i32 = 1;
const DIRT_THICKNESS: i32 = 3;
const STONE_THICKNESS: i32 = 40;
const AIR_GAP_THICKNESS: i32 = 2;

/// A flat, horizontally-uniform terrain generator: one grass layer atop the column, three
/// layers of dirt, forty layers of stone, then a two-block air gap reserved for future layers.
pub struct FlatGenerator {
    surface_y: i32,
    grass: BlockId,
    dirt: BlockId,
    stone: BlockId,
    cache: Mutex<LruCache<i32, Arc<[BlockId; CHUNK_DIM3Z]>>>,
}

impl FlatGenerator {
    /// Constructs the generator. `surface_y` is the topmost solid block's global Y coordinate.
    pub fn new(surface_y: i32, registry: &BlockRegistry) -> Result<Self> {
        let grass = registry
            .id_of("grass")
            .ok_or_else(|| anyhow!("block registry has no `grass` block"))?;
        let dirt = registry
            .id_of("dirt")
            .ok_or_else(|| anyhow!("block registry has no `dirt` block"))?;
        let stone = registry
            .id_of("stone")
            .ok_or_else(|| anyhow!("block registry has no `stone` block"))?;
        Ok(Self {
            surface_y,
            grass,
            dirt,
            stone,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(64).unwrap())),
        })
    }
}

impl VoxelGenerator for FlatGenerator {
    fn column_top(&self, _x: i32, _z: i32) -> i32 {
        self.surface_y
    }

    fn block_for_height(&self, y: i32, column_top: i32) -> BlockId {
        if y > column_top {
            return BlockId::AIR;
        }
        let depth = column_top - y;
        if depth < GRASS_THICKNESS {
            self.grass
        } else if depth < GRASS_THICKNESS + DIRT_THICKNESS {
            self.dirt
        } else if depth < GRASS_THICKNESS + DIRT_THICKNESS + STONE_THICKNESS {
            self.stone
        } else {
            // the reserved air gap, and everything further down: empty for now.
            BlockId::AIR
        }
    }

    fn generate_chunk(&self, position: AbsChunkPos) -> Arc<[BlockId; CHUNK_DIM3Z]> {
        let cy = position.into_ivec3().y;
        let cache_key = cy * CHUNK_DIM;
        if let Some(hit) = self.cache.lock().unwrap().get(&cache_key) {
            return Arc::clone(hit);
        }
        let base_y = cy * CHUNK_DIM;
        let mut blocks = [BlockId::AIR; CHUNK_DIM3Z];
        for in_y in 0..CHUNK_DIM {
            let block = self.block_for_height(base_y + in_y, self.surface_y);
            if block.is_air() {
                continue;
            }
            for in_z in 0..CHUNK_DIM {
                for in_x in 0..CHUNK_DIM {
                    let idx = ((in_y * CHUNK_DIM + in_z) * CHUNK_DIM + in_x) as usize;
                    blocks[idx] = block;
                }
            }
        }
        let blocks = Arc::new(blocks);
        self.cache.lock().unwrap().put(cache_key, Arc::clone(&blocks));
        blocks
    }
}

#[cfg(test)]
mod test {
    use vox_schemas::coordinates::InChunkPos;

    use super::*;

    fn registry() -> BlockRegistry {
        BlockRegistry::builtin()
    }

    #[test]
    fn grass_on_top_stone_below() {
        let reg = registry();
        let gen = FlatGenerator::new(63, &reg).unwrap();
        assert_eq!(gen.block_for_height(63, 63), reg.id_of("grass").unwrap());
        assert_eq!(gen.block_for_height(62, 63), reg.id_of("dirt").unwrap());
        assert_eq!(gen.block_for_height(60, 63), reg.id_of("stone").unwrap());
        assert_eq!(gen.block_for_height(64, 63), BlockId::AIR);
    }

    #[test]
    fn air_gap_beneath_stone() {
        let reg = registry();
        let gen = FlatGenerator::new(63, &reg).unwrap();
        let gap_y = 63 - (GRASS_THICKNESS + DIRT_THICKNESS + STONE_THICKNESS);
        assert_eq!(gen.block_for_height(gap_y, 63), BlockId::AIR);
    }

    #[test]
    fn generate_chunk_is_memoized_per_cy() {
        let reg = registry();
        let gen = FlatGenerator::new(63, &reg).unwrap();
        let a = gen.generate_chunk(AbsChunkPos::new(0, 3, 0));
        let b = gen.generate_chunk(AbsChunkPos::new(5, 3, -2));
        assert!(Arc::ptr_eq(&a, &b));
        let pos = InChunkPos::try_new(0, 0, 0).unwrap();
        assert_eq!(a[pos.as_index()], reg.id_of("grass").unwrap());
    }
}
