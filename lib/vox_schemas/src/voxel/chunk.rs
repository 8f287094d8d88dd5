//! Representation of a single 16³ chunk of voxel data.

use crate::coordinates::{InChunkPos, InChunkRange, CHUNK_DIM3Z};
use crate::voxel::block::BlockId;
use crate::voxel::chunk_storage::{ChunkStorage, PaletteStorage};

/// A 16³ grid of block ids, plus the bookkeeping the store needs to keep it consistent.
#[derive(Clone, Eq, PartialEq)]
pub struct Chunk {
    /// Block data, palette-compressed.
    pub blocks: PaletteStorage<BlockId>,
    /// Monotonic counter, incremented on every edit. Starts at 1 for a freshly generated chunk.
    pub version: u64,
    /// Count of non-air entries in `blocks`, kept in sync with every `set_block`/`fill`.
    pub non_empty_count: u32,
}

impl Chunk {
    /// Creates a new chunk filled uniformly with `fill_block`.
    pub fn new(fill_block: BlockId) -> Self {
        let non_empty_count = if fill_block.is_air() { 0 } else { CHUNK_DIM3Z as u32 };
        Self {
            blocks: PaletteStorage::new(fill_block),
            version: 1,
            non_empty_count,
        }
    }

    /// Builds a chunk from a dense, XZY-ordered block array (as produced by the generator).
    pub fn from_dense(blocks: &[BlockId; CHUNK_DIM3Z]) -> Self {
        let mut chunk = Self::new(BlockId::AIR);
        for idx in 0..CHUNK_DIM3Z {
            let pos = InChunkPos::try_from_index(idx).unwrap();
            let block = blocks[idx];
            if !block.is_air() {
                chunk.blocks.put(pos, block);
                chunk.non_empty_count += 1;
            }
        }
        chunk.blocks.optimize();
        chunk
    }

    /// Reads the block at the given in-chunk position.
    #[inline]
    pub fn get_block(&self, pos: InChunkPos) -> BlockId {
        self.blocks.get_copy(pos)
    }

    /// Writes a single block, maintaining `non_empty_count` and bumping `version`.
    pub fn set_block(&mut self, pos: InChunkPos, id: BlockId) -> BlockId {
        let old = self.blocks.put(pos, id);
        match (old.is_air(), id.is_air()) {
            (true, false) => self.non_empty_count += 1,
            (false, true) => self.non_empty_count -= 1,
            _ => {}
        }
        self.version += 1;
        old
    }

    /// Fills a cuboid region with a single block id, maintaining `non_empty_count` and version.
    pub fn fill(&mut self, range: InChunkRange, id: BlockId) {
        if range.is_everything() {
            self.blocks.fill(range, id);
            self.non_empty_count = if id.is_air() { 0 } else { CHUNK_DIM3Z as u32 };
        } else {
            for pos in range.iter_xzy() {
                self.set_block(pos, id);
            }
            return;
        }
        self.version += 1;
    }

    /// Copies the chunk's contents into a dense XZY-ordered array.
    pub fn copy_dense(&self, output: &mut [BlockId; CHUNK_DIM3Z]) {
        self.blocks.copy_dense(output);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_dense_counts_non_air() {
        let mut arr = [BlockId::AIR; CHUNK_DIM3Z];
        arr[0] = BlockId(1);
        arr[10] = BlockId(2);
        let chunk = Chunk::from_dense(&arr);
        assert_eq!(chunk.non_empty_count, 2);
        assert_eq!(chunk.get_block(InChunkPos::try_from_index(0).unwrap()), BlockId(1));
        assert_eq!(chunk.get_block(InChunkPos::try_from_index(1).unwrap()), BlockId::AIR);
    }

    #[test]
    fn set_block_maintains_count_and_version() {
        let mut chunk = Chunk::new(BlockId::AIR);
        let p = InChunkPos::try_new(1, 2, 3).unwrap();
        let v0 = chunk.version;
        chunk.set_block(p, BlockId(5));
        assert_eq!(chunk.non_empty_count, 1);
        assert_eq!(chunk.version, v0 + 1);
        chunk.set_block(p, BlockId::AIR);
        assert_eq!(chunk.non_empty_count, 0);
        assert_eq!(chunk.version, v0 + 2);
    }
}
