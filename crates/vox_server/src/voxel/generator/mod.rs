//! World generation.

pub mod flat;

use std::sync::Arc;

use vox_schemas::coordinates::{AbsChunkPos, CHUNK_DIM3Z};
use vox_schemas::voxel::block::BlockId;

/// A deterministic, stateless (from the caller's point of view) chunk generator.
///
/// `column_top`/`block_for_height` expose the per-column rule directly so the chunk store can
/// reconstruct a single column (e.g. when combining a persisted column-top height with the
/// generator's block-for-height rule) without generating an entire chunk.
pub trait VoxelGenerator: Send + Sync {
    /// The global Y coordinate of the topmost solid block in the column at `(x, z)`.
    fn column_top(&self, x: i32, z: i32) -> i32;

    /// The block that belongs at global Y `y`, given that column's top-solid height.
    fn block_for_height(&self, y: i32, column_top: i32) -> BlockId;

    /// Generates the full dense block array for the chunk at `position`.
    fn generate_chunk(&self, position: AbsChunkPos) -> Arc<[BlockId; CHUNK_DIM3Z]>;
}
