//! Worker pool running the world generator off the network/session threads.

use std::sync::Arc;

use vox_schemas::coordinates::{AbsChunkPos, CHUNK_DIM3Z};
use vox_schemas::voxel::block::BlockId;

use super::pool::{JobId, PoolError, WorkerPool};
use crate::voxel::generator::VoxelGenerator;

/// A chunk generation pool: submits `(chunk position)`, yields the dense block array once
/// generated (or fetched from the generator's own memoization cache).
pub struct GeneratorPool {
    pool: WorkerPool<AbsChunkPos, (AbsChunkPos, Arc<[BlockId; CHUNK_DIM3Z]>)>,
}

impl GeneratorPool {
    /// Spawns `thread_count` worker threads sharing `generator`.
    pub fn new(thread_count: usize, queue_depth: usize, generator: Arc<dyn VoxelGenerator>) -> Self {
        let pool = WorkerPool::new("vox-generator", thread_count, queue_depth, move |pos: AbsChunkPos| {
            (pos, generator.generate_chunk(pos))
        });
        Self { pool }
    }

    /// Submits a chunk for generation, returning its job id. Errs if the pool's queue is full.
    pub fn submit(&self, pos: AbsChunkPos) -> Result<JobId, PoolError> {
        self.pool.submit(pos)
    }

    /// Drains up to `max_count` completed generation jobs.
    pub fn try_recv_results(&self, max_count: usize) -> Vec<(JobId, (AbsChunkPos, Arc<[BlockId; CHUNK_DIM3Z]>))> {
        self.pool.try_recv_results(max_count)
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use vox_schemas::coordinates::InChunkPos;

    use super::*;
    use crate::voxel::block_registry::BlockRegistry;
    use crate::voxel::generator::flat::FlatGenerator;

    #[test]
    fn generates_a_chunk_through_the_pool() {
        let registry = BlockRegistry::builtin();
        let generator: Arc<dyn VoxelGenerator> = Arc::new(FlatGenerator::new(63, &registry).unwrap());
        let pool = GeneratorPool::new(1, 8, generator);

        let pos = AbsChunkPos::new(0, 3, 0);
        pool.submit(pos).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut got = None;
        while got.is_none() && Instant::now() < deadline {
            let results = pool.try_recv_results(4);
            if let Some((_, (p, blocks))) = results.into_iter().next() {
                got = Some((p, blocks));
            } else {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        let (p, blocks) = got.expect("generation result should arrive");
        assert_eq!(p, pos);
        let top = InChunkPos::try_new(0, 0, 0).unwrap();
        assert_eq!(blocks[top.as_index()], registry.id_of("grass").unwrap());
    }
}
