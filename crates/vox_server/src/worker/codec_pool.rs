//! Worker pool running `CHUNK_FULL` frame encoding off the network/session threads.

use std::sync::Arc;

use vox_schemas::codec::encode_dense_frame;
use vox_schemas::coordinates::CHUNK_DIM3Z;
use vox_schemas::voxel::block::BlockId;

use super::pool::{JobId, PoolError, WorkerPool};

/// A chunk encode request: the frame header fields plus the dense block array to encode.
pub struct EncodeJob {
    /// Sequence number to stamp into the frame.
    pub seq: u32,
    /// Chunk column/layer coordinates.
    pub cx: i32,
    /// Vertical chunk coordinate.
    pub cy: i32,
    /// Chunk column/layer coordinates.
    pub cz: i32,
    /// Chunk version at encode time, echoed back to the client for staleness checks.
    pub version: i32,
    /// The dense block array to encode.
    pub blocks: Arc<[BlockId; CHUNK_DIM3Z]>,
}

/// A pool dedicated to `CHUNK_FULL` frame encoding, so codec/compression work never blocks the
/// network thread's event loop.
pub struct CodecPool {
    pool: WorkerPool<EncodeJob, Vec<u8>>,
}

impl CodecPool {
    /// Spawns `thread_count` worker threads.
    pub fn new(thread_count: usize, queue_depth: usize) -> Self {
        let pool = WorkerPool::new("vox-codec", thread_count, queue_depth, |job: EncodeJob| {
            encode_dense_frame(job.seq, job.cx, job.cy, job.cz, job.version, &job.blocks)
        });
        Self { pool }
    }

    /// Submits a chunk for encoding, returning its job id. Errs if the pool's queue is full.
    pub fn submit(&self, job: EncodeJob) -> Result<JobId, PoolError> {
        self.pool.submit(job)
    }

    /// Drains up to `max_count` completed encode jobs.
    pub fn try_recv_results(&self, max_count: usize) -> Vec<(JobId, Vec<u8>)> {
        self.pool.try_recv_results(max_count)
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use vox_schemas::codec::decode_chunk_frame;

    use super::*;

    #[test]
    fn encodes_a_chunk_through_the_pool() {
        let pool = CodecPool::new(1, 8);
        let blocks = Arc::new([BlockId::AIR; CHUNK_DIM3Z]);
        pool.submit(EncodeJob { seq: 1, cx: 0, cy: 0, cz: 0, version: 5, blocks }).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut frame = None;
        while frame.is_none() && Instant::now() < deadline {
            if let Some((_, bytes)) = pool.try_recv_results(4).into_iter().next() {
                frame = Some(bytes);
            } else {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        let frame = frame.expect("encode result should arrive");
        let decoded = decode_chunk_frame(&frame).unwrap();
        assert_eq!(decoded.seq, 1);
        assert_eq!(decoded.version, 5);
        assert!(decoded.blocks.iter().all(|b| b.is_air()));
    }
}
