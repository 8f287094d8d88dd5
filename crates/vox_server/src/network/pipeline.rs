//! The reliable chunk delivery pipeline: send-set computation, windowed dispatch, ack
//! processing, and retry/backoff. One [`ReliableChunkPipeline`] is shared by every session on a
//! network thread; it owns the worker pools used to keep codec and (pre-emptive) generation work
//! off the thread driving the event loop.

use std::time::{Duration, Instant};

use vox_schemas::coordinates::AbsChunkPos;

use super::session::{ClientSession, OutstandingEntry};
use super::transport::FrameTag;
use crate::config::StreamingConfig;
use crate::prelude::*;
use crate::voxel::store::ChunkStore;
use crate::worker::codec_pool::{CodecPool, EncodeJob};
use crate::worker::generator_pool::GeneratorPool;

/// Tuning knobs for the pipeline, lifted out of [`StreamingConfig`] at construction time.
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// Initial retransmit timeout for a freshly sent, unacknowledged frame.
    pub ack_timeout: Duration,
    /// Attempts (including the first) before an outstanding entry is dropped.
    pub max_retries: u32,
    /// Ceiling applied to the exponential retransmit backoff.
    pub max_backoff: Duration,
    /// Maximum number of unacknowledged frames per session.
    pub window_size: usize,
}

impl From<&StreamingConfig> for PipelineConfig {
    fn from(cfg: &StreamingConfig) -> Self {
        Self {
            ack_timeout: Duration::from_millis(cfg.chunk_ack_timeout_ms),
            max_retries: cfg.chunk_max_retries,
            max_backoff: Duration::from_millis(cfg.chunk_max_backoff_ms),
            window_size: cfg.window_size,
        }
    }
}

fn backoff_for(cfg: &PipelineConfig, attempts: u32) -> Duration {
    let scale = 1u32.checked_shl(attempts.saturating_sub(1)).unwrap_or(u32::MAX);
    cfg.ack_timeout.saturating_mul(scale).min(cfg.max_backoff)
}

/// Drives the reliable chunk pipeline for every connected session: computing what each session
/// should be sent, dispatching frames within the flow-control window, and retiring or retrying
/// outstanding entries.
pub struct ReliableChunkPipeline {
    cfg: PipelineConfig,
    store: Arc<ChunkStore>,
    generator_pool: Arc<GeneratorPool>,
    codec_pool: Arc<CodecPool>,
}

impl ReliableChunkPipeline {
    /// Builds a pipeline sharing the given store and worker pools.
    pub fn new(cfg: PipelineConfig, store: Arc<ChunkStore>, generator_pool: Arc<GeneratorPool>, codec_pool: Arc<CodecPool>) -> Self {
        Self { cfg, store, generator_pool, codec_pool }
    }

    /// Recomputes the set of chunks a session should have, based on its last known position,
    /// and enqueues any newly-wanted chunk key that isn't already outstanding or queued.
    /// Chunks no longer in range are left alone rather than actively evicted client-side — the
    /// streaming protocol has no `chunk_forget` message.
    pub fn update_want_set(&self, session: &mut ClientSession, radius: i32) {
        let (x, y, z) = session.last_known_position;
        let center = AbsChunkPos::new((x as i32).div_euclid(16), (y as i32).div_euclid(16), (z as i32).div_euclid(16));
        let wanted = self.store.chunks_in_range(center, radius);
        for pos in &wanted {
            self.generator_pool.submit(*pos).ok();
        }
        for pos in wanted {
            let ivec = pos.into_ivec3();
            let key = (ivec.x, ivec.y, ivec.z);
            let already_outstanding = session.outstanding.values().any(|e| e.chunk_key == key);
            let already_queued = session.send_queue.contains(&key);
            if !already_outstanding && !already_queued {
                session.send_queue.push_back(key);
            }
        }
        // Prefetch results just warm the generator's internal memo cache; nothing further to do
        // with the dense arrays themselves once `ChunkStore` re-derives them synchronously.
        self.generator_pool.try_recv_results(64);
    }

    /// Drains `session`'s send queue while its outstanding window has room, materializing,
    /// encoding, and writing each chunk's `CHUNK_FULL` frame to the connection's transport.
    /// Withheld entirely while the session is still awaiting reconciliation of its restored
    /// `outstanding` set against the client's first `chunk_have` (see
    /// [`Self::process_chunk_have`]), so a freshly assigned sequence number never gets sent
    /// before the client has had a chance to report what it kept from before the disconnect.
    pub fn drain_send_queue(&self, session: &mut ClientSession) {
        if session.awaiting_initial_have {
            return;
        }
        while session.outstanding.len() < self.cfg.window_size {
            let Some(key) = session.send_queue.pop_front() else { break };
            let pos = AbsChunkPos::new(key.0, key.1, key.2);
            let blocks = self.store.materialize_chunk(pos);
            let version = self.store.chunk_version(pos);
            let seq = session.next_seq;
            session.next_seq = session.next_seq.wrapping_add(1).max(1);
            let frame = Arc::new(vox_schemas::codec::encode_dense_frame(seq, key.0, key.1, key.2, version, &blocks));
            let _ = session.outbound.send((FrameTag::ChunkFull, (*frame).clone()));
            let now = Instant::now();
            session.outstanding.insert(
                seq,
                OutstandingEntry {
                    chunk_key: key,
                    version_at_send: version,
                    frame,
                    first_sent_at: now,
                    next_deadline: now + self.cfg.ack_timeout,
                    attempts: 1,
                },
            );
            session.telemetry.sent += 1;
        }
    }

    /// Processes a `chunk_have` acknowledgement list: clears matching outstanding entries.
    /// Unknown sequence numbers (already retired, or never sent) are ignored.
    ///
    /// If this session is still awaiting reconciliation after a restore, this first call instead
    /// settles `pending_reconciliation`: an old seq present in `seqs` means the client already
    /// applied that chunk before disconnecting, so it's simply dropped; an old seq absent from
    /// `seqs` means the chunk key is re-enqueued on `send_queue` to be resent under a fresh
    /// sequence number. Only once reconciliation is settled does [`Self::drain_send_queue`]
    /// resume sending.
    pub fn process_chunk_have(&self, session: &mut ClientSession, seqs: &[u32]) {
        if session.awaiting_initial_have {
            let acked: HashSet<u32> = seqs.iter().copied().collect();
            for (old_seq, key) in session.pending_reconciliation.drain() {
                if !acked.contains(&old_seq) && !session.send_queue.contains(&key) {
                    session.send_queue.push_back(key);
                }
            }
            session.awaiting_initial_have = false;
        }
        for seq in seqs {
            if session.outstanding.remove(seq).is_some() {
                session.telemetry.acked += 1;
            }
        }
    }

    /// Retransmit tick: called periodically (see `retransmit_tick_ms`). Entries past their
    /// deadline are resent (re-writing the same cached frame, with the same sequence number) with
    /// exponential backoff, or dropped after `max_retries` attempts.
    pub fn retransmit_tick(&self, session: &mut ClientSession) {
        let now = Instant::now();
        let due: Vec<u32> = session
            .outstanding
            .iter()
            .filter(|(_, e)| e.next_deadline <= now)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in due {
            let Some(entry) = session.outstanding.get_mut(&seq) else { continue };
            if entry.attempts >= self.cfg.max_retries {
                let key = entry.chunk_key;
                session.outstanding.remove(&seq);
                session.telemetry.dropped += 1;
                // Still wanted; re-enqueue for a fresh sequence number rather than leaving the
                // client permanently missing it.
                if !session.send_queue.contains(&key) {
                    session.send_queue.push_back(key);
                }
                continue;
            }
            entry.attempts += 1;
            entry.next_deadline = now + backoff_for(&self.cfg, entry.attempts);
            let frame = entry.frame.clone();
            let _ = session.outbound.send((FrameTag::ChunkFull, (*frame).clone()));
            session.telemetry.resent += 1;
        }
    }

    /// Submits a re-encode for `key` to the codec pool and drains any completed jobs, updating
    /// cached frames for matching outstanding entries. Call opportunistically; this is a
    /// throughput optimization, not required for correctness (frames are encoded inline in
    /// [`drain_send_queue`] as well).
    pub fn submit_encode(&self, job: EncodeJob) {
        let _ = self.codec_pool.submit(job);
    }

    /// Drains completed codec jobs, discarding results: the synchronous `drain_send_queue` path
    /// already produced a usable frame, so this only exists to keep the pool's result channel
    /// from filling up when [`submit_encode`] is used for background warm-up.
    pub fn drain_codec_results(&self) {
        self.codec_pool.try_recv_results(64);
    }

    /// Propagates a block edit: re-queues the edited chunk plus its six face-adjacent neighbors
    /// (never diagonals) for every given session that doesn't already have them outstanding or
    /// queued, so a player standing at a chunk boundary sees the edit on both sides. The edited
    /// chunk's version bump itself happens in [`ChunkStore::set_block`]; this only decides what
    /// gets (re-)sent.
    pub fn propagate_edit<'a>(&self, sessions: impl Iterator<Item = &'a mut ClientSession>, edited: (i32, i32, i32)) {
        let neighbors = [
            edited,
            (edited.0 + 1, edited.1, edited.2),
            (edited.0 - 1, edited.1, edited.2),
            (edited.0, edited.1 + 1, edited.2),
            (edited.0, edited.1 - 1, edited.2),
            (edited.0, edited.1, edited.2 + 1),
            (edited.0, edited.1, edited.2 - 1),
        ];
        for session in sessions {
            for key in neighbors {
                let already_outstanding = session.outstanding.values().any(|e| e.chunk_key == key);
                if !already_outstanding && !session.send_queue.contains(&key) {
                    session.send_queue.push_back(key);
                }
            }
        }
    }
}
