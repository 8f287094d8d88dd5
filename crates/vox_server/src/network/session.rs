//! Per-connection client session state: the reliable-pipeline bookkeeping plus its persisted
//! mirror on disk, so a reconnecting player doesn't have to re-download chunks it already
//! acknowledged.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::transport::FrameTag;
use super::PeerAddress;
use crate::atomic_file::{read_with_backup, write_atomic_json};
use crate::prelude::*;

/// Handle onto a connection's writer task: pushing a frame here is what actually gets bytes
/// onto the transport. Shared with [`super::server::ConnectedNetClient`], which holds the other
/// clone for control-message sends.
pub type ChunkFrameSender = AsyncUnboundedSender<(FrameTag, Vec<u8>)>;

/// A chunk frame sent to the client but not yet acknowledged via `chunk_have`.
pub struct OutstandingEntry {
    /// The chunk this sequence number refers to.
    pub chunk_key: (i32, i32, i32),
    /// Chunk version at the time the frame was serialized, used to detect staleness on resend.
    pub version_at_send: i32,
    /// The serialized `CHUNK_FULL` frame, cached so a retry doesn't re-run the codec.
    pub frame: Arc<Vec<u8>>,
    /// When this entry was first sent.
    pub first_sent_at: Instant,
    /// When the retransmit timer for this entry next fires.
    pub next_deadline: Instant,
    /// Number of send attempts so far, including the first.
    pub attempts: u32,
}

/// Per-session send/ack counters (spec telemetry surface).
#[derive(Clone, Copy, Default, Debug)]
pub struct SessionTelemetry {
    /// Frames sent, counting retries.
    pub sent: u64,
    /// Frames resent after a retransmit timeout.
    pub resent: u64,
    /// Outstanding entries dropped after exhausting retries.
    pub dropped: u64,
    /// `chunk_have` acknowledgements processed.
    pub acked: u64,
}

/// The JSON-serializable mirror of a session's pipeline state, written to
/// `<world_root>/sessions/<player_id>.json`.
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct PersistedSessionState {
    /// `(chunk_key, seq)` pairs that were outstanding (sent, not yet acked) at last persist. The
    /// seq is carried across a reconnect so it can be matched against the client's first
    /// `chunk_have` after restore, even though fresh sends after that point get new sequence
    /// numbers from a session-local counter that restarts at 1.
    pub outstanding: Vec<((i32, i32, i32), u32)>,
    /// Chunk keys queued to send but not yet dispatched, in send order.
    pub send_queue: Vec<(i32, i32, i32)>,
    /// Last known player position, restored on reconnect.
    pub last_position: (f64, f64, f64),
}

/// A connected player's session: reliable-pipeline state, persisted to disk with debounced
/// writes so a crash loses at most `session_persist_debounce_ms` of bookkeeping.
pub struct ClientSession {
    /// Stable player identifier (matches the persisted-client-state file name).
    pub player_id: u64,
    /// The peer address this session is currently attached to.
    pub peer: PeerAddress,
    /// Next sequence number to assign to an outgoing chunk frame.
    pub next_seq: u32,
    /// Frames sent but not yet acknowledged, keyed by sequence number.
    pub outstanding: HashMap<u32, OutstandingEntry>,
    /// Chunk keys queued for sending, in the order they should be dispatched.
    pub send_queue: VecDeque<(i32, i32, i32)>,
    /// Entries carried over from a persisted session, keyed by their *old* (pre-reconnect)
    /// sequence number, awaiting reconciliation against the client's first `chunk_have`. Never
    /// populated outside of [`Self::restore`]; drained by the first call to
    /// [`crate::network::pipeline::ReliableChunkPipeline::process_chunk_have`].
    pub pending_reconciliation: HashMap<u32, (i32, i32, i32)>,
    /// True from restore until the client's first `chunk_have` has been reconciled against
    /// `pending_reconciliation`. While true, the pipeline withholds draining `send_queue` so a
    /// freshly assigned sequence number can never collide in meaning with an old, not-yet-settled
    /// one.
    pub awaiting_initial_have: bool,
    /// Send/ack counters.
    pub telemetry: SessionTelemetry,
    /// Last known player position.
    pub last_known_position: (f64, f64, f64),
    /// The connection's writer-task handle: `drain_send_queue`/`retransmit_tick` push
    /// `CHUNK_FULL` frames here directly rather than routing chunk bytes through the
    /// dispatcher's effect list.
    pub outbound: ChunkFrameSender,
    persist_path: PathBuf,
    last_persisted_at: Option<Instant>,
    debounce: Duration,
}

impl ClientSession {
    /// Creates a brand new session with empty pipeline state.
    pub fn new(player_id: u64, peer: PeerAddress, sessions_root: &Path, debounce: Duration, outbound: ChunkFrameSender) -> Self {
        Self {
            player_id,
            peer,
            next_seq: 1,
            outstanding: HashMap::new(),
            send_queue: VecDeque::new(),
            pending_reconciliation: HashMap::new(),
            awaiting_initial_have: false,
            telemetry: SessionTelemetry::default(),
            last_known_position: (0.0, 0.0, 0.0),
            outbound,
            persist_path: sessions_root.join(format!("{player_id}.json")),
            last_persisted_at: None,
            debounce,
        }
    }

    /// Restores a session from its persisted mirror, if one exists. Restored `outstanding`
    /// entries carry no cached frame (it wasn't persisted); they wait in
    /// `pending_reconciliation`, keyed by their old seq, until the client's first `chunk_have`
    /// says which of them it actually applied before the disconnect. The restored send queue is
    /// merged at the head, preserving its original order.
    pub fn restore(
        player_id: u64,
        peer: PeerAddress,
        sessions_root: &Path,
        debounce: Duration,
        outbound: ChunkFrameSender,
    ) -> Result<Self> {
        let mut session = Self::new(player_id, peer, sessions_root, debounce, outbound);
        if let Some(state) = read_with_backup::<PersistedSessionState>(&session.persist_path)? {
            session.last_known_position = state.last_position;
            session.awaiting_initial_have = !state.outstanding.is_empty();
            session.pending_reconciliation = state.outstanding.into_iter().map(|(key, seq)| (seq, key)).collect();
            session.send_queue = state.send_queue.into_iter().collect();
        }
        Ok(session)
    }

    /// Persists the session's pipeline state if at least `debounce` has elapsed since the last
    /// write, or if `force` is set (e.g. on clean disconnect).
    pub fn maybe_persist(&mut self, force: bool) -> Result<()> {
        let now = Instant::now();
        let due = force || self.last_persisted_at.map(|t| now.duration_since(t) >= self.debounce).unwrap_or(true);
        if !due {
            return Ok(());
        }
        let state = PersistedSessionState {
            outstanding: self.outstanding.iter().map(|(seq, e)| (e.chunk_key, *seq)).collect(),
            send_queue: self.send_queue.iter().copied().collect(),
            last_position: self.last_known_position,
        };
        write_atomic_json(&self.persist_path, &state)?;
        self.last_persisted_at = Some(now);
        Ok(())
    }
}
