//! Message dispatcher: framing-agnostic routing of inbound control messages to session/world
//! effects, and construction of the outbound messages those effects produce.
//!
//! This module only decides *what* should happen and *what* should be sent; it does not touch
//! a transport directly; server.rs drives the actual I/O and calls back into [`Dispatcher`].

use serde::{Deserialize, Serialize};
use vox_schemas::voxel::block::BlockId;

use super::pipeline::ReliableChunkPipeline;
use super::session::ClientSession;
use super::PeerAddress;
use crate::prelude::*;
use crate::voxel::block_registry::BlockRegistry;
use crate::voxel::store::ChunkStore;

/// A message received over a session's control channel.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Sent first, before any other message: names the stable player id this connection
    /// belongs to. Authentication proper (verifying the client's right to that id) is out of
    /// scope here; this is purely the identity a reconnect resumes by.
    Hello { player_id: u64 },
    /// The player's client-authoritative position, used to recompute the chunk send set.
    PlayerMove { x: f64, y: f64, z: f64 },
    /// A request to remove the block at the given position.
    BreakBlock { x: i32, y: i32, z: i32 },
    /// A request to place a block at the given position.
    PlaceBlock { x: i32, y: i32, z: i32, id: u16 },
    /// Acknowledges receipt of the chunk frames with the given sequence numbers.
    ChunkHave { seqs: Vec<u32> },
}

/// A message sent to a client over its control channel.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Sent once on connect: identifies the player and describes the block registry in use.
    WorldInit { player_id: u64, world_height: i32, block_string_ids: Vec<String> },
    /// A single block change, either player-caused or a server-side correction.
    BlockUpdate { x: i32, y: i32, z: i32, id: u16 },
    /// Another player's updated position.
    PlayerUpdate { player_id: u64, x: f64, y: f64, z: f64 },
    /// Another player has disconnected.
    PlayerDisconnect { player_id: u64 },
}

/// A side effect produced by routing an inbound message: something the caller should send
/// somewhere, or a connection it should tear down.
pub enum Effect {
    /// Send `message` to exactly one session.
    SendTo { player_id: u64, message: OutboundMessage },
    /// Send `message` to every connected session except `except`, if given.
    Broadcast { except: Option<u64>, message: OutboundMessage },
}

/// Owns every connected session and routes inbound messages to world/pipeline effects.
pub struct Dispatcher {
    store: Arc<ChunkStore>,
    registry: Arc<BlockRegistry>,
    pipeline: ReliableChunkPipeline,
    render_radius_chunks: i32,
    sessions: HashMap<u64, ClientSession>,
}

impl Dispatcher {
    /// Builds a dispatcher with no connected sessions.
    pub fn new(store: Arc<ChunkStore>, registry: Arc<BlockRegistry>, pipeline: ReliableChunkPipeline, render_radius_chunks: i32) -> Self {
        Self { store, registry, pipeline, render_radius_chunks, sessions: HashMap::new() }
    }

    /// Registers a newly connected (or reconnected) session.
    pub fn connect(&mut self, session: ClientSession) -> Vec<Effect> {
        let player_id = session.player_id;
        self.sessions.insert(player_id, session);
        vec![Effect::SendTo {
            player_id,
            message: OutboundMessage::WorldInit {
                player_id,
                world_height: 256,
                block_string_ids: Vec::new(),
            },
        }]
    }

    /// Removes a session (clean disconnect or a transport failure), persisting its final state.
    pub fn disconnect(&mut self, player_id: u64) -> Vec<Effect> {
        if let Some(mut session) = self.sessions.remove(&player_id) {
            if let Err(e) = session.maybe_persist(true) {
                tracing::warn!("failed to persist session {player_id} on disconnect: {e}");
            }
        }
        vec![Effect::Broadcast { except: Some(player_id), message: OutboundMessage::PlayerDisconnect { player_id } }]
    }

    /// Routes one control-channel message from `from`, returning the effects it produced.
    /// Malformed payloads (not a known message, or a message this peer has no business sending)
    /// are logged and dropped rather than propagated as an error, per the error-handling policy:
    /// a single bad message from one client must never take down the session or the server.
    pub fn handle_control(&mut self, from: u64, payload: &[u8]) -> Vec<Effect> {
        let message: InboundMessage = match serde_json::from_slice(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("dropping malformed control message from session {from}: {e}");
                return Vec::new();
            }
        };
        let Some(_) = self.sessions.get(&from) else {
            tracing::warn!("dropping control message from unknown session {from}");
            return Vec::new();
        };
        match message {
            InboundMessage::Hello { .. } => {
                tracing::warn!("dropping a stray hello from already-connected session {from}");
                Vec::new()
            }
            InboundMessage::PlayerMove { x, y, z } => self.handle_player_move(from, x, y, z),
            InboundMessage::BreakBlock { x, y, z } => self.handle_edit(from, x, y, z, BlockId::AIR),
            InboundMessage::PlaceBlock { x, y, z, id } => self.handle_edit(from, x, y, z, BlockId(id)),
            InboundMessage::ChunkHave { seqs } => {
                let session = self.sessions.get_mut(&from).expect("checked above");
                self.pipeline.process_chunk_have(session, &seqs);
                Vec::new()
            }
        }
    }

    fn handle_player_move(&mut self, from: u64, x: f64, y: f64, z: f64) -> Vec<Effect> {
        let session = self.sessions.get_mut(&from).expect("checked by caller");
        session.last_known_position = (x, y, z);
        self.pipeline.update_want_set(session, self.render_radius_chunks);
        vec![Effect::Broadcast { except: Some(from), message: OutboundMessage::PlayerUpdate { player_id: from, x, y, z } }]
    }

    /// A block edit is refused (with a corrective `block_update` telling the offending client
    /// the true state) if it names an unknown block type or a vertical position outside the
    /// world's height range; world-height is the only positional authority rule this server
    /// enforces (there is no claims/region ownership model in scope).
    fn handle_edit(&mut self, from: u64, x: i32, y: i32, z: i32, id: BlockId) -> Vec<Effect> {
        if !self.registry.contains(id) || y < 0 || y >= 256 {
            let truth = self.store.get_block(x, y, z);
            tracing::warn!("refusing edit at ({x}, {y}, {z}) from session {from}: out of bounds or unknown block");
            return vec![Effect::SendTo { player_id: from, message: OutboundMessage::BlockUpdate { x, y, z, id: truth.0 } }];
        }
        self.store.set_block(x, y, z, id);
        let key = (x.div_euclid(16), y.div_euclid(16), z.div_euclid(16));
        self.pipeline.propagate_edit(self.sessions.values_mut(), key);
        vec![Effect::Broadcast { except: None, message: OutboundMessage::BlockUpdate { x, y, z, id: id.0 } }]
    }

    /// Drains the retransmit tick and send-queue for every connected session. Intended to be
    /// called once per `retransmit_tick_ms`.
    pub fn tick(&mut self) {
        for session in self.sessions.values_mut() {
            self.pipeline.retransmit_tick(session);
            self.pipeline.drain_send_queue(session);
            if let Err(e) = session.maybe_persist(false) {
                tracing::warn!("failed to persist session {}: {e}", session.player_id);
            }
        }
    }

    /// Number of currently connected sessions. Exposed for tests and diagnostics.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::network::pipeline::PipelineConfig;
    use crate::voxel::generator::flat::FlatGenerator;
    use crate::voxel::generator::VoxelGenerator;
    use crate::voxel::persistence::memory::InMemoryColumnPersistence;
    use crate::voxel::persistence::ColumnPersistence;
    use crate::worker::codec_pool::CodecPool;
    use crate::worker::generator_pool::GeneratorPool;

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(BlockRegistry::builtin());
        let generator: Arc<dyn VoxelGenerator> = Arc::new(FlatGenerator::new(63, &registry).unwrap());
        let persistence: Arc<dyn ColumnPersistence> = Arc::new(InMemoryColumnPersistence::new());
        let store = Arc::new(ChunkStore::new(generator.clone(), persistence, 256));
        let pipeline = ReliableChunkPipeline::new(
            PipelineConfig { ack_timeout: Duration::from_millis(80), max_retries: 4, max_backoff: Duration::from_millis(2000), window_size: 32 },
            store.clone(),
            Arc::new(GeneratorPool::new(1, 8, generator)),
            Arc::new(CodecPool::new(1, 8)),
        );
        Dispatcher::new(store, registry, pipeline, 4)
    }

    fn test_session(id: u64) -> ClientSession {
        ClientSession::new(
            id,
            PeerAddress::Local(id as i32),
            &std::env::temp_dir(),
            Duration::from_secs(3600),
            async_unbounded_channel().0,
        )
    }

    #[test]
    fn malformed_control_message_is_dropped_without_effects() {
        let mut d = dispatcher();
        d.connect(test_session(1));
        let effects = d.handle_control(1, b"not json");
        assert!(effects.is_empty());
    }

    #[test]
    fn control_message_from_unknown_session_is_dropped() {
        let mut d = dispatcher();
        let effects = d.handle_control(99, br#"{"type":"player_move","x":0,"y":0,"z":0}"#);
        assert!(effects.is_empty());
    }

    #[test]
    fn place_block_with_unknown_block_id_is_refused_with_a_correction() {
        let mut d = dispatcher();
        d.connect(test_session(1));
        let effects = d.handle_control(1, br#"{"type":"place_block","x":0,"y":63,"z":0,"id":9999}"#);
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::SendTo { player_id, message: OutboundMessage::BlockUpdate { id, .. } } => {
                assert_eq!(*player_id, 1);
                assert_ne!(*id, 9999);
            }
            _ => panic!("expected a corrective SendTo"),
        }
    }

    #[test]
    fn break_block_broadcasts_to_everyone() {
        let mut d = dispatcher();
        d.connect(test_session(1));
        d.connect(test_session(2));
        let effects = d.handle_control(1, br#"{"type":"break_block","x":0,"y":63,"z":0}"#);
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            Effect::Broadcast { except, message: OutboundMessage::BlockUpdate { id, .. } } => {
                assert_eq!(*except, None);
                assert_eq!(*id, 0);
            }
            _ => panic!("expected a Broadcast"),
        }
    }

    #[test]
    fn a_stray_hello_after_connect_is_dropped_without_effects() {
        let mut d = dispatcher();
        d.connect(test_session(1));
        let effects = d.handle_control(1, br#"{"type":"hello","player_id":1}"#);
        assert!(effects.is_empty());
        assert_eq!(d.session_count(), 1);
    }

    #[test]
    fn chunk_have_with_unknown_seq_is_ignored_without_error() {
        let mut d = dispatcher();
        d.connect(test_session(1));
        let effects = d.handle_control(1, br#"{"type":"chunk_have","seqs":[42]}"#);
        assert!(effects.is_empty());
    }

    #[test]
    fn disconnect_broadcasts_to_remaining_sessions() {
        let mut d = dispatcher();
        d.connect(test_session(1));
        d.connect(test_session(2));
        let effects = d.disconnect(1);
        assert_eq!(d.session_count(), 1);
        match &effects[0] {
            Effect::Broadcast { except, message: OutboundMessage::PlayerDisconnect { player_id } } => {
                assert_eq!(*except, Some(1));
                assert_eq!(*player_id, 1);
            }
            _ => panic!("expected a Broadcast"),
        }
    }
}
