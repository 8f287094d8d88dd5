//! The server-side network state machine: QUIC listener/connection acceptance, in-process
//! connections for tests, and wiring each connection's framed channel to the [`Dispatcher`].

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::spawn_local;

use super::dispatcher::{Dispatcher, Effect, InboundMessage, OutboundMessage};
use super::session::{ChunkFrameSender, ClientSession};
use super::thread::NetworkThreadState;
use super::transport::{quinn_server_config, read_frame, write_frame, FrameTag};
use super::PeerAddress;
use crate::prelude::*;

/// Bookkeeping the server keeps per connected peer, independent of the (owned-elsewhere)
/// session/pipeline state.
pub struct ConnectedNetClient {
    /// The peer's address.
    pub peer: PeerAddress,
    /// The assigned player id for this connection.
    pub player_id: u64,
    outbound: ChunkFrameSender,
}

/// A pair returned to a local (in-process) connector: the address it was assigned, and its end
/// of the duplex stream the server is reading/writing on the other side of.
pub type LocalConnectionPipe = (PeerAddress, tokio::io::DuplexStream);

/// The network thread's state object: owns every connected client and the [`Dispatcher`] that
/// routes their messages.
pub struct NetworkThreadServerState {
    dispatcher: Dispatcher,
    clients: HashMap<PeerAddress, ConnectedNetClient>,
    listen_addresses: Vec<SocketAddr>,
    next_local_id: i32,
    next_player_id: u64,
    endpoint: Option<quinn::Endpoint>,
}

impl NetworkThreadState for NetworkThreadServerState {
    async fn shutdown(this: Rc<RefCell<Self>>) {
        let endpoint = this.borrow_mut().endpoint.take();
        if let Some(endpoint) = endpoint {
            endpoint.close(0u32.into(), b"server shutting down");
        }
    }
}

impl NetworkThreadServerState {
    /// Constructs server state with no connections yet.
    pub fn new(dispatcher: Dispatcher, listen_addresses: Vec<SocketAddr>) -> Self {
        Self {
            dispatcher,
            clients: HashMap::new(),
            listen_addresses,
            next_local_id: 1,
            next_player_id: 1,
            endpoint: None,
        }
    }

    /// Binds the configured listen addresses and starts accepting QUIC connections. A no-op
    /// (not an error) if `listen_addresses` is empty, for headless/local-only test servers.
    pub async fn bootstrap(this: &Rc<RefCell<Self>>) -> Result<()> {
        let addresses = this.borrow().listen_addresses.clone();
        for addr in addresses {
            let socket = std::net::UdpSocket::bind(addr).with_context(|| format!("binding {addr}"))?;
            let endpoint_config = quinn::EndpointConfig::default();
            let endpoint =
                quinn::Endpoint::new(endpoint_config, Some(quinn_server_config()), socket.into(), quinn::default_runtime().unwrap())
                    .with_context(|| format!("creating a QUIC endpoint on {addr}"))?;
            this.borrow_mut().endpoint = Some(endpoint.clone());
            spawn_local(Self::listener_task(Rc::clone(this), endpoint));
        }
        Ok(())
    }

    async fn listener_task(this: Rc<RefCell<Self>>, endpoint: quinn::Endpoint) {
        loop {
            let Some(incoming) = endpoint.accept().await else { break };
            let this = Rc::clone(&this);
            spawn_local(async move {
                match incoming.await {
                    Ok(connection) => Self::connection_task(this, connection).await,
                    Err(e) => tracing::warn!("QUIC handshake failed: {e}"),
                }
            });
        }
    }

    async fn connection_task(this: Rc<RefCell<Self>>, connection: quinn::Connection) {
        let remote = connection.remote_address();
        let local = connection.local_ip().map(|ip| SocketAddr::new(ip, 0)).unwrap_or(remote);
        let peer = PeerAddress::Network { local, remote };
        let (send, recv) = match connection.accept_bi().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("failed to accept the control stream from {remote}: {e}");
                return;
            }
        };
        Self::run_connection(this, peer, send, recv).await;
    }

    /// Registers a new in-process connection (used by tests and any co-located client), wiring
    /// a duplex pair the same way a remote QUIC connection's single stream is wired.
    pub async fn accept_local_connection(this: Rc<RefCell<Self>>) -> Result<LocalConnectionPipe> {
        let id = {
            let mut s = this.borrow_mut();
            let id = s.next_local_id;
            s.next_local_id += 1;
            id
        };
        let peer = PeerAddress::Local(id);
        let (server_side, client_side) = tokio::io::duplex(64 * 1024);
        let (recv, send) = tokio::io::split(server_side);
        spawn_local(Self::run_connection(this, peer, send, recv));
        Ok((peer, client_side))
    }

    async fn run_connection<W: AsyncWrite + Unpin + 'static, R: AsyncRead + Unpin + 'static>(
        this: Rc<RefCell<Self>>,
        peer: PeerAddress,
        mut send: W,
        mut recv: R,
    ) {
        let (outbound_tx, mut outbound_rx) = async_unbounded_channel();

        // The first control frame a client sends is expected to be `Hello { player_id }`,
        // claiming the identity a reconnect should resume. This is not authentication: any
        // claimed id is accepted as-is. A missing or malformed hello just means the client
        // doesn't support resume, so it's treated as a brand new, anonymous player.
        let claimed_player_id = match read_frame(&mut recv).await {
            Ok((FrameTag::Control, payload)) => match serde_json::from_slice::<InboundMessage>(&payload) {
                Ok(InboundMessage::Hello { player_id }) => Some(player_id),
                Ok(_) => {
                    tracing::warn!("expected a hello as the first message from {peer:?}, got something else");
                    None
                }
                Err(e) => {
                    tracing::warn!("failed to parse the hello from {peer:?}: {e}");
                    None
                }
            },
            Ok((FrameTag::ChunkFull, _)) => {
                tracing::warn!("expected a hello as the first message from {peer:?}, got a binary frame");
                None
            }
            Err(_) => None,
        };

        let player_id = {
            let mut state = this.borrow_mut();
            let player_id = claimed_player_id.unwrap_or(state.next_player_id);
            state.next_player_id = state.next_player_id.max(player_id + 1);
            state.clients.insert(peer, ConnectedNetClient { peer, player_id, outbound: outbound_tx.clone() });
            player_id
        };

        let session_root = std::env::temp_dir();
        let debounce = std::time::Duration::from_millis(50);
        let session = match ClientSession::restore(player_id, peer, &session_root, debounce, outbound_tx.clone()) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("failed to restore session {player_id}, starting fresh: {e}");
                ClientSession::new(player_id, peer, &session_root, debounce, outbound_tx)
            }
        };
        let effects = this.borrow_mut().dispatcher.connect(session);
        Self::apply_effects(&this, effects);

        let writer = async move {
            while let Some((tag, payload)) = outbound_rx.recv().await {
                if write_frame(&mut send, tag, &payload).await.is_err() {
                    break;
                }
            }
            let _ = send.shutdown().await;
        };

        let reader = {
            let this = Rc::clone(&this);
            async move {
                loop {
                    match read_frame(&mut recv).await {
                        Ok((FrameTag::Control, payload)) => {
                            let effects = this.borrow_mut().dispatcher.handle_control(player_id, &payload);
                            Self::apply_effects(&this, effects);
                        }
                        Ok((FrameTag::ChunkFull, _)) => {
                            tracing::warn!(
                                "dropping unexpected binary frame from session {player_id}: clients never send chunk data"
                            );
                        }
                        Err(_) => break,
                    }
                }
            }
        };

        // A race, not a join: once either side of the connection fails (the client hung up, or
        // a write errored because it did), the other one has no reason to keep running — it
        // would otherwise block forever on a channel whose senders aren't dropped until the
        // cleanup below runs.
        tokio::select! {
            () = writer => {}
            () = reader => {}
        }

        let mut state = this.borrow_mut();
        state.clients.remove(&peer);
        let effects = state.dispatcher.disconnect(player_id);
        drop(state);
        Self::apply_effects(&this, effects);
    }

    fn apply_effects(this: &Rc<RefCell<Self>>, effects: Vec<Effect>) {
        let state = this.borrow();
        for effect in effects {
            match effect {
                Effect::SendTo { player_id, message } => state.send_to(player_id, message),
                Effect::Broadcast { except, message } => state.broadcast(except, message),
            }
        }
    }

    fn send_to(&self, player_id: u64, message: OutboundMessage) {
        let Some(client) = self.clients.values().find(|c| c.player_id == player_id) else { return };
        let Ok(bytes) = serde_json::to_vec(&message) else { return };
        let _ = client.outbound.send((FrameTag::Control, bytes));
    }

    fn broadcast(&self, except: Option<u64>, message: OutboundMessage) {
        let Ok(bytes) = serde_json::to_vec(&message) else { return };
        for client in self.clients.values() {
            if Some(client.player_id) == except {
                continue;
            }
            let _ = client.outbound.send((FrameTag::Control, bytes.clone()));
        }
    }

    /// Runs one retransmit/send-queue tick across every connected session, and flushes any
    /// resulting chunk frames to their respective connections. Call once per
    /// `retransmit_tick_ms`.
    pub fn tick(&mut self) {
        self.dispatcher.tick();
    }

    /// Number of currently connected clients. Exposed for tests and diagnostics.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::network::pipeline::{PipelineConfig, ReliableChunkPipeline};
    use crate::network::thread::NetworkThread;
    use crate::voxel::block_registry::BlockRegistry;
    use crate::voxel::generator::flat::FlatGenerator;
    use crate::voxel::generator::VoxelGenerator;
    use crate::voxel::persistence::memory::InMemoryColumnPersistence;
    use crate::voxel::persistence::ColumnPersistence;
    use crate::voxel::store::ChunkStore;
    use crate::worker::codec_pool::CodecPool;
    use crate::worker::generator_pool::GeneratorPool;

    fn make_state() -> NetworkThreadServerState {
        let registry = Arc::new(BlockRegistry::builtin());
        let generator: Arc<dyn VoxelGenerator> = Arc::new(FlatGenerator::new(63, &registry).unwrap());
        let persistence: Arc<dyn ColumnPersistence> = Arc::new(InMemoryColumnPersistence::new());
        let store = Arc::new(ChunkStore::new(generator.clone(), persistence, 256));
        let pipeline = ReliableChunkPipeline::new(
            PipelineConfig {
                ack_timeout: Duration::from_millis(80),
                max_retries: 4,
                max_backoff: Duration::from_millis(2000),
                window_size: 32,
            },
            store.clone(),
            Arc::new(GeneratorPool::new(1, 8, generator)),
            Arc::new(CodecPool::new(1, 8)),
        );
        let dispatcher = Dispatcher::new(store, registry, pipeline, 4);
        NetworkThreadServerState::new(dispatcher, Vec::new())
    }

    fn read_one_frame(client_side: &mut tokio::io::DuplexStream) -> (u8, Vec<u8>) {
        futures::executor::block_on(async {
            let mut header = [0u8; 5];
            client_side.read_exact(&mut header).await.unwrap();
            let tag = header[0];
            let len = u32::from_le_bytes(header[1..5].try_into().unwrap());
            let mut payload = vec![0u8; len as usize];
            client_side.read_exact(&mut payload).await.unwrap();
            (tag, payload)
        })
    }

    fn send_hello(client_side: &mut tokio::io::DuplexStream, player_id: u64) {
        futures::executor::block_on(async {
            let payload = serde_json::to_vec(&InboundMessage::Hello { player_id }).unwrap();
            write_frame(client_side, FrameTag::Control, &payload).await.unwrap();
            client_side.flush().await.unwrap();
        });
    }

    #[test]
    fn a_local_connection_receives_world_init_on_connect() {
        let thread = NetworkThread::new(make_state);
        let (_peer, mut client_side) = thread
            .schedule_task(|state| Box::pin(NetworkThreadServerState::accept_local_connection(Rc::clone(state))))
            .blocking_wait()
            .unwrap();
        send_hello(&mut client_side, 1);

        let (tag, payload) = read_one_frame(&mut client_side);
        assert_eq!(tag, FrameTag::Control as u8);
        let message: OutboundMessage = serde_json::from_slice(&payload).unwrap();
        assert!(matches!(message, OutboundMessage::WorldInit { .. }));
        thread.sync_shutdown();
    }

    #[test]
    fn a_malformed_client_message_does_not_crash_the_connection() {
        let thread = NetworkThread::new(make_state);
        let (_peer, mut client_side) = thread
            .schedule_task(|state| Box::pin(NetworkThreadServerState::accept_local_connection(Rc::clone(state))))
            .blocking_wait()
            .unwrap();
        send_hello(&mut client_side, 1);
        let _ = read_one_frame(&mut client_side); // drain world_init

        futures::executor::block_on(async {
            write_frame(&mut client_side, FrameTag::Control, b"not json").await.unwrap();
            client_side.flush().await.unwrap();
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(thread.is_alive());
        thread.sync_shutdown();
    }
}
