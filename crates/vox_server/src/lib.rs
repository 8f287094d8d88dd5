#![warn(missing_docs)]
#![allow(clippy::type_complexity)]

//! The voxedge dedicated server: chunk streaming and world-state core.
//!
//! A [`GameServer`] owns the chunk store, block registry, worker pools, and the single network
//! thread that runs the connection-accept loop, the message dispatcher, and the reliable chunk
//! pipeline for every connected player.

pub mod atomic_file;
pub mod config;
pub mod dedicated_server;
pub mod network;
pub mod prelude;
pub mod promises;
pub mod voxel;
pub mod worker;
pub mod world;

use std::fs;
use std::time::Duration;

use crate::config::{GameConfig, StreamingConfig};
use crate::network::dispatcher::Dispatcher;
use crate::network::pipeline::{PipelineConfig, ReliableChunkPipeline};
use crate::network::server::{LocalConnectionPipe, NetworkThreadServerState};
use crate::network::thread::NetworkThread;
use crate::prelude::*;
use crate::voxel::block_registry::BlockRegistry;
use crate::voxel::generator::flat::FlatGenerator;
use crate::voxel::generator::VoxelGenerator;
use crate::voxel::persistence::disk::DiskColumnPersistence;
use crate::voxel::persistence::memory::InMemoryColumnPersistence;
use crate::voxel::persistence::ColumnPersistence;
use crate::voxel::store::ChunkStore;
use crate::worker::codec_pool::CodecPool;
use crate::worker::generator_pool::GeneratorPool;
use crate::world::WorldMetadata;

/// The topmost solid block's global Y coordinate for the flat generator. Not currently exposed
/// through [`GameConfig`]: a world's terrain shape is fixed at creation time via its
/// [`WorldMetadata::spawn_point`], one chunk layer below which the flat generator's surface
/// sits.
fn surface_y_for(world: &WorldMetadata) -> i32 {
    (world.spawn_point.1 as i32) - 1
}

/// The running dedicated server: chunk store, worker pools, and the network thread that drives
/// the connection-accept loop, the message dispatcher, and the reliable chunk pipeline.
pub struct GameServer {
    network_thread: NetworkThread<NetworkThreadServerState>,
    store: Arc<ChunkStore>,
    registry: Arc<BlockRegistry>,
    world: WorldMetadata,
}

impl GameServer {
    /// Builds and starts a server from `config`, persisting world/session state under
    /// `config.streaming.world_root`.
    pub fn new(config: GameConfig) -> Result<Arc<GameServer>> {
        let world_root = config.streaming.world_root.clone();
        fs::create_dir_all(&world_root).with_context(|| format!("creating world root {}", world_root.display()))?;
        let world = WorldMetadata::load_or_create(&world_root, config.streaming.world_height)?;

        let registry = Arc::new(if config.streaming.block_pack_root.is_dir() {
            BlockRegistry::load_from_dir(&config.streaming.block_pack_root)?
        } else {
            BlockRegistry::builtin()
        });

        let generator: Arc<dyn VoxelGenerator> = Arc::new(FlatGenerator::new(surface_y_for(&world), &registry)?);
        let persistence: Arc<dyn ColumnPersistence> = Arc::new(DiskColumnPersistence::new(&world_root));
        let overlay_log_path = world_root.join("overlay.log");
        let store = Arc::new(ChunkStore::with_overlay_log(
            generator.clone(),
            persistence,
            config.streaming.resident_chunk_cap,
            &overlay_log_path,
        )?);

        Self::build(config, world, registry, generator, store)
    }

    /// Builds a server with everything held in memory: no world directory, no overlay log, no
    /// block pack on disk. Intended for tests.
    pub fn new_test() -> Arc<GameServer> {
        Self::new_test_with_streaming(StreamingConfig::default())
    }

    /// Same as [`Self::new_test`], but with a caller-supplied [`StreamingConfig`] instead of its
    /// defaults. Intended for tests that need tight retry/backoff or render-radius timing rather
    /// than the defaults tuned for a real deployment.
    pub fn new_test_with_streaming(streaming: StreamingConfig) -> Arc<GameServer> {
        let mut config = GameConfig { streaming, ..GameConfig::default() };
        config.server.listen_addresses.clear();
        let world = WorldMetadata { world_type: "flat".to_owned(), spawn_point: (0.0, 64.0, 0.0), height: config.streaming.world_height };
        let registry = Arc::new(BlockRegistry::builtin());
        let generator: Arc<dyn VoxelGenerator> = Arc::new(FlatGenerator::new(surface_y_for(&world), &registry).unwrap());
        let persistence: Arc<dyn ColumnPersistence> = Arc::new(InMemoryColumnPersistence::new());
        let store = Arc::new(ChunkStore::new(generator.clone(), persistence, config.streaming.resident_chunk_cap));
        Self::build(config, world, registry, generator, store).expect("in-memory test server should never fail to build")
    }

    fn build(
        config: GameConfig,
        world: WorldMetadata,
        registry: Arc<BlockRegistry>,
        generator: Arc<dyn VoxelGenerator>,
        store: Arc<ChunkStore>,
    ) -> Result<Arc<GameServer>> {
        let generator_pool = Arc::new(GeneratorPool::new(config.streaming.generator_pool_size, config.streaming.worker_queue_depth, generator));
        let codec_pool = Arc::new(CodecPool::new(config.streaming.serializer_pool_size, config.streaming.worker_queue_depth));
        let pipeline = ReliableChunkPipeline::new(
            PipelineConfig::from(&config.streaming),
            store.clone(),
            generator_pool,
            codec_pool,
        );
        let dispatcher = Dispatcher::new(store.clone(), registry.clone(), pipeline, config.streaming.render_radius_chunks);

        let listen_addresses = config.server.listen_addresses.clone();
        let tick_interval = Duration::from_millis(config.streaming.retransmit_tick_ms);
        let network_thread =
            NetworkThread::new(move || NetworkThreadServerState::new(dispatcher, listen_addresses));

        let start_result = network_thread.schedule_task_boxed(Box::new(move |state| {
            let state = Rc::clone(state);
            Box::pin(async move {
                if let Err(e) = NetworkThreadServerState::bootstrap(&state).await {
                    tracing::error!("failed to bootstrap the network listener(s): {e}");
                }
                let mut interval = tokio::time::interval(tick_interval);
                loop {
                    interval.tick().await;
                    state.borrow_mut().tick();
                }
            })
        }));
        start_result.map_err(|e| anyhow!("failed to start the network thread's main loop: {e:?}"))?;

        Ok(Arc::new(Self { network_thread, store, registry, world }))
    }

    /// The chunk store backing this server's world.
    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    /// The block type registry this server was built with.
    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    /// This server's world metadata.
    pub fn world(&self) -> &WorldMetadata {
        &self.world
    }

    /// Checks if the network thread is still alive.
    pub fn is_alive(&self) -> bool {
        self.network_thread.is_alive()
    }

    /// Asynchronously creates a new local (in-process) connection to this server, bypassing the
    /// network entirely. Used by tests and any co-located client.
    pub fn create_local_connection(&self) -> AsyncResult<LocalConnectionPipe> {
        self.network_thread.schedule_task(|state| Box::pin(NetworkThreadServerState::accept_local_connection(Rc::clone(state))))
    }

    /// Performs a clean shutdown of the network thread and waits for it to exit.
    pub fn shutdown(&self) {
        self.network_thread.sync_shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn a_test_server_starts_and_accepts_a_local_connection() {
        let server = GameServer::new_test();
        assert!(server.is_alive());
        let (_peer, _pipe) = server.create_local_connection().blocking_wait().unwrap();
        server.shutdown();
    }
}
