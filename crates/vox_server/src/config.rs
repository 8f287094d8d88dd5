//! Game configuration handling

use std::net::SocketAddr;
use std::path::PathBuf;

use smart_default::SmartDefault;

/// The server-specific configuration.
#[derive(Clone, Eq, PartialEq, Debug, SmartDefault)]
pub struct ServerConfig {
    /// The server name, as advertised to clients on the server list.
    #[default = "Voxedge Server"]
    pub server_title: String,
    /// The maximum number of players allowed to join the server.
    #[default = 16]
    pub max_players: u32,
    /// The network IPs and ports to listen on.
    #[default(default_listen_addresses())]
    pub listen_addresses: Vec<SocketAddr>,
}

/// Tuning knobs for the reliable chunk pipeline (C5/C6) and the worker pools (C4).
#[derive(Clone, Eq, PartialEq, Debug, SmartDefault)]
pub struct StreamingConfig {
    /// Initial retransmit timeout for an outstanding, unacknowledged chunk frame.
    #[default = 80]
    pub chunk_ack_timeout_ms: u64,
    /// Number of send attempts (including the first) before an outstanding entry is dropped.
    #[default = 4]
    pub chunk_max_retries: u32,
    /// Ceiling applied to the exponential retransmit backoff.
    #[default = 2000]
    pub chunk_max_backoff_ms: u64,
    /// Resolution of the per-session retransmit tick.
    #[default = 20]
    pub retransmit_tick_ms: u64,
    /// Chunk-space radius (in chunks) around a player's position kept streamed.
    #[default = 8]
    pub render_radius_chunks: i32,
    /// Maximum number of outstanding (unacknowledged) frames per session.
    #[default = 32]
    pub window_size: usize,
    /// LRU cap for the chunk store's resident set on disk-backed worlds.
    #[default = 256]
    pub resident_chunk_cap: usize,
    /// Number of generator worker threads.
    #[default(default_pool_size(1))]
    pub generator_pool_size: usize,
    /// Number of serializer worker threads.
    #[default(default_pool_size(2))]
    pub serializer_pool_size: usize,
    /// Bounded queue depth of each worker pool before submissions fail with "queue full".
    #[default = 256]
    pub worker_queue_depth: usize,
    /// Batching interval for debounced session persistence writes.
    #[default = 50]
    pub session_persist_debounce_ms: u64,
    /// Filesystem path for the block type registry directory tree.
    #[default(PathBuf::from("blocks"))]
    pub block_pack_root: PathBuf,
    /// Filesystem root under which world and session state are stored.
    #[default(PathBuf::from("world"))]
    pub world_root: PathBuf,
    /// World height in blocks, bounding vertical chunk coordinates.
    #[default = 256]
    pub world_height: i32,
}

/// All game configuration saved into the config file.
#[derive(Clone, Eq, PartialEq, Debug, SmartDefault)]
pub struct GameConfig {
    /// Server configuration.
    pub server: ServerConfig,
    /// Chunk streaming/worker pool configuration.
    pub streaming: StreamingConfig,
}

fn default_listen_addresses() -> Vec<SocketAddr> {
    vec!["0.0.0.0:28032".parse().unwrap(), "[::]:28032".parse().unwrap()]
}

fn default_pool_size(reserved: usize) -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .saturating_sub(reserved)
        .max(1)
}
