//! Shared helpers for the end-to-end chunk-streaming scenario tests (S3-S6, spec.md §8): wiring
//! a local (in-process) client connection the same way [`vox_server::network::server`]'s own
//! unit tests do, but from outside the crate, through [`vox_server::GameServer`]'s public API.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use vox_server::network::dispatcher::{InboundMessage, OutboundMessage};
use vox_server::network::transport::{read_frame, write_frame, FrameTag};
use vox_server::GameServer;

/// Connects a fresh local client claiming `player_id`, draining the `world_init` frame the
/// server always sends first.
pub fn connect(server: &GameServer, player_id: u64) -> DuplexStream {
    let (_peer, mut client) = server.create_local_connection().blocking_wait().unwrap();
    send_hello(&mut client, player_id);
    let (tag, payload) = read_one_frame(&mut client);
    assert_eq!(tag, FrameTag::Control);
    let message: OutboundMessage = serde_json::from_slice(&payload).unwrap();
    assert!(matches!(message, OutboundMessage::WorldInit { .. }));
    client
}

/// Sends the reconnect-identity handshake that must be the first frame on a new connection.
pub fn send_hello(client: &mut DuplexStream, player_id: u64) {
    send_control(client, &InboundMessage::Hello { player_id });
}

/// Serializes and writes one control-channel message.
pub fn send_control(client: &mut DuplexStream, message: &InboundMessage) {
    futures::executor::block_on(async {
        let payload = serde_json::to_vec(message).unwrap();
        write_frame(client, FrameTag::Control, &payload).await.unwrap();
        client.flush().await.unwrap();
    });
}

/// Blocks for exactly one frame.
pub fn read_one_frame(client: &mut DuplexStream) -> (FrameTag, Vec<u8>) {
    futures::executor::block_on(read_frame(client)).unwrap()
}

/// Reads frames until none arrives within `timeout`, returning every frame seen. Used to collect
/// however many frames a session produces over a bounded window without knowing the exact count
/// ahead of time.
pub fn drain_frames_for(client: &mut DuplexStream, timeout: Duration) -> Vec<(FrameTag, Vec<u8>)> {
    futures::executor::block_on(async {
        let mut frames = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, read_frame(client)).await {
                Ok(Ok(frame)) => frames.push(frame),
                _ => break,
            }
        }
        frames
    })
}

/// A player move control message to `(x, y, z)`.
pub fn player_move(client: &mut DuplexStream, x: f64, y: f64, z: f64) {
    send_control(client, &InboundMessage::PlayerMove { x, y, z });
}
