//! S5 (spec.md §8): a block edit must re-send the edited chunk and its face-adjacent neighbors to
//! every connected client, but never a diagonal neighbor that the edit never touched.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use vox_schemas::codec::decode_chunk_frame;
use vox_server::config::StreamingConfig;
use vox_server::network::dispatcher::InboundMessage;
use vox_server::network::transport::FrameTag;
use vox_server::GameServer;

fn chunk_keys_seen(client: &mut tokio::io::DuplexStream, timeout: Duration) -> HashSet<(i32, i32, i32)> {
    common::drain_frames_for(client, timeout)
        .into_iter()
        .filter(|(tag, _)| *tag == FrameTag::ChunkFull)
        .map(|(_, payload)| {
            let f = decode_chunk_frame(&payload).unwrap();
            (f.cx, f.cy, f.cz)
        })
        .collect()
}

#[test]
fn editing_a_boundary_voxel_resends_the_chunk_and_its_face_neighbors_only() {
    let server = GameServer::new_test_with_streaming(StreamingConfig {
        chunk_ack_timeout_ms: 500,
        chunk_max_retries: 5,
        chunk_max_backoff_ms: 1000,
        retransmit_tick_ms: 20,
        render_radius_chunks: 1,
        ..StreamingConfig::default()
    });

    let mut client_a = common::connect(&server, 10);
    let mut client_b = common::connect(&server, 20);

    // Y=8 lands in chunk-y 0 (div_euclid(8, 16) == 0), matching the edited chunk (0,0,0) below.
    common::player_move(&mut client_a, 0.0, 8.0, 0.0);
    common::player_move(&mut client_b, 0.0, 8.0, 0.0);

    // Drain and ack the initial render-radius-1 burst (27 chunks) from both clients so the
    // edit-triggered resend isn't suppressed by propagate_edit's already-outstanding check.
    for client in [&mut client_a, &mut client_b] {
        let initial = common::drain_frames_for(client, Duration::from_millis(400));
        let seqs: Vec<u32> = initial
            .iter()
            .filter(|(tag, _)| *tag == FrameTag::ChunkFull)
            .map(|(_, payload)| decode_chunk_frame(payload).unwrap().seq)
            .collect();
        assert!(!seqs.is_empty(), "initial burst must have sent at least one chunk");
        common::send_control(client, &InboundMessage::ChunkHave { seqs });
    }
    std::thread::sleep(Duration::from_millis(60)); // let both acks land before the edit

    // x=15, z=8 is the +x boundary voxel of chunk (0,0,0): div_euclid(15, 16) == 0, one voxel
    // away from chunk (1,0,0). Breaking it must bump (0,0,0) and its face neighbors, including
    // (1,0,0), but never the diagonal (1,1,0).
    common::send_control(&mut client_a, &InboundMessage::BreakBlock { x: 15, y: 8, z: 8 });

    let seen_a = chunk_keys_seen(&mut client_a, Duration::from_millis(400));
    let seen_b = chunk_keys_seen(&mut client_b, Duration::from_millis(400));

    for (who, seen) in [("a", &seen_a), ("b", &seen_b)] {
        assert!(seen.contains(&(0, 0, 0)), "client {who} never received the edited chunk: {seen:?}");
        assert!(seen.contains(&(1, 0, 0)), "client {who} never received the face-adjacent neighbor: {seen:?}");
        assert!(!seen.contains(&(1, 1, 0)), "client {who} received a diagonal neighbor the edit never touched: {seen:?}");
    }

    server.shutdown();
}
