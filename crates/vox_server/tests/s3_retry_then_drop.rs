//! S3 (spec.md §8): retry then drop. A client that never acknowledges a chunk frame must see it
//! retransmitted a bounded number of times, then stop arriving at all once the pipeline gives up.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use vox_schemas::codec::decode_chunk_frame;
use vox_server::config::StreamingConfig;
use vox_server::network::transport::FrameTag;
use vox_server::GameServer;

#[test]
fn a_chunk_never_acked_is_retried_then_dropped() {
    let server = GameServer::new_test_with_streaming(StreamingConfig {
        chunk_ack_timeout_ms: 30,
        chunk_max_retries: 3,
        chunk_max_backoff_ms: 60,
        retransmit_tick_ms: 10,
        render_radius_chunks: 0,
        ..StreamingConfig::default()
    });
    let mut client = common::connect(&server, 1);
    common::player_move(&mut client, 0.0, 64.0, 0.0);

    // One chunk (radius 0) is sent, retried up to `chunk_max_retries` times without being acked,
    // then dropped from `outstanding`. It's still wanted, so the pipeline re-queues it under a
    // fresh sequence number rather than leaving the client permanently missing it — over a long
    // enough window that shows up as more than one distinct seq for the same chunk key, each
    // retried no more than `chunk_max_retries` times.
    let frames = common::drain_frames_for(&mut client, Duration::from_millis(800));
    let chunk_frames: Vec<_> = frames
        .into_iter()
        .filter(|(tag, _)| *tag == FrameTag::ChunkFull)
        .map(|(_, payload)| decode_chunk_frame(&payload).unwrap())
        .collect();
    assert!(!chunk_frames.is_empty(), "the initial send must have reached the transport");
    assert!(
        chunk_frames.iter().all(|f| f.cx == 0 && f.cy == 4 && f.cz == 0),
        "only the one in-range chunk should ever be sent"
    );

    let mut by_seq: HashMap<u32, usize> = HashMap::new();
    for f in &chunk_frames {
        *by_seq.entry(f.seq).or_insert(0) += 1;
    }
    assert!(
        by_seq.values().all(|&n| n <= 3),
        "a seq must never be retried more than chunk_max_retries times before being dropped: {by_seq:?}"
    );
    assert!(
        by_seq.len() >= 2,
        "a dropped-but-still-wanted chunk must reappear under a fresh seq, only saw {by_seq:?}"
    );

    server.shutdown();
}
