//! Two files sharing a boundary piece must each receive exactly their own
//! bytes of it.

use slipstream_core::config::SlipstreamConfig;
use slipstream_core::streaming::SinkEvent;
use tokio_test::assert_ok;

use crate::support::{Harness, segments, slice_sizes};

/// a.mp4 ends 7232 bytes into piece 2 and b.mp4 starts right there, so
/// piece 2 belongs to both streams.
fn boundary_harness() -> Harness {
    Harness::new(
        16384,
        vec![("a.mp4", 40000), ("b.mp4", 30000)],
        SlipstreamConfig::default(),
    )
}

#[tokio::test]
async fn each_stream_reconstructs_its_own_bytes() {
    let harness = boundary_harness();
    harness.engine.add_owned([0, 1, 2, 3, 4]);

    assert_ok!(harness.demux.select_stream(0).await);
    harness.wait_for_eos(0).await;
    assert_ok!(harness.demux.select_stream(1).await);
    harness.wait_for_eos(1).await;

    assert_eq!(harness.sink.delivered_bytes(0), harness.engine.file_bytes(0));
    assert_eq!(harness.sink.delivered_bytes(1), harness.engine.file_bytes(1));
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn boundary_piece_is_split_without_gap_or_overlap() {
    let harness = boundary_harness();
    harness.engine.add_owned([0, 1, 2, 3, 4]);

    assert_ok!(harness.demux.select_stream(0).await);
    harness.wait_for_eos(0).await;
    assert_ok!(harness.demux.select_stream(1).await);
    harness.wait_for_eos(1).await;

    // a.mp4's final slice and b.mp4's first slice partition piece 2 at
    // byte 7232.
    assert_eq!(slice_sizes(&harness.sink, 0), vec![16384, 16384, 7232]);
    assert_eq!(slice_sizes(&harness.sink, 1), vec![9152, 16384, 4464]);
    assert_eq!(segments(&harness.sink, 0), vec![(0, 40000)]);
    assert_eq!(segments(&harness.sink, 1), vec![(0, 30000)]);
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn second_stream_keeps_its_own_byte_space_after_switch() {
    let harness = boundary_harness();
    harness.engine.add_owned([0, 1, 2, 3, 4]);

    assert_ok!(harness.demux.select_stream(1).await);
    harness.wait_for_eos(1).await;

    // b.mp4's ranges are relative to its own start, not the torrent's.
    let has_cross_file_segment = harness
        .sink
        .events()
        .iter()
        .any(|(_, event)| matches!(event, SinkEvent::Segment(range) if range.end > 30000));
    assert!(!has_cross_file_segment);
    assert_eq!(harness.sink.delivered_bytes(1), harness.engine.file_bytes(1));
    harness.demux.shutdown().await;
}
