//! Return-to-start tail policy: a player probing trailing metadata before
//! any data was delivered gets the tail, then playback restarts from the
//! beginning without an end-of-stream in between.

use slipstream_core::config::{SlipstreamConfig, TailPolicy};
use slipstream_core::engine::PieceIndex;
use slipstream_core::streaming::SinkEvent;
use tokio_test::assert_ok;

use crate::support::{Harness, segments, slice_sizes};

#[tokio::test]
async fn tail_fetch_delivers_the_tail_then_restarts_from_zero() {
    let harness = Harness::new(
        16384,
        vec![("movie.mp4", 40000)],
        SlipstreamConfig::for_testing(),
    );

    assert_ok!(harness.demux.select_stream(0).await);
    // The player probes the trailing 4000 bytes before playback started.
    assert_ok!(harness.demux.seek(0, 36000, None).await);
    harness.engine.finish_piece(PieceIndex::new(2));

    // The tail slice arrives, then the region silently resets to the full
    // file and stalls buffering on pieces 0 and 1.
    harness
        .wait_for(|_| slice_sizes(&harness.sink, 0) == vec![4000])
        .await;
    harness
        .wait_for(|_| harness.sink.buffering_levels(0) == vec![0, 0, 100, 0])
        .await;

    harness.engine.finish_piece(PieceIndex::new(0));
    harness
        .wait_for(|_| harness.sink.buffering_levels(0).contains(&50))
        .await;
    harness.engine.finish_piece(PieceIndex::new(1));
    harness.wait_for_eos(0).await;

    assert_eq!(segments(&harness.sink, 0), vec![(36000, 40000), (0, 40000)]);
    assert_eq!(slice_sizes(&harness.sink, 0), vec![4000, 16384, 16384, 7232]);

    let file = harness.engine.file_bytes(0);
    let delivered = harness.sink.delivered_bytes(0);
    assert_eq!(&delivered[..4000], &file[36000..]);
    assert_eq!(&delivered[4000..], &file[..]);

    // Exactly one end-of-stream, after the restart finished.
    let eos_count = harness
        .sink
        .events()
        .iter()
        .filter(|(_, event)| matches!(event, SinkEvent::EndOfStream))
        .count();
    assert_eq!(eos_count, 1);
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn disabled_policy_ends_the_stream_at_the_tail() {
    let mut config = SlipstreamConfig::default();
    config.buffering.tail_policy = TailPolicy::Disabled;
    let harness = Harness::new(16384, vec![("movie.mp4", 40000)], config);
    harness.engine.add_owned([2]);

    assert_ok!(harness.demux.select_stream(0).await);
    assert_ok!(harness.demux.seek(0, 36000, None).await);
    harness.wait_for_eos(0).await;

    // Without the policy the tail region is an ordinary bounded seek.
    assert_eq!(slice_sizes(&harness.sink, 0), vec![4000]);
    assert_eq!(segments(&harness.sink, 0), vec![(36000, 40000)]);
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn mid_playback_seek_to_the_tail_is_not_a_metadata_fetch() {
    let harness = Harness::new(
        16384,
        vec![("movie.mp4", 16384 * 5)],
        SlipstreamConfig::for_testing(),
    );
    harness.engine.add_owned([0, 1, 2]);

    // Play until the stream stalls buffering on pieces 3 and 4; data has
    // provably flowed by then.
    assert_ok!(harness.demux.select_stream(0).await);
    harness
        .wait_for(|_| {
            slice_sizes(&harness.sink, 0).len() == 3
                && harness.sink.buffering_levels(0) == vec![0]
        })
        .await;

    // A tail seek now is a real user seek: it ends the stream at the
    // file's end instead of looping back to byte zero.
    assert_ok!(harness.demux.seek(0, 70000, None).await);
    harness.engine.finish_piece(PieceIndex::new(4));
    harness.wait_for_eos(0).await;

    assert_eq!(
        segments(&harness.sink, 0),
        vec![(0, 16384 * 5), (70000, 16384 * 5)]
    );
    assert_eq!(slice_sizes(&harness.sink, 0).last(), Some(&11920));
    let eos_count = harness
        .sink
        .events()
        .iter()
        .filter(|(_, event)| matches!(event, SinkEvent::EndOfStream))
        .count();
    assert_eq!(eos_count, 1);
    harness.demux.shutdown().await;
}
