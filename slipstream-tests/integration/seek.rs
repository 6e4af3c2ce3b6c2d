//! Seek semantics: region math, window hand-off, and the one-shot resume
//! publish.

use slipstream_core::config::SlipstreamConfig;
use slipstream_core::engine::{PieceIndex, PiecePriority};
use tokio_test::assert_ok;

use crate::support::{Harness, segments};

#[tokio::test]
async fn seek_into_owned_region_resumes_immediately() {
    let harness = Harness::new(16384, vec![("movie.mp4", 100000)], SlipstreamConfig::default());

    // Activation stalls on the unowned initial window.
    assert_ok!(harness.demux.select_stream(0).await);
    assert_eq!(harness.sink.buffering_levels(0), vec![0]);

    // Pieces past the seek target arrive in the background.
    harness.engine.add_owned([3, 4, 5, 6]);
    assert_ok!(harness.demux.seek(0, 50000, None).await);
    harness.wait_for_eos(0).await;

    // The consumer paused at 0%; the owned target window publishes a
    // one-shot 100 so playback resumes without waiting for piece events.
    assert_eq!(harness.sink.buffering_levels(0), vec![0, 100]);
    assert_eq!(segments(&harness.sink, 0), vec![(50000, 100000)]);
    assert_eq!(
        harness.sink.delivered_bytes(0),
        harness.engine.file_bytes(0)[50000..].to_vec()
    );
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn first_slice_after_seek_is_trimmed_to_the_offset() {
    let harness = Harness::new(16384, vec![("movie.mp4", 100000)], SlipstreamConfig::default());
    harness.engine.add_owned([3, 4, 5, 6]);

    assert_ok!(harness.demux.select_stream(0).await);
    assert_ok!(harness.demux.seek(0, 50000, None).await);
    harness
        .wait_for(|_| !harness.sink.delivered_bytes(0).is_empty())
        .await;

    // Byte 50000 sits 848 bytes into piece 3; the leading bytes of the
    // piece belong to the pre-seek region and must not leak through.
    let piece = harness.engine.piece_bytes(PieceIndex::new(3));
    let first = harness
        .sink
        .events()
        .into_iter()
        .find_map(|(_, event)| match event {
            slipstream_core::streaming::SinkEvent::Data(data) => Some(data),
            _ => None,
        })
        .unwrap();
    assert_eq!(&first[..], &piece[848..]);
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn seek_releases_the_old_window_before_elevating_the_new_one() {
    let harness = Harness::new(16384, vec![("movie.mp4", 100000)], SlipstreamConfig::default());

    assert_ok!(harness.demux.select_stream(0).await);
    harness.engine.add_owned([3, 4, 5, 6]);
    assert_ok!(harness.demux.seek(0, 50000, None).await);
    harness.wait_for_eos(0).await;

    let history = harness.engine.priority_history();
    let expected_prefix = vec![
        (PieceIndex::new(0), PiecePriority::Top),
        (PieceIndex::new(1), PiecePriority::Top),
        (PieceIndex::new(2), PiecePriority::Top),
        (PieceIndex::new(0), PiecePriority::Low),
        (PieceIndex::new(1), PiecePriority::Low),
        (PieceIndex::new(2), PiecePriority::Low),
    ];
    assert_eq!(history[..6], expected_prefix);
    // The seek target window was already owned; nothing past piece 2 is
    // ever elevated.
    assert!(history.iter().all(|(piece, _)| piece.as_u32() <= 2));
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn bounded_seek_stops_at_the_region_end() {
    let harness = Harness::new(16384, vec![("movie.mp4", 100000)], SlipstreamConfig::default());

    assert_ok!(harness.demux.select_stream(0).await);
    harness.engine.add_owned([0, 1, 2, 3, 4, 5, 6]);
    assert_ok!(harness.demux.seek(0, 10000, Some(20000)).await);
    harness.wait_for_eos(0).await;

    assert_eq!(segments(&harness.sink, 0), vec![(10000, 30000)]);
    assert_eq!(
        harness.sink.delivered_bytes(0),
        harness.engine.file_bytes(0)[10000..30000].to_vec()
    );
    harness.demux.shutdown().await;
}
