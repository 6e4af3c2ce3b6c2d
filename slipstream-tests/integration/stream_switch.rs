//! Switching the requested stream mid-playback.

use slipstream_core::config::SlipstreamConfig;
use slipstream_core::engine::{PieceIndex, PiecePriority};
use slipstream_core::streaming::StreamState;
use tokio_test::assert_ok;

use crate::support::{Harness, slice_sizes};

fn two_file_harness() -> Harness {
    // Two five-piece files: a.mp4 spans pieces 0-4, b.mp4 spans 5-9.
    Harness::new(
        16384,
        vec![("a.mp4", 16384 * 5), ("b.mp4", 16384 * 5)],
        SlipstreamConfig::default(),
    )
}

#[tokio::test]
async fn switch_releases_the_old_window_and_starts_the_new_stream() {
    let harness = two_file_harness();
    harness.engine.add_owned([0, 1, 2, 5, 6, 7]);

    // Stream a.mp4 until it exhausts its owned pieces and stalls
    // buffering on pieces 3 and 4.
    assert_ok!(harness.demux.select_stream(0).await);
    harness
        .wait_for(|_| {
            slice_sizes(&harness.sink, 0).len() == 3
                && harness.sink.buffering_levels(0) == vec![0]
        })
        .await;

    assert_ok!(harness.demux.select_stream(1).await);
    harness
        .wait_for(|_| !slice_sizes(&harness.sink, 1).is_empty())
        .await;

    // The stalled window fell back to Low; b.mp4's owned window was never
    // elevated at all.
    let history = harness.engine.priority_history();
    assert_eq!(
        history[..4],
        vec![
            (PieceIndex::new(3), PiecePriority::Top),
            (PieceIndex::new(4), PiecePriority::Top),
            (PieceIndex::new(3), PiecePriority::Low),
            (PieceIndex::new(4), PiecePriority::Low),
        ]
    );
    assert!(
        !history
            .iter()
            .any(|(piece, priority)| (5..8).contains(&piece.as_u32())
                && *priority == PiecePriority::Top)
    );

    // b.mp4 is piece-aligned, so its first slice is a full piece.
    let first = harness.sink.delivered_bytes(1);
    assert_eq!(&first[..16384], &harness.engine.piece_bytes(PieceIndex::new(5))[..]);
    assert_eq!(harness.demux.stream_state(0).unwrap(), StreamState::Aborted);
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn switched_away_stream_receives_no_further_data() {
    let harness = two_file_harness();
    harness.engine.add_owned([0, 1, 2, 5, 6, 7, 8, 9]);

    assert_ok!(harness.demux.select_stream(0).await);
    harness
        .wait_for(|_| slice_sizes(&harness.sink, 0).len() == 3)
        .await;
    assert_ok!(harness.demux.select_stream(1).await);
    harness.wait_for_eos(1).await;

    // Pieces 3 and 4 finishing after the switch must not revive stream 0.
    harness.engine.finish_piece(PieceIndex::new(3));
    harness.engine.finish_piece(PieceIndex::new(4));
    harness.wait_for_eos(1).await;

    assert_eq!(slice_sizes(&harness.sink, 0).len(), 3);
    assert_eq!(harness.sink.delivered_bytes(1), harness.engine.file_bytes(1));
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn reselecting_the_same_stream_restarts_from_the_beginning() {
    let harness = Harness::new(16384, vec![("a.mp4", 40000)], SlipstreamConfig::default());
    harness.engine.add_owned([0, 1, 2]);

    assert_ok!(harness.demux.select_stream(0).await);
    harness.wait_for_eos(0).await;
    assert_ok!(harness.demux.select_stream(0).await);
    harness
        .wait_for(|events| {
            events
                .iter()
                .filter(|(_, event)| {
                    matches!(event, slipstream_core::streaming::SinkEvent::EndOfStream)
                })
                .count()
                == 2
        })
        .await;

    // The whole file was delivered twice, with a fresh segment each time.
    assert_eq!(
        harness.sink.delivered_bytes(0).len(),
        harness.engine.file_bytes(0).len() * 2
    );
    assert_eq!(crate::support::segments(&harness.sink, 0), vec![(0, 40000), (0, 40000)]);
    harness.demux.shutdown().await;
}
