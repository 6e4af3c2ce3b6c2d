//! Buffering levels climb monotonically as the window fills, and no data
//! flows before the window completes.

use slipstream_core::config::SlipstreamConfig;
use slipstream_core::engine::PieceIndex;
use slipstream_core::streaming::SinkEvent;
use tokio_test::assert_ok;

use crate::support::Harness;

#[tokio::test]
async fn levels_climb_zero_to_hundred_as_pieces_finish() {
    let harness = Harness::new(16384, vec![("movie.mp4", 40000)], SlipstreamConfig::default());

    assert_ok!(harness.demux.select_stream(0).await);
    assert_eq!(harness.sink.buffering_levels(0), vec![0]);

    // Finish the window one piece at a time, waiting for each level to be
    // published so the pump never coalesces two completions into one
    // recompute.
    harness.engine.finish_piece(PieceIndex::new(0));
    harness
        .wait_for(|_| harness.sink.buffering_levels(0).contains(&33))
        .await;
    harness.engine.finish_piece(PieceIndex::new(1));
    harness
        .wait_for(|_| harness.sink.buffering_levels(0).contains(&66))
        .await;
    harness.engine.finish_piece(PieceIndex::new(2));
    harness.wait_for_eos(0).await;

    assert_eq!(harness.sink.buffering_levels(0), vec![0, 33, 66, 100]);
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn no_data_is_delivered_before_the_window_completes() {
    let harness = Harness::new(16384, vec![("movie.mp4", 40000)], SlipstreamConfig::default());

    assert_ok!(harness.demux.select_stream(0).await);
    harness.engine.finish_piece(PieceIndex::new(0));
    harness
        .wait_for(|_| harness.sink.buffering_levels(0).contains(&33))
        .await;
    assert!(harness.sink.delivered_bytes(0).is_empty());

    harness.engine.finish_piece(PieceIndex::new(1));
    harness.engine.finish_piece(PieceIndex::new(2));
    harness.wait_for_eos(0).await;

    let events = harness.sink.events();
    let resume = events
        .iter()
        .position(|(_, event)| matches!(event, SinkEvent::Buffering(100)))
        .unwrap();
    let first_data = events
        .iter()
        .position(|(_, event)| matches!(event, SinkEvent::Data(_)))
        .unwrap();
    assert!(resume < first_data, "the 100% publish must precede delivery");
    assert_eq!(harness.sink.delivered_bytes(0), harness.engine.file_bytes(0));
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn buffering_level_query_tracks_published_levels() {
    let harness = Harness::new(16384, vec![("movie.mp4", 40000)], SlipstreamConfig::default());

    assert_ok!(harness.demux.select_stream(0).await);
    assert_eq!(harness.demux.current_buffering_level(0).unwrap(), 0);

    harness.engine.finish_piece(PieceIndex::new(0));
    harness
        .wait_for(|_| harness.sink.buffering_levels(0).contains(&33))
        .await;
    assert_eq!(harness.demux.current_buffering_level(0).unwrap(), 33);
    harness.demux.shutdown().await;
}
