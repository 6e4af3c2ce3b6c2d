//! Removing the torrent aborts every stream without an end-of-stream.

use std::time::Duration;

use slipstream_core::config::SlipstreamConfig;
use slipstream_core::engine::{EngineError, PieceIndex, PieceSource};
use slipstream_core::streaming::{SinkEvent, StreamState};
use tokio_test::assert_ok;

use crate::support::Harness;

async fn wait_for_abort(harness: &Harness, file_index: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.demux.stream_state(file_index).unwrap() != StreamState::Aborted {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("stream must abort after torrent removal");
}

#[tokio::test]
async fn removal_mid_buffering_aborts_silently() {
    let harness = Harness::new(16384, vec![("movie.mp4", 40000)], SlipstreamConfig::default());

    assert_ok!(harness.demux.select_stream(0).await);
    assert_eq!(harness.sink.buffering_levels(0), vec![0]);

    harness.engine.remove_torrent();
    wait_for_abort(&harness, 0).await;

    // Abort is distinguishable from completion: no EOS, no data.
    let events = harness.sink.events();
    assert!(
        !events
            .iter()
            .any(|(_, event)| matches!(event, SinkEvent::EndOfStream))
    );
    assert!(harness.sink.delivered_bytes(0).is_empty());
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn removal_aborts_every_stream_not_just_the_requested_one() {
    let harness = Harness::new(
        16384,
        vec![("a.mp4", 16384 * 5), ("b.mp4", 16384 * 5)],
        SlipstreamConfig::default(),
    );

    assert_ok!(harness.demux.select_stream(0).await);
    harness.engine.remove_torrent();
    wait_for_abort(&harness, 0).await;
    wait_for_abort(&harness, 1).await;

    assert!(matches!(
        harness.engine.read_piece(PieceIndex::new(0)),
        Err(EngineError::Shutdown)
    ));
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn removal_after_eos_keeps_the_finished_state() {
    let harness = Harness::new(16384, vec![("movie.mp4", 40000)], SlipstreamConfig::default());
    harness.engine.add_owned([0, 1, 2]);

    assert_ok!(harness.demux.select_stream(0).await);
    harness.wait_for_eos(0).await;
    harness.engine.remove_torrent();

    // The pump tears down, but a stream that already finished stays Eos.
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.demux.stream_state(0).unwrap() != StreamState::Eos {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("finished stream must keep its Eos state");
    harness.demux.shutdown().await;
    assert_eq!(harness.demux.stream_state(0).unwrap(), StreamState::Eos);
}
