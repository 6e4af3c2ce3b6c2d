//! Linear playback of a fully downloaded file.

use proptest::prelude::*;
use slipstream_core::config::SlipstreamConfig;
use slipstream_core::engine::PieceSource;
use slipstream_core::streaming::SinkEvent;
use tokio_test::assert_ok;

use crate::support::{Harness, segments, slice_sizes};

#[tokio::test]
async fn owned_file_streams_start_to_finish() {
    let harness = Harness::new(16384, vec![("movie.mp4", 40000)], SlipstreamConfig::default());
    harness.engine.add_owned([0, 1, 2]);

    assert_ok!(harness.demux.select_stream(0).await);
    harness.wait_for_eos(0).await;

    // Two full pieces plus the trimmed final piece cover exactly 40000
    // bytes; the final piece's file-external tail is never delivered.
    assert_eq!(slice_sizes(&harness.sink, 0), vec![16384, 16384, 7232]);
    assert_eq!(harness.sink.delivered_bytes(0), harness.engine.file_bytes(0));
    assert_eq!(segments(&harness.sink, 0), vec![(0, 40000)]);
    harness.demux.shutdown().await;
}

#[tokio::test]
async fn segment_precedes_the_first_slice() {
    let harness = Harness::new(16384, vec![("movie.mp4", 40000)], SlipstreamConfig::default());
    harness.engine.add_owned([0, 1, 2]);

    assert_ok!(harness.demux.select_stream(0).await);
    harness.wait_for_eos(0).await;

    let events = harness.sink.events();
    let first_segment = events
        .iter()
        .position(|(_, event)| matches!(event, SinkEvent::Segment(_)))
        .unwrap();
    let first_data = events
        .iter()
        .position(|(_, event)| matches!(event, SinkEvent::Data(_)))
        .unwrap();
    assert!(first_segment < first_data);
    harness.demux.shutdown().await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Any fully owned single-file torrent reconstructs exactly, whatever
    /// the piece length and file size.
    #[test]
    fn any_owned_file_reconstructs_exactly(
        piece_length in 1024u64..8192,
        file_size in 1u64..40000,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let harness = Harness::new(
                piece_length,
                vec![("f.bin", file_size)],
                SlipstreamConfig::default(),
            );
            let piece_count = harness.engine.file_layout().piece_count();
            harness.engine.add_owned(0..piece_count);

            harness.demux.select_stream(0).await.unwrap();
            harness.wait_for_eos(0).await;

            assert_eq!(harness.sink.delivered_bytes(0), harness.engine.file_bytes(0));
            harness.demux.shutdown().await;
        });
    }
}
