//! Delivery against a slow, backpressuring consumer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use slipstream_core::config::SlipstreamConfig;
use slipstream_core::engine::SimulatedEngine;
use slipstream_core::streaming::{SegmentRange, SinkError, StreamSink, TorrentDemux};
use tokio_test::assert_ok;

/// Sink whose queue drains at playback speed: every delivery parks the
/// sequencer for a moment before accepting the slice.
struct SlowSink {
    delivered: Mutex<Vec<Bytes>>,
    done: tokio::sync::watch::Sender<bool>,
}

#[async_trait]
impl StreamSink for SlowSink {
    async fn deliver(&self, _file_index: usize, data: Bytes) -> Result<(), SinkError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        tracing::debug!("slow sink accepted {} bytes", data.len());
        self.delivered.lock().push(data);
        Ok(())
    }

    async fn announce_segment(&self, _file_index: usize, _range: SegmentRange) {}

    async fn end_of_stream(&self, _file_index: usize) {
        let _ = self.done.send(true);
    }

    async fn buffering(&self, _file_index: usize, _percent: u8) {}

    async fn error(&self, _file_index: usize, _message: String) {}
}

#[tokio::test]
async fn slow_consumer_still_receives_every_byte_in_order() {
    let (engine, events) = SimulatedEngine::new(16384, vec![("movie.mp4", 100000)]);
    engine.add_owned([0, 1, 2, 3, 4, 5, 6]);
    let (done, mut finished) = tokio::sync::watch::channel(false);
    let sink = Arc::new(SlowSink {
        delivered: Mutex::new(Vec::new()),
        done,
    });
    let demux = TorrentDemux::new(
        engine.clone(),
        sink.clone(),
        events,
        SlipstreamConfig::default(),
    );

    assert_ok!(demux.select_stream(0).await);
    tokio::time::timeout(Duration::from_secs(10), finished.wait_for(|done| *done))
        .await
        .expect("timed out waiting for end of stream")
        .unwrap();

    let slices = sink.delivered.lock().clone();
    let assembled: Vec<u8> = slices
        .iter()
        .flat_map(|slice| slice.iter().copied())
        .collect();
    assert_eq!(assembled, engine.file_bytes(0));
    demux.shutdown().await;
}
