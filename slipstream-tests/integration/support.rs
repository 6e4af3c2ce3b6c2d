//! Shared harness for the integration scenarios.

use std::sync::Arc;
use std::time::Duration;

use slipstream_core::config::SlipstreamConfig;
use slipstream_core::engine::SimulatedEngine;
use slipstream_core::streaming::{CollectingSink, SinkEvent, TorrentDemux};
use slipstream_core::tracing_setup::init_test_tracing;

/// A simulated engine wired into a demuxer with a recording sink.
pub struct Harness {
    pub engine: Arc<SimulatedEngine>,
    pub sink: Arc<CollectingSink>,
    pub demux: TorrentDemux,
}

impl Harness {
    /// Builds the full stack over `(path, size)` files.
    pub fn new(
        piece_length: u64,
        files: Vec<(&'static str, u64)>,
        config: SlipstreamConfig,
    ) -> Self {
        init_test_tracing();
        let (engine, events) = SimulatedEngine::new(piece_length, files);
        let sink = Arc::new(CollectingSink::new());
        let demux = TorrentDemux::new(engine.clone(), sink.clone(), events, config);
        Self {
            engine,
            sink,
            demux,
        }
    }

    /// Waits for the sink log to satisfy a predicate, failing the test
    /// after five seconds rather than hanging.
    pub async fn wait_for(&self, predicate: impl Fn(&[(usize, SinkEvent)]) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), self.sink.wait_until(predicate))
            .await
            .expect("timed out waiting for sink events");
    }

    /// Waits until the given stream signaled end-of-stream.
    pub async fn wait_for_eos(&self, file_index: usize) {
        self.wait_for(|events| {
            events
                .iter()
                .any(|(index, event)| *index == file_index && matches!(event, SinkEvent::EndOfStream))
        })
        .await;
    }
}

/// Lengths of the slices delivered to one stream, in order.
pub fn slice_sizes(sink: &CollectingSink, file_index: usize) -> Vec<usize> {
    sink.events()
        .iter()
        .filter(|(index, _)| *index == file_index)
        .filter_map(|(_, event)| match event {
            SinkEvent::Data(data) => Some(data.len()),
            _ => None,
        })
        .collect()
}

/// Segment ranges announced to one stream, in order.
pub fn segments(sink: &CollectingSink, file_index: usize) -> Vec<(u64, u64)> {
    sink.events()
        .iter()
        .filter(|(index, _)| *index == file_index)
        .filter_map(|(_, event)| match event {
            SinkEvent::Segment(range) => Some((range.start, range.end)),
            _ => None,
        })
        .collect()
}
