//! Downstream capability interface for the media pipeline.
//!
//! The scheduler never owns a pipeline object; it drives whatever consumer
//! is wired in through [`StreamSink`]. Implementations are free to block in
//! `deliver` (a media pipeline applying backpressure is the normal case),
//! which is why the sink is the async seam of the crate and is always
//! called outside the per-stream lock.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Byte range of the active region, relative to the stream's own byte
/// space. Announced downstream before the first slice after an activation
/// or seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    /// First byte of the region.
    pub start: u64,
    /// Exclusive end of the region.
    pub end: u64,
}

/// Errors a sink can return from a delivery attempt.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The pipeline is flushing; the same slice may be redelivered once
    /// the flush settles. Transient.
    #[error("downstream is flushing")]
    Flushing,

    /// The consumer disconnected. Permanent for this stream.
    #[error("downstream disconnected")]
    Disconnected,

    /// The consumer rejected the data. Permanent for this stream.
    #[error("downstream rejected delivery: {reason}")]
    Rejected {
        /// Consumer-supplied reason for the rejection.
        reason: String,
    },
}

/// Consumer-facing output surface of the demuxer.
///
/// One sink serves all streams; every call is tagged with the owning
/// stream's file index. Calls for a given stream are strictly ordered.
#[async_trait]
pub trait StreamSink: Send + Sync {
    /// Hands one byte slice downstream. Ownership of the bytes transfers
    /// to the consumer for the duration of the delivery.
    ///
    /// # Errors
    ///
    /// - `SinkError::Flushing` - Transient; the slice will be redelivered
    /// - `SinkError::Disconnected` / `SinkError::Rejected` - Permanent;
    ///   the stream's delivery loop stops
    async fn deliver(&self, file_index: usize, data: Bytes) -> Result<(), SinkError>;

    /// Announces a byte-range discontinuity before the next slice.
    async fn announce_segment(&self, file_index: usize, range: SegmentRange);

    /// Signals that every byte of the active region was delivered.
    async fn end_of_stream(&self, file_index: usize);

    /// Publishes the stream's buffering level (0-100).
    async fn buffering(&self, file_index: usize, percent: u8);

    /// Reports a permanent delivery failure for the stream.
    async fn error(&self, file_index: usize, message: String);
}

/// One observed sink call, for assertions.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    /// `announce_segment` with the announced range.
    Segment(SegmentRange),
    /// `deliver` with the delivered slice.
    Data(Bytes),
    /// `end_of_stream`.
    EndOfStream,
    /// `buffering` with the published level.
    Buffering(u8),
    /// `error` with the reported message.
    Error(String),
}

/// Recording [`StreamSink`] for tests and simulation runs.
///
/// Logs every call tagged with its file index, accumulates delivered
/// bytes per stream, and can inject transient or permanent delivery
/// failures.
pub struct CollectingSink {
    events: parking_lot::Mutex<Vec<(usize, SinkEvent)>>,
    flush_remaining: parking_lot::Mutex<u32>,
    reject: parking_lot::Mutex<bool>,
    version: tokio::sync::watch::Sender<u64>,
}

impl CollectingSink {
    /// Creates an empty sink that accepts everything.
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
            flush_remaining: parking_lot::Mutex::new(0),
            reject: parking_lot::Mutex::new(false),
            version: tokio::sync::watch::channel(0).0,
        }
    }

    /// Fails the next `count` deliveries with `SinkError::Flushing`.
    pub fn flush_next_deliveries(&self, count: u32) {
        *self.flush_remaining.lock() = count;
    }

    /// Fails every further delivery with `SinkError::Rejected`.
    pub fn reject_deliveries(&self) {
        *self.reject.lock() = true;
    }

    /// Snapshot of every observed call, in order.
    pub fn events(&self) -> Vec<(usize, SinkEvent)> {
        self.events.lock().clone()
    }

    /// Concatenation of all bytes delivered to one stream.
    pub fn delivered_bytes(&self, file_index: usize) -> Vec<u8> {
        let events = self.events.lock();
        let mut bytes = Vec::new();
        for (index, event) in events.iter() {
            if *index == file_index
                && let SinkEvent::Data(data) = event
            {
                bytes.extend_from_slice(data);
            }
        }
        bytes
    }

    /// Published buffering levels for one stream, in order.
    pub fn buffering_levels(&self, file_index: usize) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter(|(index, _)| *index == file_index)
            .filter_map(|(_, event)| match event {
                SinkEvent::Buffering(level) => Some(*level),
                _ => None,
            })
            .collect()
    }

    /// Waits until the predicate holds over a snapshot of the event log.
    ///
    /// The log's lock is not held while the predicate runs, so predicates
    /// are free to call back into the sink's own accessors.
    pub async fn wait_until(&self, predicate: impl Fn(&[(usize, SinkEvent)]) -> bool) {
        let mut version = self.version.subscribe();
        loop {
            let snapshot = self.events.lock().clone();
            if predicate(&snapshot) {
                return;
            }
            if version.changed().await.is_err() {
                return;
            }
        }
    }

    fn record(&self, file_index: usize, event: SinkEvent) {
        self.events.lock().push((file_index, event));
        self.version.send_modify(|value| *value += 1);
    }
}

impl Default for CollectingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamSink for CollectingSink {
    async fn deliver(&self, file_index: usize, data: Bytes) -> Result<(), SinkError> {
        {
            let mut remaining = self.flush_remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SinkError::Flushing);
            }
        }
        if *self.reject.lock() {
            return Err(SinkError::Rejected {
                reason: "injected rejection".to_string(),
            });
        }
        self.record(file_index, SinkEvent::Data(data));
        Ok(())
    }

    async fn announce_segment(&self, file_index: usize, range: SegmentRange) {
        self.record(file_index, SinkEvent::Segment(range));
    }

    async fn end_of_stream(&self, file_index: usize) {
        self.record(file_index, SinkEvent::EndOfStream);
    }

    async fn buffering(&self, file_index: usize, percent: u8) {
        self.record(file_index, SinkEvent::Buffering(percent));
    }

    async fn error(&self, file_index: usize, message: String) {
        self.record(file_index, SinkEvent::Error(message));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn wait_until_predicate_may_query_the_sink() {
        let sink = Arc::new(CollectingSink::new());
        let background = sink.clone();
        let publisher = tokio::spawn(async move {
            background.buffering(0, 50).await;
        });

        // The predicate ignores its snapshot and re-queries the sink; the
        // event log's lock must not be held across the call.
        sink.wait_until(|_| sink.buffering_levels(0).contains(&50))
            .await;

        publisher.await.unwrap();
        assert_eq!(sink.buffering_levels(0), vec![50]);
    }

    #[tokio::test]
    async fn injected_flushing_failures_are_consumed() {
        let sink = CollectingSink::new();
        sink.flush_next_deliveries(1);

        assert!(matches!(
            sink.deliver(0, bytes::Bytes::from_static(b"x")).await,
            Err(SinkError::Flushing)
        ));
        assert!(sink.deliver(0, bytes::Bytes::from_static(b"x")).await.is_ok());
        assert_eq!(sink.delivered_bytes(0), b"x");
    }
}
