//! Stream switch controller and alert pump.
//!
//! [`TorrentDemux`] is the single entry point the player-facing layer
//! talks to: it owns one descriptor per file, routes engine completion
//! events, transitions the `requested` flag between streams, and handles
//! seeks. All engine events funnel through one pump task and a closed
//! [`EngineEvent`] dispatch; all per-stream mutation happens inside that
//! stream's critical section, which is never held across a blocking call.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{SlipstreamConfig, TailPolicy};
use crate::engine::{EngineError, EngineEvent, FileLayout, PieceIndex, PieceSource};
use crate::streaming::buffer::{PublishAction, WindowManager, publish_action};
use crate::streaming::descriptor::{StreamDescriptor, StreamState};
use crate::streaming::sequencer::{self, DeliveryHandle, PieceRead};
use crate::streaming::sink::StreamSink;

/// Errors surfaced by the consumer-facing demuxer commands.
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    #[error("no stream for file index {file_index}")]
    UnknownStream { file_index: usize },

    #[error("stream {file_index} is not the requested stream")]
    StreamNotRequested { file_index: usize },

    #[error("invalid seek on stream {file_index}: {reason}")]
    InvalidSeek { file_index: usize, reason: String },

    #[error("engine error")]
    Engine(#[from] EngineError),
}

struct Shared {
    source: Arc<dyn PieceSource>,
    sink: Arc<dyn StreamSink>,
    window: WindowManager,
    config: SlipstreamConfig,
    streams: Vec<Arc<Mutex<StreamDescriptor>>>,
    handles: Mutex<Vec<Option<DeliveryHandle>>>,
}

/// The piece-buffering and stream-switching scheduler for one torrent.
///
/// Constructed once the torrent's file layout is known; destroyed with the
/// torrent. Exactly one stream is `requested` at a time; switching and
/// seeking re-initialize the window, the sequencer, and the buffering
/// state for the new target.
pub struct TorrentDemux {
    shared: Arc<Shared>,
    layout: FileLayout,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl TorrentDemux {
    /// Builds descriptors from the engine's file layout and starts the
    /// alert pump on the given completion-event channel.
    pub fn new(
        source: Arc<dyn PieceSource>,
        sink: Arc<dyn StreamSink>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
        config: SlipstreamConfig,
    ) -> Self {
        let layout = source.file_layout();
        let streams = (0..layout.files.len())
            .map(|file_index| Arc::new(Mutex::new(StreamDescriptor::new(&layout, file_index))))
            .collect::<Vec<_>>();
        let handles = Mutex::new((0..streams.len()).map(|_| None).collect());
        let shared = Arc::new(Shared {
            source,
            sink,
            window: WindowManager::new(config.buffering.window_size),
            config,
            streams,
            handles,
        });
        let pump = tokio::spawn(pump(shared.clone(), events));
        Self {
            shared,
            layout,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Number of streams (files) in the torrent.
    pub fn stream_count(&self) -> usize {
        self.shared.streams.len()
    }

    /// The torrent's static file layout.
    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    /// Selects the file to play, deactivating every other stream.
    ///
    /// The old stream's window priorities are released, its delivery task
    /// is stopped and joined, then the target is activated over its full
    /// byte range. When the initial window is already owned the first read
    /// is issued immediately; otherwise the 0% level is published and
    /// completion events drive the rest.
    ///
    /// # Errors
    ///
    /// - `DemuxError::UnknownStream` - File index outside the layout
    /// - `DemuxError::Engine` - The engine rejected the initial read
    pub async fn select_stream(&self, file_index: usize) -> Result<(), DemuxError> {
        if file_index >= self.shared.streams.len() {
            return Err(DemuxError::UnknownStream { file_index });
        }
        info!("selecting stream {file_index}");

        for (index, descriptor) in self.shared.streams.iter().enumerate() {
            if index == file_index {
                continue;
            }
            let handle = {
                let mut descriptor = descriptor.lock();
                if descriptor.requested {
                    descriptor.requested = false;
                    descriptor.buffering = false;
                    descriptor.bump_generation();
                    self.shared.window.release(&descriptor, &*self.shared.source);
                }
                self.shared.handles.lock()[index].take()
            };
            if let Some(handle) = handle {
                handle.shutdown().await;
            }
        }

        // A re-select of the same stream restarts its delivery task.
        let stale = self.shared.handles.lock()[file_index].take();
        if let Some(handle) = stale {
            handle.shutdown().await;
        }

        let descriptor = &self.shared.streams[file_index];
        let empty = {
            let mut descriptor = descriptor.lock();
            if descriptor.file_size() == 0 {
                descriptor.finished = true;
                descriptor.state = StreamState::Eos;
                true
            } else {
                false
            }
        };
        if empty {
            // A zero-byte file has nothing to deliver; complete it on the
            // spot instead of spawning a delivery task.
            self.shared.sink.end_of_stream(file_index).await;
            return Ok(());
        }

        let (buffering, first_piece) = {
            let mut descriptor = descriptor.lock();
            // Layout is static, but the region may have drifted from an
            // earlier seek; recompute defensively.
            descriptor.reset_region();
            descriptor.requested = true;
            descriptor.pending_segment = true;
            descriptor.finished = false;
            descriptor.state = StreamState::Activated;
            descriptor.bump_generation();
            let buffering = self
                .shared
                .window
                .activate(&mut descriptor, &*self.shared.source);
            (buffering, descriptor.next_piece())
        };

        let handle = sequencer::spawn(
            file_index,
            descriptor.clone(),
            self.shared.source.clone(),
            self.shared.sink.clone(),
            self.shared.window,
            self.shared.config.delivery.clone(),
        );
        self.shared.handles.lock()[file_index] = Some(handle);

        if buffering {
            self.shared.sink.buffering(file_index, 0).await;
        } else {
            self.shared.source.read_piece(first_piece)?;
        }
        Ok(())
    }

    /// Seeks within the requested stream to `[byte_offset, byte_offset +
    /// byte_len)` in the stream's own byte space; `None` runs to the end
    /// of the file.
    ///
    /// Old window priorities are released before the new window is
    /// computed, so repeated seeks never accumulate elevated pieces. When
    /// the new region is already owned, a one-shot 100% is published if
    /// the stream was buffering, and the first read is issued immediately.
    ///
    /// # Errors
    ///
    /// - `DemuxError::UnknownStream` - File index outside the layout
    /// - `DemuxError::StreamNotRequested` - Seek on an inactive stream
    /// - `DemuxError::InvalidSeek` - Empty or out-of-range target; no
    ///   state is mutated
    /// - `DemuxError::Engine` - The engine rejected the immediate read
    pub async fn seek(
        &self,
        file_index: usize,
        byte_offset: u64,
        byte_len: Option<u64>,
    ) -> Result<(), DemuxError> {
        let descriptor = self
            .shared
            .streams
            .get(file_index)
            .ok_or(DemuxError::UnknownStream { file_index })?;

        enum SeekAction {
            Wait,
            Read { piece: PieceIndex, unpause: bool },
        }

        let action = {
            let mut descriptor = descriptor.lock();
            if !descriptor.requested {
                return Err(DemuxError::StreamNotRequested { file_index });
            }
            let file_size = descriptor.file_size();
            if byte_offset >= file_size {
                return Err(DemuxError::InvalidSeek {
                    file_index,
                    reason: format!("offset {byte_offset} beyond file size {file_size}"),
                });
            }
            let rel_end = match byte_len {
                None => file_size,
                Some(0) => {
                    return Err(DemuxError::InvalidSeek {
                        file_index,
                        reason: "zero-length seek target".to_string(),
                    });
                }
                Some(len) => byte_offset.saturating_add(len).min(file_size),
            };

            // Release pressure from the old window before the new one is
            // computed; repeated seeks must not accumulate Top pieces.
            self.shared.window.release(&descriptor, &*self.shared.source);

            let tail_fetch = self.shared.config.buffering.tail_policy == TailPolicy::ReturnToStart
                && descriptor.cursor.is_none()
                && byte_offset > 0
                && rel_end == file_size;

            let was_buffering = descriptor.buffering;
            descriptor.apply_region(byte_offset, rel_end);
            descriptor.tail_return = tail_fetch;
            descriptor.pending_segment = true;
            descriptor.finished = false;
            descriptor.state = StreamState::Activated;
            descriptor.bump_generation();
            debug!(
                "stream {file_index}: seek to [{byte_offset}, {rel_end}) => pieces [{}, {}]{}",
                descriptor.start_piece,
                descriptor.end_piece,
                if tail_fetch { " (tail metadata fetch)" } else { "" },
            );

            let buffering = self
                .shared
                .window
                .activate(&mut descriptor, &*self.shared.source);
            if buffering {
                SeekAction::Wait
            } else {
                SeekAction::Read {
                    piece: descriptor.next_piece(),
                    unpause: was_buffering,
                }
            }
        };

        match action {
            SeekAction::Wait => {
                self.shared.sink.buffering(file_index, 0).await;
            }
            SeekAction::Read { piece, unpause } => {
                if unpause {
                    // The consumer paused on a sub-100 level for the old
                    // window; let it resume.
                    self.shared.sink.buffering(file_index, 100).await;
                }
                self.shared.source.read_piece(piece)?;
            }
        }
        Ok(())
    }

    /// The stream's current buffering level (0-100).
    pub fn current_buffering_level(&self, file_index: usize) -> Result<u8, DemuxError> {
        let descriptor = self
            .shared
            .streams
            .get(file_index)
            .ok_or(DemuxError::UnknownStream { file_index })?;
        Ok(descriptor.lock().buffering_level)
    }

    /// Whether the engine reported every piece of the file downloaded.
    pub fn is_file_complete(&self, file_index: usize) -> Result<bool, DemuxError> {
        let descriptor = self
            .shared
            .streams
            .get(file_index)
            .ok_or(DemuxError::UnknownStream { file_index })?;
        Ok(descriptor.lock().download_complete)
    }

    /// Whether the stream accepts byte-range seeks. True as soon as the
    /// layout-derived byte range is known, independent of download state.
    pub fn is_seekable(&self, file_index: usize) -> Result<bool, DemuxError> {
        if file_index >= self.shared.streams.len() {
            return Err(DemuxError::UnknownStream { file_index });
        }
        Ok(true)
    }

    /// The stream's current lifecycle state.
    pub fn stream_state(&self, file_index: usize) -> Result<StreamState, DemuxError> {
        let descriptor = self
            .shared
            .streams
            .get(file_index)
            .ok_or(DemuxError::UnknownStream { file_index })?;
        Ok(descriptor.lock().state)
    }

    /// Aborts every stream and stops the pump. Idempotent.
    pub async fn shutdown(&self) {
        abort_all(&self.shared).await;
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.abort();
            let _ = pump.await;
        }
    }
}

async fn pump(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        if !handle_event(&shared, event).await {
            break;
        }
    }
    debug!("alert pump exited");
}

/// Dispatches one engine event. Returns false when the pump must stop.
async fn handle_event(shared: &Arc<Shared>, event: EngineEvent) -> bool {
    match event {
        EngineEvent::PieceReadCompleted { piece, data } => {
            let target = shared.streams.iter().position(|descriptor| {
                let descriptor = descriptor.lock();
                descriptor.requested && descriptor.contains(piece)
            });
            let Some(index) = target else {
                debug!("dropping read of piece {piece}: no requested stream wants it");
                return true;
            };
            let sender = shared.handles.lock()[index]
                .as_ref()
                .map(|handle| handle.reads.clone());
            if let Some(sender) = sender
                && sender.try_send(PieceRead { piece, data }).is_err()
            {
                // Queue full or task gone: the read is stale either way.
                debug!("stream {index}: dropping read of piece {piece}");
            }
        }
        EngineEvent::PieceReadFailed { piece } => {
            // Retry is the engine's job; the cursor simply does not move.
            debug!("read of piece {piece} failed; waiting for the engine");
        }
        EngineEvent::PieceFinished { piece } => {
            piece_finished(shared, piece).await;
        }
        EngineEvent::FileCompleted { file_index } => {
            if let Some(descriptor) = shared.streams.get(file_index) {
                descriptor.lock().download_complete = true;
                debug!("file {file_index} completed downloading");
            }
        }
        EngineEvent::TorrentFinished => {
            info!("torrent finished downloading");
        }
        EngineEvent::TorrentRemoved => {
            info!("torrent removed; aborting all streams");
            abort_all(shared).await;
            return false;
        }
    }
    true
}

/// A piece finished downloading: update the window of the stream waiting
/// on it and publish the new level.
async fn piece_finished(shared: &Arc<Shared>, piece: PieceIndex) {
    for (file_index, descriptor) in shared.streams.iter().enumerate() {
        let action = {
            let mut descriptor = descriptor.lock();
            if !descriptor.requested
                || !descriptor.buffering
                || !descriptor.window_needed.contains(&piece)
            {
                continue;
            }
            shared.window.recompute(&mut descriptor, &*shared.source);
            publish_action(&mut descriptor)
        };
        match action {
            PublishAction::Skip => {}
            PublishAction::Report { level } => {
                shared.sink.buffering(file_index, level).await;
            }
            PublishAction::Resume { level, next } => {
                shared.sink.buffering(file_index, level).await;
                if let Err(err) = shared.source.read_piece(next) {
                    warn!("stream {file_index}: deferred read of piece {next} failed: {err}");
                }
            }
        }
    }
}

/// Forces every stream to `Aborted`: no EOS is emitted, distinguishing
/// "torrent gone" from "file finished" for the consumer.
async fn abort_all(shared: &Arc<Shared>) {
    for (index, descriptor) in shared.streams.iter().enumerate() {
        let handle = {
            let mut descriptor = descriptor.lock();
            descriptor.requested = false;
            descriptor.buffering = false;
            if descriptor.state != StreamState::Eos {
                descriptor.state = StreamState::Aborted;
            }
            shared.handles.lock()[index].take()
        };
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimulatedEngine;
    use crate::streaming::sink::{CollectingSink, SinkEvent};

    fn demux_over(
        engine: &Arc<SimulatedEngine>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
        sink: &Arc<CollectingSink>,
    ) -> TorrentDemux {
        TorrentDemux::new(
            engine.clone(),
            sink.clone(),
            events,
            SlipstreamConfig::default(),
        )
    }

    #[tokio::test]
    async fn select_with_owned_window_reads_immediately() {
        let (engine, events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);
        engine.add_owned([0, 1, 2]);
        let sink = Arc::new(CollectingSink::new());
        let demux = demux_over(&engine, events, &sink);

        demux.select_stream(0).await.unwrap();
        sink.wait_until(|events| {
            events.iter().any(|(_, event)| matches!(event, SinkEvent::EndOfStream))
        })
        .await;

        assert_eq!(sink.delivered_bytes(0), engine.file_bytes(0));
        assert!(engine.priority_history().is_empty(), "owned window must not be elevated");
        assert_eq!(demux.stream_state(0).unwrap(), StreamState::Eos);
        demux.shutdown().await;
    }

    #[tokio::test]
    async fn selecting_a_zero_byte_file_completes_immediately() {
        let (engine, events) =
            SimulatedEngine::new(16384, vec![("a.mp4", 40000), ("empty.srt", 0)]);
        let sink = Arc::new(CollectingSink::new());
        let demux = demux_over(&engine, events, &sink);

        demux.select_stream(1).await.unwrap();

        assert_eq!(demux.stream_state(1).unwrap(), StreamState::Eos);
        assert!(
            sink.events()
                .iter()
                .any(|(index, event)| *index == 1 && matches!(event, SinkEvent::EndOfStream))
        );
        assert!(sink.delivered_bytes(1).is_empty());
        demux.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_stream_is_rejected() {
        let (engine, events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);
        let sink = Arc::new(CollectingSink::new());
        let demux = demux_over(&engine, events, &sink);

        assert!(matches!(
            demux.select_stream(7).await,
            Err(DemuxError::UnknownStream { file_index: 7 })
        ));
        demux.shutdown().await;
    }

    #[tokio::test]
    async fn seek_on_inactive_stream_is_rejected() {
        let (engine, events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);
        let sink = Arc::new(CollectingSink::new());
        let demux = demux_over(&engine, events, &sink);

        assert!(matches!(
            demux.seek(0, 100, None).await,
            Err(DemuxError::StreamNotRequested { file_index: 0 })
        ));
        demux.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_seek_mutates_nothing() {
        let (engine, events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);
        let sink = Arc::new(CollectingSink::new());
        let demux = demux_over(&engine, events, &sink);
        demux.select_stream(0).await.unwrap();

        let generation_before = demux.shared.streams[0].lock().generation;
        assert!(matches!(
            demux.seek(0, 50000, None).await,
            Err(DemuxError::InvalidSeek { .. })
        ));
        assert!(matches!(
            demux.seek(0, 100, Some(0)).await,
            Err(DemuxError::InvalidSeek { .. })
        ));
        assert_eq!(demux.shared.streams[0].lock().generation, generation_before);
        demux.shutdown().await;
    }

    #[tokio::test]
    async fn oversized_seek_length_clamps_to_file_end() {
        let (engine, events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);
        let sink = Arc::new(CollectingSink::new());
        let demux = demux_over(&engine, events, &sink);
        demux.select_stream(0).await.unwrap();

        engine.add_owned([1, 2]);
        demux.seek(0, 16384, Some(u64::MAX)).await.unwrap();
        sink.wait_until(|events| {
            events.iter().any(|(_, event)| matches!(event, SinkEvent::EndOfStream))
        })
        .await;

        assert_eq!(sink.delivered_bytes(0), engine.file_bytes(0)[16384..].to_vec());
        demux.shutdown().await;
    }

    #[tokio::test]
    async fn file_completion_is_surfaced_to_queries() {
        let (engine, events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);
        let sink = Arc::new(CollectingSink::new());
        let demux = demux_over(&engine, events, &sink);
        assert!(!demux.is_file_complete(0).unwrap());

        engine.complete_file(0);
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !demux.is_file_complete(0).unwrap() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pump must record file completion");
        demux.shutdown().await;
    }

    #[tokio::test]
    async fn torrent_removal_aborts_without_eos() {
        let (engine, events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);
        let sink = Arc::new(CollectingSink::new());
        let demux = demux_over(&engine, events, &sink);
        demux.select_stream(0).await.unwrap();

        engine.remove_torrent();
        // The pump observes TorrentRemoved and tears everything down.
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while demux.stream_state(0).unwrap() != StreamState::Aborted {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("streams must abort after torrent removal");
        demux.shutdown().await;

        assert!(
            !sink
                .events()
                .iter()
                .any(|(_, event)| matches!(event, SinkEvent::EndOfStream))
        );
    }

    #[tokio::test]
    async fn is_seekable_once_layout_known() {
        let (engine, events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);
        let sink = Arc::new(CollectingSink::new());
        let demux = demux_over(&engine, events, &sink);

        assert!(demux.is_seekable(0).unwrap());
        assert!(demux.is_seekable(1).is_err());
        demux.shutdown().await;
    }
}
