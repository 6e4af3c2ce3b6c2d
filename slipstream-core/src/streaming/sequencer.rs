//! Per-stream delivery task: strict in-order slicing and push.
//!
//! Each activated stream runs one tokio task that blocks on its inbound
//! queue of completed piece reads, delivers the stream's slice of each
//! piece downstream in strictly ascending piece order, and drives
//! read-ahead. Out-of-order or stale arrivals are dropped, never
//! reordered; the engine is told to read pieces in order, so dropping is
//! the whole correctness story for races with seeks.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::DeliveryConfig;
use crate::engine::{PieceIndex, PieceSource};
use crate::streaming::buffer::WindowManager;
use crate::streaming::descriptor::{StreamDescriptor, StreamState};
use crate::streaming::sink::{SegmentRange, SinkError, StreamSink};

/// A completed piece read routed to one stream's delivery queue.
#[derive(Debug, Clone)]
pub struct PieceRead {
    /// Index of the piece that was read.
    pub piece: PieceIndex,
    /// Full piece payload.
    pub data: Bytes,
}

/// Control surface of a running delivery task.
pub(crate) struct DeliveryHandle {
    pub(crate) reads: mpsc::Sender<PieceRead>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DeliveryHandle {
    /// Wakes the task out of its queue wait and joins it. Teardown is
    /// complete only once the task has observed the sentinel.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

struct TaskContext {
    file_index: usize,
    descriptor: Arc<Mutex<StreamDescriptor>>,
    source: Arc<dyn PieceSource>,
    sink: Arc<dyn StreamSink>,
    window: WindowManager,
    config: DeliveryConfig,
}

/// Outcome of delivering one queued piece read.
enum Flow {
    Continue,
    Eos,
    Fault(String),
    Abort,
}

/// Spawns the delivery task for one stream.
pub(crate) fn spawn(
    file_index: usize,
    descriptor: Arc<Mutex<StreamDescriptor>>,
    source: Arc<dyn PieceSource>,
    sink: Arc<dyn StreamSink>,
    window: WindowManager,
    config: DeliveryConfig,
) -> DeliveryHandle {
    let (reads, inbound) = mpsc::channel(config.channel_capacity);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let context = TaskContext {
        file_index,
        descriptor,
        source,
        sink,
        window,
        config,
    };
    let join = tokio::spawn(run(context, inbound, shutdown_rx));
    DeliveryHandle {
        reads,
        shutdown,
        join,
    }
}

async fn run(
    context: TaskContext,
    mut inbound: mpsc::Receiver<PieceRead>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                mark_aborted(&context);
                break;
            }
            read = inbound.recv() => {
                let Some(read) = read else {
                    mark_aborted(&context);
                    break;
                };
                match deliver(&context, read).await {
                    Flow::Continue => {}
                    Flow::Eos => {
                        context.sink.end_of_stream(context.file_index).await;
                        break;
                    }
                    Flow::Fault(message) => {
                        warn!(
                            "stream {}: permanent downstream fault: {message}",
                            context.file_index
                        );
                        context.sink.error(context.file_index, message).await;
                        context.sink.end_of_stream(context.file_index).await;
                        break;
                    }
                    Flow::Abort => break,
                }
            }
        }
    }
    debug!("delivery task for stream {} exited", context.file_index);
}

fn mark_aborted(context: &TaskContext) {
    let mut descriptor = context.descriptor.lock();
    if descriptor.state != StreamState::Eos {
        descriptor.state = StreamState::Aborted;
    }
}

struct DeliverySnapshot {
    generation: u64,
    bounds: std::ops::Range<usize>,
    segment: Option<SegmentRange>,
}

async fn deliver(context: &TaskContext, read: PieceRead) -> Flow {
    let PieceRead { piece, data } = read;

    // Phase 1: validate and snapshot under the lock. Out-of-range,
    // not-requested and out-of-order arrivals are dropped with no state
    // change; they are expected under concurrent seeks.
    let snapshot = {
        let descriptor = context.descriptor.lock();
        if !descriptor.requested
            || !descriptor.contains(piece)
            || piece != descriptor.next_piece()
        {
            debug!(
                "stream {}: dropping stale read of piece {piece} (next expected {})",
                context.file_index,
                descriptor.next_piece()
            );
            return Flow::Continue;
        }
        DeliverySnapshot {
            generation: descriptor.generation,
            bounds: descriptor.slice_bounds(piece, data.len()),
            segment: descriptor.pending_segment.then(|| descriptor.segment_range()),
        }
    };

    // Phase 2: downstream calls, outside the lock. The pipeline may block
    // here for as long as it likes.
    if let Some(range) = snapshot.segment {
        context
            .sink
            .announce_segment(context.file_index, range)
            .await;
    }
    let slice = data.slice(snapshot.bounds);
    let mut flush_retries = 0u32;
    loop {
        match context.sink.deliver(context.file_index, slice.clone()).await {
            Ok(()) => break,
            Err(SinkError::Flushing) if flush_retries < context.config.flushing_retry_limit => {
                flush_retries += 1;
                tokio::task::yield_now().await;
                if !context.descriptor.lock().requested {
                    return Flow::Abort;
                }
            }
            Err(err) => return Flow::Fault(err.to_string()),
        }
    }

    // Phase 3: advance under the lock, unless a seek raced the delivery.
    // The guard lives only inside this block; the resulting sink and
    // engine calls happen after it is released.
    enum NextStep {
        Nothing,
        Finish,
        Stall,
        Read(PieceIndex),
    }

    let step = {
        let mut descriptor = context.descriptor.lock();
        if descriptor.generation != snapshot.generation {
            debug!(
                "stream {}: seek raced delivery of piece {piece}; not advancing",
                context.file_index
            );
            NextStep::Nothing
        } else {
            descriptor.pending_segment = false;
            descriptor.cursor = Some(piece);
            descriptor.state = StreamState::Streaming;

            if descriptor.is_final(piece) {
                if descriptor.tail_return {
                    // Tail metadata delivered; resume from the stream's true
                    // start as if a seek to 0 had occurred. One-time
                    // reordering.
                    descriptor.reset_region();
                    descriptor.pending_segment = true;
                    descriptor.bump_generation();
                    descriptor.state = StreamState::Activated;
                    if context.window.activate(&mut descriptor, &*context.source) {
                        NextStep::Stall
                    } else {
                        NextStep::Read(descriptor.next_piece())
                    }
                } else {
                    descriptor.finished = true;
                    descriptor.state = StreamState::Eos;
                    NextStep::Finish
                }
            } else {
                // Read-ahead: chain the next read if the piece is owned,
                // otherwise rebuild the window at the new cursor. A window
                // that comes back complete means the piece arrived between
                // the ownership check and the rebuild; read it directly.
                let next = descriptor.next_piece();
                if context.source.have_piece(next)
                    || !context.window.activate(&mut descriptor, &*context.source)
                {
                    NextStep::Read(next)
                } else {
                    NextStep::Stall
                }
            }
        }
    };

    match step {
        NextStep::Nothing => Flow::Continue,
        NextStep::Finish => Flow::Eos,
        NextStep::Stall => {
            context.sink.buffering(context.file_index, 0).await;
            Flow::Continue
        }
        NextStep::Read(next) => {
            if let Err(err) = context.source.read_piece(next) {
                warn!("stream {}: read-ahead of piece {next} failed: {err}", context.file_index);
            }
            Flow::Continue
        }
    }
}
