//! The piece-buffering and adaptive streaming scheduler.
//!
//! This module bridges a pull-based media pipeline with a push-based,
//! alert-driven torrent engine. Per file, a [`StreamDescriptor`] tracks
//! the active byte region and delivery cursor; the [`WindowManager`]
//! keeps a bounded look-ahead of pieces at top download priority; the
//! sequencer task delivers slices downstream in strict piece order; and
//! [`TorrentDemux`] switches streams, handles seeks, and pumps engine
//! events into the right places.

pub mod buffer;
pub mod demux;
pub mod descriptor;
pub mod sequencer;
pub mod sink;

pub use buffer::WindowManager;
pub use demux::{DemuxError, TorrentDemux};
pub use descriptor::{StreamDescriptor, StreamState};
pub use sequencer::PieceRead;
pub use sink::{CollectingSink, SegmentRange, SinkError, SinkEvent, StreamSink};
