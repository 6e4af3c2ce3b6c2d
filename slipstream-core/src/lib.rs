//! Slipstream Core - stream a media file straight out of an in-progress
//! torrent download.
//!
//! The crate sits between a torrent engine that can read arbitrary pieces
//! asynchronously and a media pipeline that wants an ordered byte stream
//! with seek support: it schedules piece priorities around the playback
//! position, delivers in-order byte slices per file, and publishes
//! buffering levels so the consumer can pause and resume.

pub mod config;
pub mod engine;
pub mod streaming;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::SlipstreamConfig;
pub use engine::{EngineError, EngineEvent, FileLayout, PieceIndex, PiecePriority, PieceSource};
pub use streaming::{DemuxError, StreamSink, TorrentDemux};

/// Core errors that can bubble up from any Slipstream subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SlipstreamError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Demux error: {0}")]
    Demux(#[from] DemuxError),

    #[error("Sink error: {0}")]
    Sink(#[from] streaming::SinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SlipstreamError>;
