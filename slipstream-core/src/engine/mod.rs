//! Torrent engine abstraction consumed by the streaming scheduler.
//!
//! The scheduler never talks to the wire protocol directly. It sees the
//! engine through a narrow surface: non-blocking piece reads and priority
//! writes via [`PieceSource`], and a stream of discrete completion events
//! ([`EngineEvent`]) drained by the alert pump in `streaming::demux`.

pub mod simulation;

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;

pub use simulation::SimulatedEngine;

/// Zero-based index of a piece within a torrent.
///
/// Torrent files are divided into fixed-size pieces for downloading and
/// verification. Each piece has a sequential index starting from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the index of the piece immediately after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Download priority of a single piece, as understood by the engine.
///
/// `Top` marks pieces in the active look-ahead window; `Low` is what a
/// released window falls back to, keeping the piece eligible for background
/// completion without competing with the watched stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PiecePriority {
    /// Piece is excluded from downloading entirely.
    DontDownload,
    /// Background priority for pieces no active stream is waiting on.
    Low,
    /// Engine default for pieces never touched by the scheduler.
    Normal,
    /// Highest priority, reserved for the look-ahead window.
    Top,
}

/// One logical file within the torrent's concatenated byte space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Stable identity of the file for the torrent's lifetime.
    pub file_index: usize,
    /// Start of the file within the torrent byte space.
    pub byte_offset: u64,
    /// File size in bytes.
    pub byte_size: u64,
    /// Path of the file inside the torrent.
    pub path: PathBuf,
}

impl FileEntry {
    /// Exclusive end of this file within the torrent byte space.
    pub fn byte_end(&self) -> u64 {
        self.byte_offset + self.byte_size
    }
}

/// Static file layout of a torrent: ordered files plus the fixed piece length.
///
/// Queried once per stream creation; the layout never changes for the
/// lifetime of the torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    /// Files in torrent order, with contiguous byte offsets.
    pub files: Vec<FileEntry>,
    /// Fixed piece length in bytes (last piece may be shorter).
    pub piece_length: u64,
}

impl FileLayout {
    /// Builds a layout from a piece length and `(path, size)` pairs.
    pub fn new(piece_length: u64, files: impl IntoIterator<Item = (PathBuf, u64)>) -> Self {
        let mut entries = Vec::new();
        let mut offset = 0u64;
        for (file_index, (path, byte_size)) in files.into_iter().enumerate() {
            entries.push(FileEntry {
                file_index,
                byte_offset: offset,
                byte_size,
                path,
            });
            offset += byte_size;
        }
        Self {
            files: entries,
            piece_length,
        }
    }

    /// Total size of the torrent byte space.
    pub fn total_size(&self) -> u64 {
        self.files.last().map(FileEntry::byte_end).unwrap_or(0)
    }

    /// Number of pieces covering the torrent byte space.
    pub fn piece_count(&self) -> u32 {
        let total = self.total_size();
        if total == 0 {
            return 0;
        }
        total.div_ceil(self.piece_length) as u32
    }

    /// Size of one specific piece (the final piece may be short).
    pub fn piece_size(&self, piece: PieceIndex) -> usize {
        let start = u64::from(piece.as_u32()) * self.piece_length;
        let end = (start + self.piece_length).min(self.total_size());
        end.saturating_sub(start) as usize
    }
}

/// Completion events emitted by the engine and drained by the alert pump.
///
/// Each event is delivered exactly once. There is no ordering guarantee
/// between event kinds beyond piece-index monotonicity for reads the
/// scheduler itself issued in order.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A `read_piece` request completed with the full piece payload.
    PieceReadCompleted {
        piece: PieceIndex,
        data: Bytes,
    },
    /// A `read_piece` request failed (I/O error or piece not actually owned).
    ///
    /// Retry is the engine's responsibility; the scheduler only refrains
    /// from advancing its cursor.
    PieceReadFailed {
        piece: PieceIndex,
    },
    /// A piece finished downloading and passed verification.
    PieceFinished {
        piece: PieceIndex,
    },
    /// Every piece overlapping the file has been downloaded.
    FileCompleted {
        file_index: usize,
    },
    /// The whole torrent finished downloading.
    TorrentFinished,
    /// The torrent was removed from the engine; all streams must abort.
    TorrentRemoved,
}

/// Errors surfaced by the engine-facing interface.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("piece {piece} out of range (torrent has {piece_count} pieces)")]
    PieceOutOfRange {
        piece: PieceIndex,
        piece_count: u32,
    },

    #[error("engine has shut down")]
    Shutdown,
}

/// Narrow interface onto the torrent engine.
///
/// Every method is non-blocking. `read_piece` is fire-and-forget: the
/// payload (or failure) arrives later as an [`EngineEvent`] on the event
/// channel handed to the demuxer. This is what allows callers to invoke
/// the source while holding a per-stream lock.
pub trait PieceSource: Send + Sync {
    /// Requests an asynchronous read of a whole piece.
    ///
    /// Completion is delivered later as `PieceReadCompleted` or
    /// `PieceReadFailed` on the engine's event channel.
    ///
    /// # Errors
    ///
    /// - `EngineError::PieceOutOfRange` - Piece index beyond the torrent
    /// - `EngineError::Shutdown` - Engine no longer accepts requests
    fn read_piece(&self, piece: PieceIndex) -> Result<(), EngineError>;

    /// Returns whether the piece is already downloaded and verified.
    fn have_piece(&self, piece: PieceIndex) -> bool;

    /// Returns the current download priority of a piece.
    fn piece_priority(&self, piece: PieceIndex) -> PiecePriority;

    /// Sets the download priority of a piece. Fire-and-forget.
    fn set_piece_priority(&self, piece: PieceIndex, priority: PiecePriority);

    /// Returns the torrent's static file layout.
    fn file_layout(&self) -> FileLayout;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn piece_index_ordering() {
        let piece1 = PieceIndex::new(5);
        let piece2 = PieceIndex::new(10);
        assert!(piece1 < piece2);
        assert_eq!(piece1.next(), PieceIndex::new(6));
    }

    #[test]
    fn priority_ordering_matches_elevation_rules() {
        assert!(PiecePriority::Top > PiecePriority::Normal);
        assert!(PiecePriority::Normal > PiecePriority::Low);
        assert!(PiecePriority::Low > PiecePriority::DontDownload);
    }

    #[test]
    fn layout_offsets_are_contiguous() {
        let layout = FileLayout::new(
            16384,
            vec![(PathBuf::from("a.mp4"), 40000), (PathBuf::from("b.srt"), 1000)],
        );
        assert_eq!(layout.files[0].byte_offset, 0);
        assert_eq!(layout.files[1].byte_offset, 40000);
        assert_eq!(layout.total_size(), 41000);
        assert_eq!(layout.piece_count(), 3);
    }

    #[test]
    fn final_piece_is_short() {
        let layout = FileLayout::new(16384, vec![(PathBuf::from("a.mp4"), 40000)]);
        assert_eq!(layout.piece_size(PieceIndex::new(0)), 16384);
        assert_eq!(layout.piece_size(PieceIndex::new(1)), 16384);
        assert_eq!(layout.piece_size(PieceIndex::new(2)), 40000 - 2 * 16384);
    }
}
