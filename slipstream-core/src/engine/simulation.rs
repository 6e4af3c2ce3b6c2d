//! In-memory engine for deterministic tests and development.
//!
//! `SimulatedEngine` implements [`PieceSource`] over synthetic piece data
//! and lets a test driver control exactly when pieces finish downloading,
//! when the torrent completes, and when it is removed. Events flow through
//! the same channel a production engine would use, so the scheduler under
//! test cannot tell the difference.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{EngineError, EngineEvent, FileLayout, PieceIndex, PiecePriority, PieceSource};

/// Deterministic byte at a global torrent offset.
///
/// Prime modulus so that patterns never align with piece boundaries,
/// which would let slicing bugs slip through byte-compare tests.
fn content_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

#[derive(Debug, Default)]
struct SimState {
    owned: HashSet<u32>,
    priorities: HashMap<u32, PiecePriority>,
    priority_history: Vec<(PieceIndex, PiecePriority)>,
    shutdown: bool,
}

/// In-memory [`PieceSource`] with test drivers for download progress.
pub struct SimulatedEngine {
    layout: FileLayout,
    state: Mutex<SimState>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl SimulatedEngine {
    /// Creates an engine over `(path, size)` files with the given piece
    /// length, returning the engine and the completion-event receiver the
    /// demuxer drains.
    pub fn new(
        piece_length: u64,
        files: impl IntoIterator<Item = (&'static str, u64)>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let layout = FileLayout::new(
            piece_length,
            files
                .into_iter()
                .map(|(path, size)| (PathBuf::from(path), size)),
        );
        let (events, receiver) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            layout,
            state: Mutex::new(SimState::default()),
            events,
        });
        (engine, receiver)
    }

    /// Marks pieces as already downloaded without emitting events.
    ///
    /// Models pieces that arrived before the stream was activated, e.g.
    /// unrelated background download progress.
    pub fn add_owned(&self, pieces: impl IntoIterator<Item = u32>) {
        let mut state = self.state.lock();
        state.owned.extend(pieces);
    }

    /// Marks a piece downloaded and emits `PieceFinished`.
    pub fn finish_piece(&self, piece: PieceIndex) {
        {
            let mut state = self.state.lock();
            state.owned.insert(piece.as_u32());
        }
        let _ = self.events.send(EngineEvent::PieceFinished { piece });
    }

    /// Emits `FileCompleted` for a file.
    pub fn complete_file(&self, file_index: usize) {
        let _ = self.events.send(EngineEvent::FileCompleted { file_index });
    }

    /// Emits `TorrentFinished`.
    pub fn finish_torrent(&self) {
        let _ = self.events.send(EngineEvent::TorrentFinished);
    }

    /// Removes the torrent: further requests fail and `TorrentRemoved`
    /// is emitted.
    pub fn remove_torrent(&self) {
        self.state.lock().shutdown = true;
        let _ = self.events.send(EngineEvent::TorrentRemoved);
    }

    /// Every priority change the scheduler has issued, in order.
    pub fn priority_history(&self) -> Vec<(PieceIndex, PiecePriority)> {
        self.state.lock().priority_history.clone()
    }

    /// The full payload of one piece.
    pub fn piece_bytes(&self, piece: PieceIndex) -> Bytes {
        let start = u64::from(piece.as_u32()) * self.layout.piece_length;
        let size = self.layout.piece_size(piece);
        (start..start + size as u64).map(content_byte).collect()
    }

    /// The exact byte content of one file, for reconstruction asserts.
    pub fn file_bytes(&self, file_index: usize) -> Vec<u8> {
        let file = &self.layout.files[file_index];
        (file.byte_offset..file.byte_end()).map(content_byte).collect()
    }
}

impl PieceSource for SimulatedEngine {
    fn read_piece(&self, piece: PieceIndex) -> Result<(), EngineError> {
        let owned = {
            let state = self.state.lock();
            if state.shutdown {
                return Err(EngineError::Shutdown);
            }
            state.owned.contains(&piece.as_u32())
        };
        if piece.as_u32() >= self.layout.piece_count() {
            return Err(EngineError::PieceOutOfRange {
                piece,
                piece_count: self.layout.piece_count(),
            });
        }

        let event = if owned {
            EngineEvent::PieceReadCompleted {
                piece,
                data: self.piece_bytes(piece),
            }
        } else {
            debug!("simulated read of piece {piece} failed: not owned");
            EngineEvent::PieceReadFailed { piece }
        };
        let _ = self.events.send(event);
        Ok(())
    }

    fn have_piece(&self, piece: PieceIndex) -> bool {
        self.state.lock().owned.contains(&piece.as_u32())
    }

    fn piece_priority(&self, piece: PieceIndex) -> PiecePriority {
        self.state
            .lock()
            .priorities
            .get(&piece.as_u32())
            .copied()
            .unwrap_or(PiecePriority::Normal)
    }

    fn set_piece_priority(&self, piece: PieceIndex, priority: PiecePriority) {
        let mut state = self.state.lock();
        state.priorities.insert(piece.as_u32(), priority);
        state.priority_history.push((piece, priority));
    }

    fn file_layout(&self) -> FileLayout {
        self.layout.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_of_owned_piece_completes_with_payload() {
        let (engine, mut events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);
        engine.add_owned([0]);

        engine.read_piece(PieceIndex::new(0)).unwrap();

        match events.recv().await.unwrap() {
            EngineEvent::PieceReadCompleted { piece, data } => {
                assert_eq!(piece, PieceIndex::new(0));
                assert_eq!(data.len(), 16384);
                assert_eq!(data[0], content_byte(0));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_of_missing_piece_fails() {
        let (engine, mut events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);

        engine.read_piece(PieceIndex::new(1)).unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::PieceReadFailed { piece } if piece == PieceIndex::new(1)
        ));
    }

    #[tokio::test]
    async fn removed_torrent_rejects_reads() {
        let (engine, mut events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);
        engine.remove_torrent();

        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::TorrentRemoved
        ));
        assert!(matches!(
            engine.read_piece(PieceIndex::new(0)),
            Err(EngineError::Shutdown)
        ));
    }

    #[test]
    fn file_bytes_match_piece_bytes() {
        let (engine, _events) = SimulatedEngine::new(10, vec![("a", 25)]);
        let mut assembled = Vec::new();
        for index in 0..3 {
            assembled.extend_from_slice(&engine.piece_bytes(PieceIndex::new(index)));
        }
        assert_eq!(assembled, engine.file_bytes(0));
    }

    #[test]
    fn priority_history_records_writes() {
        let (engine, _events) = SimulatedEngine::new(10, vec![("a", 25)]);
        engine.set_piece_priority(PieceIndex::new(1), PiecePriority::Top);
        engine.set_piece_priority(PieceIndex::new(1), PiecePriority::Low);

        assert_eq!(
            engine.priority_history(),
            vec![
                (PieceIndex::new(1), PiecePriority::Top),
                (PieceIndex::new(1), PiecePriority::Low),
            ]
        );
        assert_eq!(engine.piece_priority(PieceIndex::new(1)), PiecePriority::Low);
    }
}
