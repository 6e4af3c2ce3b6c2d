//! Look-ahead window management and buffering-level bookkeeping.
//!
//! The window manager keeps a bounded set of pieces ahead of the delivery
//! cursor at top download priority, so playback never stalls on a piece
//! that could have been prefetched, while never requesting the whole file
//! at top priority. It also computes the 0-100 buffering level the signal
//! emitter publishes downstream.

use tracing::debug;

use crate::engine::{PieceIndex, PiecePriority, PieceSource};
use crate::streaming::descriptor::StreamDescriptor;

/// Maintains the fixed-size look-ahead window of one stream.
#[derive(Debug, Clone, Copy)]
pub struct WindowManager {
    window_size: usize,
}

impl WindowManager {
    /// Creates a manager with a window of `window_size` pieces (≥ 1).
    pub fn new(window_size: usize) -> Self {
        assert!(window_size >= 1, "look-ahead window must hold at least one piece");
        Self { window_size }
    }

    /// Rebuilds the window at the stream's current cursor position.
    ///
    /// Releases any stale top priorities from the previous window first,
    /// then elevates every not-yet-owned piece in
    /// `[next_piece, min(next_piece + N - 1, end_piece)]` and records it in
    /// the descriptor's window flags. Returns whether buffering is required;
    /// when it is not, the caller should read the next piece immediately.
    pub fn activate(&self, descriptor: &mut StreamDescriptor, source: &dyn PieceSource) -> bool {
        self.release(descriptor, source);
        descriptor.window_needed.clear();
        descriptor.buffering_level = 0;

        let first = descriptor.next_piece();
        if first > descriptor.end_piece {
            // Cursor already at the region's tail; nothing left to prefetch.
            descriptor.buffering_count = 0;
            descriptor.buffering = false;
            return false;
        }

        let last_index = (first.as_u32() + self.window_size as u32 - 1)
            .min(descriptor.end_piece.as_u32());
        for index in first.as_u32()..=last_index {
            let piece = PieceIndex::new(index);
            if !source.have_piece(piece) {
                source.set_piece_priority(piece, PiecePriority::Top);
                descriptor.window_needed.push(piece);
            }
        }

        descriptor.buffering_count = descriptor.window_needed.len();
        descriptor.buffering = descriptor.buffering_count > 0;
        debug!(
            "window for stream {} activated at piece {first}: {} of {} pieces need download",
            descriptor.file_index,
            descriptor.buffering_count,
            last_index - first.as_u32() + 1,
        );
        descriptor.buffering
    }

    /// Recounts owned window pieces and updates the buffering level.
    ///
    /// `level = 100 * owned / count` with integer truncation; a window that
    /// needed nothing keeps level 0 and counts as complete.
    pub fn recompute(&self, descriptor: &mut StreamDescriptor, source: &dyn PieceSource) {
        if descriptor.buffering_count == 0 {
            descriptor.buffering_level = 0;
            return;
        }
        let owned = descriptor
            .window_needed
            .iter()
            .filter(|piece| source.have_piece(**piece))
            .count()
            .min(descriptor.buffering_count);
        descriptor.buffering_level = (100 * owned / descriptor.buffering_count) as u8;
    }

    /// Lowers still-unowned window pieces back to `Low` priority.
    ///
    /// Releases bandwidth pressure from a stream no longer being watched
    /// without excluding the pieces from background completion. Idempotent:
    /// pieces already at or below `Low` are left alone.
    pub fn release(&self, descriptor: &StreamDescriptor, source: &dyn PieceSource) {
        for piece in &descriptor.window_needed {
            if !source.have_piece(*piece) && source.piece_priority(*piece) > PiecePriority::Low {
                source.set_piece_priority(*piece, PiecePriority::Low);
            }
        }
    }
}

/// What the buffering signal emitter must do after a recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAction {
    /// Stream is not requested or not buffering; nothing to publish.
    Skip,
    /// Publish the level and keep waiting for completion events.
    Report { level: u8 },
    /// Window complete: publish 100, then read `next` to resume delivery.
    Resume { level: u8, next: PieceIndex },
}

/// Decides the emitter step for a stream, clearing the buffering flag when
/// the window completed. The caller performs the sink call and the read
/// outside the descriptor lock.
pub fn publish_action(descriptor: &mut StreamDescriptor) -> PublishAction {
    if !descriptor.requested || !descriptor.buffering {
        return PublishAction::Skip;
    }
    let level = descriptor.buffering_level;
    if level >= 100 {
        descriptor.buffering = false;
        descriptor.buffering_level = 0;
        PublishAction::Resume {
            level,
            next: descriptor.next_piece(),
        }
    } else {
        PublishAction::Report { level }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimulatedEngine;
    use crate::streaming::descriptor::StreamDescriptor;

    fn stream_over(engine: &SimulatedEngine, file_index: usize) -> StreamDescriptor {
        let mut descriptor = StreamDescriptor::new(&engine.file_layout(), file_index);
        descriptor.requested = true;
        descriptor
    }

    #[test]
    fn activate_elevates_at_most_window_size_pieces() {
        let (engine, _events) = SimulatedEngine::new(16384, vec![("a.mp4", 16384 * 10)]);
        let mut descriptor = stream_over(&engine, 0);

        let buffering = WindowManager::new(3).activate(&mut descriptor, &*engine);

        assert!(buffering);
        assert_eq!(descriptor.buffering_count, 3);
        assert_eq!(
            engine.priority_history(),
            vec![
                (PieceIndex::new(0), PiecePriority::Top),
                (PieceIndex::new(1), PiecePriority::Top),
                (PieceIndex::new(2), PiecePriority::Top),
            ]
        );
    }

    #[test]
    fn window_collapses_at_region_tail() {
        let (engine, _events) = SimulatedEngine::new(16384, vec![("a.mp4", 40000)]);
        let mut descriptor = stream_over(&engine, 0);
        descriptor.cursor = Some(PieceIndex::new(1));

        WindowManager::new(3).activate(&mut descriptor, &*engine);

        // Only piece 2 exists past the cursor; nothing beyond end_piece
        // may be touched.
        assert_eq!(descriptor.window_needed, vec![PieceIndex::new(2)]);
        assert!(
            engine
                .priority_history()
                .iter()
                .all(|(piece, _)| piece.as_u32() <= 2)
        );
    }

    #[test]
    fn owned_pieces_are_not_elevated() {
        let (engine, _events) = SimulatedEngine::new(16384, vec![("a.mp4", 16384 * 5)]);
        engine.add_owned([0, 1, 2]);
        let mut descriptor = stream_over(&engine, 0);

        let buffering = WindowManager::new(3).activate(&mut descriptor, &*engine);

        assert!(!buffering);
        assert!(engine.priority_history().is_empty());
    }

    #[test]
    fn level_sequence_truncates() {
        let (engine, _events) = SimulatedEngine::new(16384, vec![("a.mp4", 16384 * 5)]);
        let mut descriptor = stream_over(&engine, 0);
        let manager = WindowManager::new(3);
        manager.activate(&mut descriptor, &*engine);

        let mut levels = vec![descriptor.buffering_level];
        for index in 0..3 {
            engine.add_owned([index]);
            manager.recompute(&mut descriptor, &*engine);
            levels.push(descriptor.buffering_level);
        }
        assert_eq!(levels, vec![0, 33, 66, 100]);
    }

    #[test]
    fn release_is_idempotent() {
        let (engine, _events) = SimulatedEngine::new(16384, vec![("a.mp4", 16384 * 5)]);
        let mut descriptor = stream_over(&engine, 0);
        let manager = WindowManager::new(3);
        manager.activate(&mut descriptor, &*engine);

        manager.release(&descriptor, &*engine);
        let after_first = engine.priority_history();
        manager.release(&descriptor, &*engine);

        assert_eq!(engine.priority_history(), after_first);
        for piece in &descriptor.window_needed {
            assert_eq!(engine.piece_priority(*piece), PiecePriority::Low);
        }
    }

    #[test]
    fn reactivation_clears_stale_priorities_first() {
        let (engine, _events) = SimulatedEngine::new(16384, vec![("a.mp4", 16384 * 20)]);
        let mut descriptor = stream_over(&engine, 0);
        let manager = WindowManager::new(3);
        manager.activate(&mut descriptor, &*engine);

        // Seek far ahead, then rebuild the window there.
        descriptor.apply_region(16384 * 10, 16384 * 20);
        manager.activate(&mut descriptor, &*engine);

        for index in 0..3 {
            assert_eq!(
                engine.piece_priority(PieceIndex::new(index)),
                PiecePriority::Low,
                "piece {index} from the old window must fall back to Low",
            );
        }
        for index in 10..13 {
            assert_eq!(engine.piece_priority(PieceIndex::new(index)), PiecePriority::Top);
        }
    }

    #[test]
    fn publish_clears_buffering_at_full_window() {
        let (engine, _events) = SimulatedEngine::new(16384, vec![("a.mp4", 16384 * 5)]);
        let mut descriptor = stream_over(&engine, 0);
        let manager = WindowManager::new(3);
        manager.activate(&mut descriptor, &*engine);

        engine.add_owned([0, 1, 2]);
        manager.recompute(&mut descriptor, &*engine);

        assert_eq!(
            publish_action(&mut descriptor),
            PublishAction::Resume { level: 100, next: PieceIndex::new(0) }
        );
        assert!(!descriptor.buffering);
        assert_eq!(publish_action(&mut descriptor), PublishAction::Skip);
    }
}
