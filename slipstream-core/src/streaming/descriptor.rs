//! Per-file stream state and the pure piece/byte arithmetic.
//!
//! A [`StreamDescriptor`] maps one logical file onto the torrent's piece
//! space and carries everything the scheduler mutates while the file plays:
//! the active byte region (narrowed by seeks), the delivery cursor, the
//! look-ahead window flags, and the buffering counters. All methods here are
//! synchronous and side-effect free with respect to the engine; the window
//! manager and demuxer own the mutation protocol.

use crate::engine::{FileLayout, PieceIndex};
use crate::streaming::sink::SegmentRange;

/// Lifecycle of one stream's delivery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Not selected for playback; no delivery task is running.
    Idle,
    /// Window manager has just run; waiting for the first readable piece.
    Activated,
    /// Pieces are being delivered in order.
    Streaming,
    /// Every byte of the active region was delivered and EOS was signaled.
    Eos,
    /// Deactivated mid-flight (switch or torrent removal); no EOS.
    Aborted,
}

/// Per-file stream state: byte ranges, piece ranges, cursor, window flags.
///
/// Created once per file when the torrent layout becomes known, destroyed
/// only with the torrent. The active region (`start_piece`..`end_piece`)
/// starts as the whole file and is narrowed by seeks.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    /// Stable identity within the torrent.
    pub file_index: usize,
    /// Immutable start of the file in torrent byte space.
    byte_start_global: u64,
    /// Immutable exclusive end of the file in torrent byte space.
    byte_end_global: u64,
    /// Fixed piece length of the torrent.
    piece_length: u64,

    /// First piece of the active region.
    pub start_piece: PieceIndex,
    /// Byte offset inside `start_piece` where the region begins.
    pub start_offset: u64,
    /// Last piece of the active region (inclusive).
    pub end_piece: PieceIndex,
    /// Exclusive byte offset inside `end_piece` where the region ends.
    pub end_offset: u64,

    /// Last piece delivered downstream; `None` until the first delivery.
    pub cursor: Option<PieceIndex>,
    /// Pieces of the current look-ahead window that needed downloading.
    pub window_needed: Vec<PieceIndex>,
    /// Number of window pieces that needed downloading at activation.
    pub buffering_count: usize,
    /// Percentage of the window now owned; only meaningful while buffering.
    pub buffering_level: u8,
    /// True while delivery is stalled waiting on the window.
    pub buffering: bool,

    /// True iff this stream is the one selected for playback.
    pub requested: bool,
    /// A discontinuity must be announced before the next slice.
    pub pending_segment: bool,
    /// Every byte of the file has been delivered.
    pub finished: bool,
    /// The engine reported the file fully downloaded.
    pub download_complete: bool,
    /// Current point in the delivery lifecycle.
    pub state: StreamState,

    /// Bumped by every activate/seek/deactivate. A delivery that observes
    /// a different generation after its downstream push is stale and must
    /// not advance the cursor.
    pub generation: u64,
    /// The active region is a tail-metadata fetch; on its last piece the
    /// stream resets to its true start instead of ending.
    pub tail_return: bool,
}

impl StreamDescriptor {
    /// Creates a descriptor for one file of the layout, with the active
    /// region spanning the whole file.
    pub fn new(layout: &FileLayout, file_index: usize) -> Self {
        let file = &layout.files[file_index];
        let mut descriptor = Self {
            file_index,
            byte_start_global: file.byte_offset,
            byte_end_global: file.byte_end(),
            piece_length: layout.piece_length,
            start_piece: PieceIndex::new(0),
            start_offset: 0,
            end_piece: PieceIndex::new(0),
            end_offset: 0,
            cursor: None,
            window_needed: Vec::new(),
            buffering_count: 0,
            buffering_level: 0,
            buffering: false,
            requested: false,
            pending_segment: false,
            finished: false,
            download_complete: false,
            state: StreamState::Idle,
            generation: 0,
            tail_return: false,
        };
        if descriptor.file_size() > 0 {
            descriptor.reset_region();
        } else {
            // Zero-byte file: degenerate region, nothing to ever deliver.
            descriptor.finished = true;
        }
        descriptor
    }

    /// Size of the file in bytes.
    pub fn file_size(&self) -> u64 {
        self.byte_end_global - self.byte_start_global
    }

    /// Restores the active region to the whole file.
    pub fn reset_region(&mut self) {
        self.apply_region(0, self.file_size());
    }

    /// Narrows the active region to `[rel_start, rel_end)` in the stream's
    /// own byte space. Caller validates `rel_start < rel_end <= file_size`.
    pub fn apply_region(&mut self, rel_start: u64, rel_end: u64) {
        debug_assert!(rel_start < rel_end && rel_end <= self.file_size());
        let global_start = self.byte_start_global + rel_start;
        let global_end = self.byte_start_global + rel_end;

        self.start_piece = PieceIndex::new((global_start / self.piece_length) as u32);
        self.start_offset = global_start % self.piece_length;
        self.end_piece = PieceIndex::new(((global_end - 1) / self.piece_length) as u32);
        self.end_offset = global_end - u64::from(self.end_piece.as_u32()) * self.piece_length;
        self.cursor = None;
        self.tail_return = false;
    }

    /// The piece the sequencer must deliver next.
    pub fn next_piece(&self) -> PieceIndex {
        match self.cursor {
            Some(cursor) => cursor.next(),
            None => self.start_piece,
        }
    }

    /// Whether a piece falls inside the active region.
    pub fn contains(&self, piece: PieceIndex) -> bool {
        piece >= self.start_piece && piece <= self.end_piece
    }

    /// Whether a piece is the final piece of the active region.
    pub fn is_final(&self, piece: PieceIndex) -> bool {
        piece == self.end_piece
    }

    /// The byte range of a delivered piece that belongs to this stream.
    ///
    /// Pieces may straddle two files; the first and last piece of the
    /// region are trimmed so neighboring streams never cross-contaminate.
    pub fn slice_bounds(&self, piece: PieceIndex, data_len: usize) -> std::ops::Range<usize> {
        let start = if piece == self.start_piece {
            self.start_offset as usize
        } else {
            0
        };
        let end = if piece == self.end_piece {
            (self.end_offset as usize).min(data_len)
        } else {
            data_len
        };
        start..end.max(start)
    }

    /// The active region relative to the stream's own byte space, announced
    /// downstream as the segment of an initial activation or seek.
    pub fn segment_range(&self) -> SegmentRange {
        let global_start =
            u64::from(self.start_piece.as_u32()) * self.piece_length + self.start_offset;
        let global_end = u64::from(self.end_piece.as_u32()) * self.piece_length + self.end_offset;
        SegmentRange {
            start: global_start - self.byte_start_global,
            end: global_end - self.byte_start_global,
        }
    }

    /// Marks the descriptor's state so stale deliveries can be detected.
    pub fn bump_generation(&mut self) {
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use proptest::prelude::*;

    use super::*;

    fn layout_two_files(piece_length: u64, a: u64, b: u64) -> FileLayout {
        FileLayout::new(
            piece_length,
            vec![(PathBuf::from("a.mp4"), a), (PathBuf::from("b.mkv"), b)],
        )
    }

    #[test]
    fn full_file_region_covers_partial_last_piece() {
        let layout = layout_two_files(16384, 40000, 0);
        let descriptor = StreamDescriptor::new(&layout, 0);

        assert_eq!(descriptor.start_piece, PieceIndex::new(0));
        assert_eq!(descriptor.start_offset, 0);
        assert_eq!(descriptor.end_piece, PieceIndex::new(2));
        assert_eq!(descriptor.end_offset, 40000 - 2 * 16384);
    }

    #[test]
    fn zero_byte_file_builds_a_finished_descriptor() {
        let layout = layout_two_files(16384, 40000, 0);

        let descriptor = StreamDescriptor::new(&layout, 1);

        assert_eq!(descriptor.file_size(), 0);
        assert!(descriptor.finished);
        assert_eq!(descriptor.state, StreamState::Idle);
    }

    #[test]
    fn seek_relocates_piece_and_offset() {
        let layout = layout_two_files(16384, 100000, 0);
        let mut descriptor = StreamDescriptor::new(&layout, 0);

        descriptor.apply_region(50000, 100000);

        assert_eq!(descriptor.start_piece, PieceIndex::new((50000 / 16384) as u32));
        assert_eq!(descriptor.start_offset, 50000 % 16384);
        assert!(descriptor.cursor.is_none());
    }

    #[test]
    fn shared_piece_slices_do_not_overlap() {
        // File A ends mid-piece 2; file B begins in the same piece.
        let layout = layout_two_files(16384, 40000, 30000);
        let stream_a = StreamDescriptor::new(&layout, 0);
        let stream_b = StreamDescriptor::new(&layout, 1);

        let shared = PieceIndex::new(2);
        assert_eq!(stream_a.end_piece, shared);
        assert_eq!(stream_b.start_piece, shared);

        let a_bounds = stream_a.slice_bounds(shared, 16384);
        let b_bounds = stream_b.slice_bounds(shared, 16384);
        assert_eq!(a_bounds, 0..7232);
        assert_eq!(b_bounds, 7232..16384);
    }

    #[test]
    fn single_piece_region_trims_both_ends() {
        let layout = layout_two_files(16384, 100000, 0);
        let mut descriptor = StreamDescriptor::new(&layout, 0);

        descriptor.apply_region(20000, 25000);
        assert_eq!(descriptor.start_piece, descriptor.end_piece);

        let bounds = descriptor.slice_bounds(descriptor.start_piece, 16384);
        assert_eq!(bounds, (20000 % 16384) as usize..(25000 - 16384) as usize);
    }

    #[test]
    fn segment_range_is_relative_to_stream() {
        let layout = layout_two_files(16384, 40000, 30000);
        let mut stream_b = StreamDescriptor::new(&layout, 1);

        let full = stream_b.segment_range();
        assert_eq!(full, SegmentRange { start: 0, end: 30000 });

        stream_b.apply_region(1000, 2000);
        assert_eq!(stream_b.segment_range(), SegmentRange { start: 1000, end: 2000 });
    }

    #[test]
    fn next_piece_starts_at_region_start() {
        let layout = layout_two_files(16384, 40000, 0);
        let mut descriptor = StreamDescriptor::new(&layout, 0);

        assert_eq!(descriptor.next_piece(), PieceIndex::new(0));
        descriptor.cursor = Some(PieceIndex::new(0));
        assert_eq!(descriptor.next_piece(), PieceIndex::new(1));
    }

    proptest! {
        /// Slices of a full-file region partition the file exactly: the
        /// per-piece slice lengths sum to the file size with no overlap.
        #[test]
        fn slices_partition_the_file(
            piece_length in 1u64..4096,
            size_a in 1u64..100_000,
            size_b in 1u64..100_000,
        ) {
            let layout = layout_two_files(piece_length, size_a, size_b);
            for file_index in 0..2 {
                let descriptor = StreamDescriptor::new(&layout, file_index);
                let mut total = 0usize;
                for index in descriptor.start_piece.as_u32()..=descriptor.end_piece.as_u32() {
                    let piece = PieceIndex::new(index);
                    let bounds = descriptor.slice_bounds(piece, layout.piece_size(piece));
                    total += bounds.len();
                }
                prop_assert_eq!(total as u64, layout.files[file_index].byte_size);
            }
        }

        /// Adjacent files never claim the same byte of a shared piece.
        #[test]
        fn shared_piece_has_no_gap_or_overlap(
            piece_length in 2u64..4096,
            size_a in 1u64..50_000,
            size_b in 1u64..50_000,
        ) {
            let layout = layout_two_files(piece_length, size_a, size_b);
            let stream_a = StreamDescriptor::new(&layout, 0);
            let stream_b = StreamDescriptor::new(&layout, 1);
            if stream_a.end_piece == stream_b.start_piece {
                let piece = stream_a.end_piece;
                let len = layout.piece_size(piece);
                let a_bounds = stream_a.slice_bounds(piece, len);
                let b_bounds = stream_b.slice_bounds(piece, len);
                prop_assert_eq!(a_bounds.end, b_bounds.start);
            }
        }
    }
}
