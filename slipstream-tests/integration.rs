//! Integration tests for Slipstream
//!
//! These tests drive the whole scheduler (simulated engine, alert pump,
//! window manager, sequencer, and sink) through the scenarios a player
//! would produce: linear playback, stream switching, seeking, buffering
//! stalls, and torrent removal.

#[path = "integration/support.rs"]
mod support;

#[path = "integration/backpressure.rs"]
mod backpressure;
#[path = "integration/buffering_convergence.rs"]
mod buffering_convergence;
#[path = "integration/end_to_end.rs"]
mod end_to_end;
#[path = "integration/seek.rs"]
mod seek;
#[path = "integration/shared_piece.rs"]
mod shared_piece;
#[path = "integration/stream_switch.rs"]
mod stream_switch;
#[path = "integration/tail_policy.rs"]
mod tail_policy;
#[path = "integration/torrent_removal.rs"]
mod torrent_removal;
