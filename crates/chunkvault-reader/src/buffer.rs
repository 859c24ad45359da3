//! Playout Buffer - Ordered Emission State Machine
//!
//! The buffer holds complete chunks and emits them to the playout consumer
//! in strict sequence order, whatever order the downloads completed in.
//! Playback state is an explicit machine:
//!
//! ```text
//! Buffering ──(buffered >= start_playback)──► Playing
//! Playing ──(next chunk absent at the clock tick)──► Stalled   [stall++]
//! Stalled ──(next chunk arrives or is skipped)──► Playing
//! Playing ──(last chunk emitted)──► Finished
//! ```
//!
//! A chunk whose every replica failed is marked unavailable; the playout
//! clock records one stall for the gap and continues with later chunks.

use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};

use chunkvault_core::ChunkId;

/// Playback lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Buffering,
    Playing,
    Stalled,
    Finished,
}

/// A chunk ready for playout.
#[derive(Debug, Clone)]
pub struct BufferedChunk {
    pub chunk_id: ChunkId,
    pub sequence: u64,
    pub data: Bytes,
}

/// What the playout clock got this tick.
#[derive(Debug)]
pub enum PlayoutEvent {
    /// The next-sequence chunk, in order.
    Chunk(BufferedChunk),
    /// A permanently failed chunk was skipped; one stall was recorded.
    Gap(u64),
    /// The next chunk is not here yet; the session is now stalled.
    Stall,
    /// Every sequence has been emitted or skipped.
    Finished,
}

/// Fixed-depth ordered playout buffer.
pub struct PlayoutBuffer {
    chunks: BTreeMap<u64, BufferedChunk>,
    unavailable: HashSet<u64>,
    next_sequence: u64,
    total_chunks: u64,
    state: PlaybackState,
    stall_count: u64,
    chunk_duration_sec: u64,
    start_playback_sec: u64,
    low_water_sec: u64,
    target_sec: u64,
}

impl PlayoutBuffer {
    pub fn new(
        total_chunks: u64,
        chunk_duration_sec: u64,
        start_playback_sec: u64,
        low_water_sec: u64,
        target_sec: u64,
    ) -> Self {
        let state = if total_chunks == 0 {
            PlaybackState::Finished
        } else {
            PlaybackState::Buffering
        };
        Self {
            chunks: BTreeMap::new(),
            unavailable: HashSet::new(),
            next_sequence: 0,
            total_chunks,
            state,
            stall_count: 0,
            chunk_duration_sec,
            start_playback_sec,
            low_water_sec,
            target_sec,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn stall_count(&self) -> u64 {
        self.stall_count
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Seconds of playout currently buffered.
    pub fn buffered_seconds(&self) -> u64 {
        self.chunks.len() as u64 * self.chunk_duration_sec
    }

    /// Below the low-water mark the session prioritizes refill over
    /// prefetch.
    pub fn needs_refill(&self) -> bool {
        self.buffered_seconds() < self.low_water_sec
    }

    /// Prefetch is paused once the buffer reaches its target depth.
    pub fn prefetch_allowed(&self) -> bool {
        self.buffered_seconds() < self.target_sec
    }

    /// True when `sequence` is buffered, emitted, or known unavailable.
    pub fn is_settled(&self, sequence: u64) -> bool {
        sequence < self.next_sequence
            || self.chunks.contains_key(&sequence)
            || self.unavailable.contains(&sequence)
    }

    /// Sequences worth downloading next: not settled, lowest first.
    pub fn wanted_sequences(&self, limit: usize) -> Vec<u64> {
        (self.next_sequence..self.total_chunks)
            .filter(|seq| !self.is_settled(*seq))
            .take(limit)
            .collect()
    }

    /// Insert a downloaded chunk. Rejects already-played sequences and
    /// duplicates. Arrival of the next-sequence chunk ends a stall.
    pub fn insert(&mut self, chunk_id: ChunkId, sequence: u64, data: Bytes) -> bool {
        if sequence < self.next_sequence || self.chunks.contains_key(&sequence) {
            return false;
        }
        self.chunks.insert(
            sequence,
            BufferedChunk {
                chunk_id,
                sequence,
                data,
            },
        );
        if self.state == PlaybackState::Stalled && sequence == self.next_sequence {
            self.state = PlaybackState::Playing;
        }
        if self.state == PlaybackState::Buffering
            && self.buffered_seconds() >= self.start_playback_sec
        {
            self.state = PlaybackState::Playing;
        }
        true
    }

    /// Start playback regardless of the threshold. Used when every chunk is
    /// already settled and the stream is shorter than the start threshold.
    pub fn begin_playback(&mut self) {
        if self.state == PlaybackState::Buffering {
            self.state = PlaybackState::Playing;
        }
    }

    /// Mark a sequence permanently failed; the playout clock will skip it
    /// with a recorded stall.
    pub fn mark_unavailable(&mut self, sequence: u64) {
        if sequence >= self.next_sequence {
            self.unavailable.insert(sequence);
            // The gap the consumer was stalled on can now be skipped.
            if self.state == PlaybackState::Stalled && sequence == self.next_sequence {
                self.state = PlaybackState::Playing;
            }
        }
    }

    /// One playout-clock tick: emit the next chunk, skip a known gap, or
    /// stall. Only meaningful once playback has started.
    pub fn advance(&mut self) -> PlayoutEvent {
        if self.state == PlaybackState::Finished {
            return PlayoutEvent::Finished;
        }
        if self.next_sequence >= self.total_chunks {
            self.state = PlaybackState::Finished;
            return PlayoutEvent::Finished;
        }

        if let Some(chunk) = self.chunks.remove(&self.next_sequence) {
            self.next_sequence += 1;
            if self.next_sequence >= self.total_chunks && self.chunks.is_empty() {
                self.state = PlaybackState::Finished;
            }
            return PlayoutEvent::Chunk(chunk);
        }

        if self.unavailable.remove(&self.next_sequence) {
            let skipped = self.next_sequence;
            self.next_sequence += 1;
            self.stall_count += 1;
            if self.next_sequence >= self.total_chunks && self.chunks.is_empty() {
                self.state = PlaybackState::Finished;
            }
            return PlayoutEvent::Gap(skipped);
        }

        // Demanded and absent: a stall. Count only the transition.
        if self.state != PlaybackState::Stalled {
            self.state = PlaybackState::Stalled;
            self.stall_count += 1;
        }
        PlayoutEvent::Stall
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_id(seq: u64) -> ChunkId {
        ChunkId::parse(format!("c_{seq}")).unwrap()
    }

    fn buffer(total: u64) -> PlayoutBuffer {
        // 10s chunks, start at 10s, low water 15s, target 30s.
        PlayoutBuffer::new(total, 10, 10, 15, 30)
    }

    fn insert(buf: &mut PlayoutBuffer, seq: u64) -> bool {
        buf.insert(chunk_id(seq), seq, Bytes::from(format!("data-{seq}")))
    }

    // ---------------------------------------------------------------
    // State transitions
    // ---------------------------------------------------------------

    #[test]
    fn test_starts_buffering() {
        let buf = buffer(5);
        assert_eq!(buf.state(), PlaybackState::Buffering);
    }

    #[test]
    fn test_playback_starts_at_threshold() {
        let mut buf = buffer(5);
        assert!(insert(&mut buf, 0));
        // One 10s chunk meets the 10s start threshold.
        assert_eq!(buf.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_stall_on_missing_next_chunk() {
        let mut buf = buffer(5);
        insert(&mut buf, 0);
        assert!(matches!(buf.advance(), PlayoutEvent::Chunk(_)));
        // Chunk 1 never arrived.
        assert!(matches!(buf.advance(), PlayoutEvent::Stall));
        assert_eq!(buf.state(), PlaybackState::Stalled);
        assert_eq!(buf.stall_count(), 1);
        // Stalling again does not double-count.
        assert!(matches!(buf.advance(), PlayoutEvent::Stall));
        assert_eq!(buf.stall_count(), 1);
    }

    #[test]
    fn test_arrival_ends_stall() {
        let mut buf = buffer(5);
        insert(&mut buf, 0);
        let _ = buf.advance();
        let _ = buf.advance(); // stalled on 1
        insert(&mut buf, 1);
        assert_eq!(buf.state(), PlaybackState::Playing);
        match buf.advance() {
            PlayoutEvent::Chunk(c) => assert_eq!(c.sequence, 1),
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_finished_after_last_chunk() {
        let mut buf = buffer(2);
        insert(&mut buf, 0);
        insert(&mut buf, 1);
        assert!(matches!(buf.advance(), PlayoutEvent::Chunk(_)));
        assert!(matches!(buf.advance(), PlayoutEvent::Chunk(_)));
        assert_eq!(buf.state(), PlaybackState::Finished);
        assert!(matches!(buf.advance(), PlayoutEvent::Finished));
    }

    #[test]
    fn test_zero_chunk_stream_is_finished() {
        let buf = buffer(0);
        assert_eq!(buf.state(), PlaybackState::Finished);
    }

    // ---------------------------------------------------------------
    // Ordering
    // ---------------------------------------------------------------

    #[test]
    fn test_out_of_order_arrival_emits_in_order() {
        let mut buf = buffer(4);
        insert(&mut buf, 2);
        insert(&mut buf, 0);
        insert(&mut buf, 3);
        insert(&mut buf, 1);
        let mut seen = Vec::new();
        loop {
            match buf.advance() {
                PlayoutEvent::Chunk(c) => seen.push(c.sequence),
                PlayoutEvent::Finished => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_never_emits_sequence_before_predecessor() {
        let mut buf = buffer(3);
        insert(&mut buf, 1);
        insert(&mut buf, 2);
        // 0 missing: must stall rather than emit 1.
        assert!(matches!(buf.advance(), PlayoutEvent::Stall));
    }

    #[test]
    fn test_rejects_duplicate_and_old_chunks() {
        let mut buf = buffer(3);
        assert!(insert(&mut buf, 0));
        assert!(!insert(&mut buf, 0)); // duplicate
        let _ = buf.advance();
        assert!(!insert(&mut buf, 0)); // already played
    }

    // ---------------------------------------------------------------
    // Gaps
    // ---------------------------------------------------------------

    #[test]
    fn test_gap_records_one_stall_and_continues() {
        let mut buf = buffer(3);
        insert(&mut buf, 0);
        insert(&mut buf, 2);
        buf.mark_unavailable(1);
        assert!(matches!(buf.advance(), PlayoutEvent::Chunk(_)));
        match buf.advance() {
            PlayoutEvent::Gap(seq) => assert_eq!(seq, 1),
            other => panic!("expected gap, got {other:?}"),
        }
        assert_eq!(buf.stall_count(), 1);
        match buf.advance() {
            PlayoutEvent::Chunk(c) => assert_eq!(c.sequence, 2),
            other => panic!("expected chunk 2, got {other:?}"),
        }
    }

    #[test]
    fn test_unavailable_while_stalled_resumes() {
        let mut buf = buffer(3);
        insert(&mut buf, 0);
        let _ = buf.advance();
        let _ = buf.advance(); // stalled on 1
        assert_eq!(buf.stall_count(), 1);
        buf.mark_unavailable(1);
        assert_eq!(buf.state(), PlaybackState::Playing);
        assert!(matches!(buf.advance(), PlayoutEvent::Gap(1)));
    }

    // ---------------------------------------------------------------
    // Watermarks and wanted sequences
    // ---------------------------------------------------------------

    #[test]
    fn test_watermarks() {
        let mut buf = buffer(10);
        assert!(buf.needs_refill());
        assert!(buf.prefetch_allowed());
        insert(&mut buf, 0);
        insert(&mut buf, 1); // 20s buffered
        assert!(!buf.needs_refill());
        assert!(buf.prefetch_allowed());
        insert(&mut buf, 2); // 30s buffered: at target
        assert!(!buf.prefetch_allowed());
    }

    #[test]
    fn test_wanted_sequences_skips_settled() {
        let mut buf = buffer(6);
        insert(&mut buf, 1);
        buf.mark_unavailable(2);
        assert_eq!(buf.wanted_sequences(3), vec![0, 3, 4]);
    }
}
