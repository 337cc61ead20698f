//! Sequence tracking and out-of-order buffering for one direction of a stream

use core::cmp::{self, Ordering};
use std::collections::BTreeMap;

/// Compares two sequence numbers in the modular 32-bit sequence space
///
/// `a` is less than `b` if `b` lies less than 2^31 bytes ahead of `a`
pub fn seq_compare(a: u32, b: u32) -> Ordering {
    (a.wrapping_sub(b) as i32).cmp(&0)
}

/// Where the bytes of a segment ended up
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
    /// The segment started at (or before) the next expected sequence number and some of its bytes
    /// are now ready
    InOrder,
    /// The segment starts past a gap; its new bytes were buffered
    OutOfOrder,
    /// Every byte of the segment had already been seen
    Duplicate,
}

/// Reorders the bytes of a unidirectional sequence space
///
/// Buffered chunks are keyed by their absolute offset in the stream, which doesn't wrap around,
/// and never overlap one another.
#[derive(Clone, Debug, Default)]
pub struct DataTracker {
    // next expected sequence number
    seq: u32,
    // absolute stream offset of `seq`
    offset: u64,
    chunks: BTreeMap<u64, Vec<u8>>,
    buffered: usize,
    payload: Vec<u8>,
}

impl DataTracker {
    /// Creates a tracker that expects `seq` next
    pub fn new(seq: u32) -> Self {
        DataTracker {
            seq,
            ..DataTracker::default()
        }
    }

    /// Next expected sequence number
    pub fn sequence_number(&self) -> u32 {
        self.seq
    }

    /// Total number of bytes made ready so far
    pub fn delivered(&self) -> u64 {
        self.offset
    }

    /// Bytes that are ready to be consumed
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Mutable access to the ready bytes; consumers drain them at their own pace
    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }

    /// Number of bytes held in out-of-order chunks
    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    /// Number of out-of-order chunks
    pub fn buffered_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Iterates over the buffered chunks as `(sequence number, bytes)`, in sequence order
    pub fn buffered(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        let (seq, offset) = (self.seq, self.offset);
        self.chunks
            .iter()
            .map(move |(&key, data)| (seq.wrapping_add((key - offset) as u32), &data[..]))
    }

    /// Feeds the bytes of a segment that starts at `seq`
    pub fn process(&mut self, seq: u32, mut data: &[u8]) -> Placement {
        let diff = seq.wrapping_sub(self.seq) as i32;

        if diff <= 0 {
            // the head of the segment has already been seen
            let seen = diff.unsigned_abs() as usize;
            if seen >= data.len() {
                return Placement::Duplicate;
            }

            data = &data[seen..];
            self.advance(data);
            self.drain();
            return Placement::InOrder;
        }

        let start = self.offset + diff as u64;
        if self.buffer(start, data) {
            Placement::OutOfOrder
        } else {
            Placement::Duplicate
        }
    }

    /// Drops the out-of-order chunks; ready bytes and the stream offset are kept
    pub fn clear_buffered(&mut self) {
        self.chunks.clear();
        self.buffered = 0;
    }

    /// Gives up on the bytes before `seq`
    ///
    /// Buffered chunks that end before `seq` are dropped; those that straddle it are trimmed and
    /// become ready. Does nothing if `seq` is not ahead of the next expected sequence number.
    pub fn skip_to(&mut self, seq: u32) {
        let diff = seq.wrapping_sub(self.seq) as i32;
        if diff <= 0 {
            return;
        }

        self.seq = seq;
        self.offset += diff as u64;
        self.drain();
    }

    // appends in-order bytes to the ready payload
    fn advance(&mut self, data: &[u8]) {
        self.payload.extend_from_slice(data);
        self.seq = self.seq.wrapping_add(data.len() as u32);
        self.offset += data.len() as u64;
    }

    // moves the chunks that became contiguous into the ready payload
    fn drain(&mut self) {
        while let Some(entry) = self.chunks.first_entry() {
            let start = *entry.key();
            if start > self.offset {
                break;
            }

            let data = entry.remove();
            self.buffered -= data.len();

            let end = start + data.len() as u64;
            if end > self.offset {
                let skip = (self.offset - start) as usize;
                self.advance(&data[skip..]);
            }
        }
    }

    // stores the bytes of `start..start + data.len()` not covered by earlier chunks
    fn buffer(&mut self, start: u64, data: &[u8]) -> bool {
        let end = start + data.len() as u64;

        let mut cursor = start;
        if let Some((&key, chunk)) = self.chunks.range(..start).next_back() {
            cursor = cmp::max(cursor, key + chunk.len() as u64);
        }

        let mut gaps = vec![];
        for (&key, chunk) in self.chunks.range(start..end) {
            if key > cursor {
                gaps.push(cursor..key);
            }
            cursor = cmp::max(cursor, key + chunk.len() as u64);
        }
        if cursor < end {
            gaps.push(cursor..end);
        }

        for gap in &gaps {
            let bytes = &data[(gap.start - start) as usize..(gap.end - start) as usize];
            self.buffered += bytes.len();
            self.chunks.insert(gap.start, bytes.to_owned());
        }

        !gaps.is_empty()
    }
}
