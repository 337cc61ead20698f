//! One direction of a TCP stream

use core::cmp::Ordering;

use tracing::trace;

use crate::{
    reassembly::{
        stream::Endpoint,
        tracker::{seq_compare, DataTracker, Placement},
    },
    tcp::{self, Flags},
};

/// State of one direction of a stream
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlowState {
    /// No handshake segment seen yet
    Unestablished,
    /// SYN seen, waiting for the handshake to complete
    SynSent,
    /// Handshake complete, or flow attached late
    Established,
    /// Every byte up to and including a FIN has been made ready
    FinSent,
    /// Reset
    Closed,
}

/// What processing a segment did to a flow
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Progress {
    /// Control segment or ignored data; no bytes changed hands
    Control,
    /// The segment's bytes were fed to the tracker
    Data(Placement),
}

/// The bytes sent by one endpoint of a stream towards the other one
#[derive(Clone, Debug)]
pub struct Flow {
    destination: Endpoint,
    state: FlowState,
    tracker: DataTracker,
    mss: Option<u16>,
    sack_permitted: bool,
    ignore_data: bool,
    fin: Option<u32>,
}

impl Flow {
    /// Creates a flow towards `destination` whose next expected sequence number is `seq`
    pub fn new(destination: Endpoint, seq: u32) -> Self {
        Flow {
            destination,
            state: FlowState::Unestablished,
            tracker: DataTracker::new(seq),
            mss: None,
            sack_permitted: false,
            ignore_data: false,
            fin: None,
        }
    }

    /* Getters */
    /// Endpoint that receives the bytes of this flow
    pub fn destination(&self) -> Endpoint {
        self.destination
    }

    /// Current state
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Next expected sequence number
    pub fn sequence_number(&self) -> u32 {
        self.tracker.sequence_number()
    }

    /// Bytes ready to be consumed
    pub fn payload(&self) -> &[u8] {
        self.tracker.payload()
    }

    /// Ready bytes, for consumers that drain them partially
    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        self.tracker.payload_mut()
    }

    /// Total number of bytes made ready so far
    pub fn delivered(&self) -> u64 {
        self.tracker.delivered()
    }

    /// Number of bytes waiting for a gap to be filled
    pub fn buffered_bytes(&self) -> usize {
        self.tracker.buffered_bytes()
    }

    /// Number of out-of-order chunks waiting for a gap to be filled
    pub fn buffered_chunks(&self) -> usize {
        self.tracker.buffered_chunks()
    }

    /// Iterates over the out-of-order chunks as `(sequence number, bytes)`
    pub fn buffered(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.tracker.buffered()
    }

    /// Maximum Segment Size announced in this flow's SYN
    pub fn mss(&self) -> Option<u16> {
        self.mss
    }

    /// Whether this flow's SYN carried the SACK Permitted option
    pub fn sack_permitted(&self) -> bool {
        self.sack_permitted
    }

    /// Whether this flow's payloads are being dropped
    pub fn is_ignoring_data(&self) -> bool {
        self.ignore_data
    }

    /// Whether a FIN has been made ready, or the flow was reset
    pub fn is_finished(&self) -> bool {
        match self.state {
            FlowState::FinSent | FlowState::Closed => true,
            _ => false,
        }
    }

    /* Setters */
    /// Stops (or resumes) buffering and delivering the payloads of this flow
    ///
    /// Ignoring data drops the out-of-order chunks. Bytes already made ready stay available
    pub fn ignore_data(&mut self, ignore: bool) {
        self.ignore_data = ignore;
        if ignore {
            self.tracker.clear_buffered();
        }
    }

    /// Gives up on the missing bytes before `seq`
    pub fn advance_sequence(&mut self, seq: u32) {
        self.tracker.skip_to(seq);
        self.check_fin();
    }

    pub(crate) fn set_state(&mut self, state: FlowState) {
        self.state = state;
    }

    /* Processing */
    /// Feeds a segment sent by this flow's source, `payload` being its data
    pub fn process(&mut self, segment: &tcp::Segment, payload: &[u8]) -> Progress {
        let flags = segment.get_flags();
        let seq = segment.get_seq();

        if flags.contains(Flags::RST) {
            trace!(dst = %self.destination, "flow reset");
            self.state = FlowState::Closed;
            return Progress::Control;
        }

        if flags.contains(Flags::SYN) {
            if self.state == FlowState::Unestablished {
                self.tracker = DataTracker::new(seq.wrapping_add(1));
                self.mss = segment.mss().ok();
                self.sack_permitted = segment.sack_permitted();
                self.state = if flags.contains(Flags::ACK) {
                    FlowState::Established
                } else {
                    FlowState::SynSent
                };
            }

            return Progress::Control;
        }

        if self.state == FlowState::Unestablished {
            trace!(dst = %self.destination, "segment before handshake dropped");
            return Progress::Control;
        }

        if self.state == FlowState::SynSent && flags.contains(Flags::ACK) {
            self.state = FlowState::Established;
        }

        let progress = if payload.is_empty() || self.ignore_data || self.is_finished() {
            Progress::Control
        } else {
            Progress::Data(self.tracker.process(seq, payload))
        };

        if flags.contains(Flags::FIN) && self.fin.is_none() {
            self.fin = Some(seq.wrapping_add(payload.len() as u32));
        }
        self.check_fin();

        progress
    }

    // a FIN counts once every byte before it is ready
    fn check_fin(&mut self) {
        let fin = match self.fin {
            Some(fin) => fin,
            None => return,
        };

        let ready = self.ignore_data
            || seq_compare(self.tracker.sequence_number(), fin) != Ordering::Less;
        if ready && !self.is_finished() {
            trace!(dst = %self.destination, "flow finished");
            self.state = FlowState::FinSent;
        }
    }
}
