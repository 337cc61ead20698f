//! A bidirectional TCP stream and its callbacks

use core::fmt;
use std::time::Duration;

use hash32_derive::Hash32;
use tracing::{debug, trace};

use crate::{
    ipv4,
    reassembly::{
        flow::{Flow, FlowState, Progress},
        tracker::Placement,
    },
    tcp::{self, Flags},
    Error, Result,
};

/// Called when a stream has new in-order data, or when it's closed
pub type StreamCallback = Box<dyn FnMut(&mut Stream) + Send>;

/// Called with the sequence number and bytes of every out-of-order segment
pub type OutOfOrderCallback = Box<dyn FnMut(&mut Stream, u32, &[u8]) + Send>;

/// IPv4 address and TCP port
#[derive(Clone, Copy, Debug, Eq, Hash, Hash32, Ord, PartialEq, PartialOrd)]
pub struct Endpoint {
    /// Address
    pub addr: ipv4::Addr,
    /// Port
    pub port: u16,
}

impl Endpoint {
    /// Creates a new endpoint
    pub fn new(addr: ipv4::Addr, port: u16) -> Self {
        Endpoint { addr, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Identity of a stream: the unordered pair of its endpoints
///
/// Both directions of a stream map to the same identity.
#[derive(Clone, Copy, Debug, Eq, Hash, Hash32, PartialEq)]
pub struct StreamId {
    lower: Endpoint,
    upper: Endpoint,
}

impl StreamId {
    /// Identity of the stream between `a` and `b`
    pub fn new(a: Endpoint, b: Endpoint) -> Self {
        if a <= b {
            StreamId { lower: a, upper: b }
        } else {
            StreamId { lower: b, upper: a }
        }
    }

    /// The endpoints, in no particular order
    pub fn endpoints(&self) -> (Endpoint, Endpoint) {
        (self.lower, self.upper)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.lower, self.upper)
    }
}

/// Direction of a segment within its stream
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Sent by the endpoint that opened the stream
    ClientToServer,
    /// Sent by the other endpoint
    ServerToClient,
}

/// A TCP stream: two flows plus the callbacks that consume their data
pub struct Stream {
    client: Endpoint,
    server: Endpoint,
    client_flow: Flow,
    server_flow: Flow,
    created: Duration,
    last_seen: Duration,
    partial: bool,
    auto_cleanup: bool,
    on_client_data: Option<StreamCallback>,
    on_server_data: Option<StreamCallback>,
    on_client_out_of_order: Option<OutOfOrderCallback>,
    on_server_out_of_order: Option<OutOfOrderCallback>,
    on_closed: Option<StreamCallback>,
}

impl Stream {
    /* Constructors */
    /// Stream opened by `client`; both flows wait for their handshake segments
    pub fn new(client: Endpoint, server: Endpoint, ts: Duration) -> Self {
        Stream {
            client,
            server,
            client_flow: Flow::new(server, 0),
            server_flow: Flow::new(client, 0),
            created: ts,
            last_seen: ts,
            partial: false,
            auto_cleanup: true,
            on_client_data: None,
            on_server_data: None,
            on_client_out_of_order: None,
            on_server_out_of_order: None,
            on_closed: None,
        }
    }

    /// Stream attached to mid-connection; `segment` is the first segment seen, sent by `client`
    ///
    /// The client flow resumes at the segment's sequence number and the server flow at its
    /// acknowledgment number.
    pub fn partial(client: Endpoint, server: Endpoint, segment: &tcp::Segment, ts: Duration) -> Self {
        let mut stream = Stream::new(client, server, ts);
        stream.partial = true;

        stream.client_flow = Flow::new(server, segment.get_seq());
        stream.client_flow.set_state(FlowState::Established);
        stream.server_flow = Flow::new(client, segment.get_ack());
        stream.server_flow.set_state(FlowState::Established);

        stream
    }

    /* Getters */
    /// Endpoint that opened the stream (or sent the first segment seen)
    pub fn client(&self) -> Endpoint {
        self.client
    }

    /// The other endpoint
    pub fn server(&self) -> Endpoint {
        self.server
    }

    /// Identity of this stream
    pub fn id(&self) -> StreamId {
        StreamId::new(self.client, self.server)
    }

    /// Bytes sent by the client
    pub fn client_flow(&self) -> &Flow {
        &self.client_flow
    }

    /// Bytes sent by the client, for modification
    pub fn client_flow_mut(&mut self) -> &mut Flow {
        &mut self.client_flow
    }

    /// Bytes sent by the server
    pub fn server_flow(&self) -> &Flow {
        &self.server_flow
    }

    /// Bytes sent by the server, for modification
    pub fn server_flow_mut(&mut self) -> &mut Flow {
        &mut self.server_flow
    }

    /// Ready bytes sent by the client
    pub fn client_payload(&self) -> &[u8] {
        self.client_flow.payload()
    }

    /// Ready bytes sent by the server
    pub fn server_payload(&self) -> &[u8] {
        self.server_flow.payload()
    }

    /// Timestamp of the segment that created this stream
    pub fn created(&self) -> Duration {
        self.created
    }

    /// Timestamp of the latest segment
    pub fn last_seen(&self) -> Duration {
        self.last_seen
    }

    /// Whether the stream was attached to mid-connection
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Whether both flows completed their handshake
    pub fn is_established(&self) -> bool {
        self.client_flow.state() != FlowState::Unestablished
            && self.client_flow.state() != FlowState::SynSent
            && self.server_flow.state() != FlowState::Unestablished
            && self.server_flow.state() != FlowState::SynSent
    }

    /// Whether the stream is over: both flows sent a FIN, or either one was reset
    pub fn is_finished(&self) -> bool {
        let reset = self.client_flow.state() == FlowState::Closed
            || self.server_flow.state() == FlowState::Closed;

        reset || (self.client_flow.is_finished() && self.server_flow.is_finished())
    }

    /// Direction of a segment sent by `source`
    pub fn direction(&self, source: Endpoint) -> Direction {
        if source == self.client {
            Direction::ClientToServer
        } else {
            Direction::ServerToClient
        }
    }

    /* Settings */
    /// Whether the ready bytes are discarded after every data callback (default: `true`)
    ///
    /// Turn it off to let the data accumulate and consume it at your own pace through
    /// `client_flow_mut().payload_mut()`.
    pub fn auto_cleanup_payloads(&mut self, cleanup: bool) {
        self.auto_cleanup = cleanup;
    }

    /// Drops the payloads sent by the client
    pub fn ignore_client_data(&mut self) {
        self.client_flow.ignore_data(true);
    }

    /// Drops the payloads sent by the server
    pub fn ignore_server_data(&mut self) {
        self.server_flow.ignore_data(true);
    }

    /* Callbacks */
    /// Sets the callback invoked when the client flow has new in-order data
    pub fn on_client_data<F>(&mut self, f: F)
    where
        F: FnMut(&mut Stream) + Send + 'static,
    {
        self.on_client_data = Some(Box::new(f));
    }

    /// Sets the callback invoked when the server flow has new in-order data
    pub fn on_server_data<F>(&mut self, f: F)
    where
        F: FnMut(&mut Stream) + Send + 'static,
    {
        self.on_server_data = Some(Box::new(f));
    }

    /// Sets the callback invoked for out-of-order client segments
    pub fn on_client_out_of_order<F>(&mut self, f: F)
    where
        F: FnMut(&mut Stream, u32, &[u8]) + Send + 'static,
    {
        self.on_client_out_of_order = Some(Box::new(f));
    }

    /// Sets the callback invoked for out-of-order server segments
    pub fn on_server_out_of_order<F>(&mut self, f: F)
    where
        F: FnMut(&mut Stream, u32, &[u8]) + Send + 'static,
    {
        self.on_server_out_of_order = Some(Box::new(f));
    }

    /// Sets the callback invoked once the stream is finished
    pub fn on_closed<F>(&mut self, f: F)
    where
        F: FnMut(&mut Stream) + Send + 'static,
    {
        self.on_closed = Some(Box::new(f));
    }

    /* Processing */
    /// Feeds a segment sent in `direction`, `payload` being its data
    ///
    /// New in-order data goes to the data callback of that direction. Without one, the data is
    /// kept if `auto_cleanup_payloads` is off and `CallbackNotSet` is returned otherwise. The
    /// segment is fully processed (closed callback included) before that error is reported.
    pub fn process_segment(
        &mut self,
        direction: Direction,
        segment: &tcp::Segment,
        payload: &[u8],
        ts: Duration,
    ) -> Result<()> {
        let was_finished = self.is_finished();
        self.last_seen = ts;

        let progress = self.flow_mut(direction).process(segment, payload);
        let mut delivered = Ok(());
        match progress {
            Progress::Data(Placement::InOrder) => delivered = self.deliver(direction),
            Progress::Data(Placement::OutOfOrder) => {
                debug!(stream = %self.id(), ?direction, seq = segment.get_seq(), "out of order segment");
                self.out_of_order(direction, segment.get_seq(), payload);
            }
            Progress::Data(Placement::Duplicate) => {
                trace!(stream = %self.id(), ?direction, "retransmission dropped");
            }
            Progress::Control => {}
        }

        // a FIN may have been pulled in by a gap being filled
        if !was_finished && self.is_finished() {
            debug!(stream = %self.id(), rst = segment.has_flags(Flags::RST), "stream closed");
            self.closed();
        }

        delivered
    }

    fn flow_mut(&mut self, direction: Direction) -> &mut Flow {
        match direction {
            Direction::ClientToServer => &mut self.client_flow,
            Direction::ServerToClient => &mut self.server_flow,
        }
    }

    fn deliver(&mut self, direction: Direction) -> Result<()> {
        let slot = match direction {
            Direction::ClientToServer => &mut self.on_client_data,
            Direction::ServerToClient => &mut self.on_server_data,
        };

        let mut callback = match slot.take() {
            Some(callback) => callback,
            None if self.auto_cleanup => return Err(Error::CallbackNotSet),
            None => return Ok(()),
        };

        callback(self);

        // the callback may have installed a replacement
        let slot = match direction {
            Direction::ClientToServer => &mut self.on_client_data,
            Direction::ServerToClient => &mut self.on_server_data,
        };
        if slot.is_none() {
            *slot = Some(callback);
        }

        if self.auto_cleanup {
            self.flow_mut(direction).payload_mut().clear();
        }

        Ok(())
    }

    fn out_of_order(&mut self, direction: Direction, seq: u32, payload: &[u8]) {
        let slot = match direction {
            Direction::ClientToServer => &mut self.on_client_out_of_order,
            Direction::ServerToClient => &mut self.on_server_out_of_order,
        };

        if let Some(mut callback) = slot.take() {
            callback(self, seq, payload);

            let slot = match direction {
                Direction::ClientToServer => &mut self.on_client_out_of_order,
                Direction::ServerToClient => &mut self.on_server_out_of_order,
            };
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }

    fn closed(&mut self) {
        if let Some(mut callback) = self.on_closed.take() {
            callback(self);
            if self.on_closed.is_none() {
                self.on_closed = Some(callback);
            }
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("reassembly::Stream")
            .field("client", &self.client)
            .field("server", &self.server)
            .field("client_flow", &self.client_flow)
            .field("server_flow", &self.server_flow)
            .field("created", &self.created)
            .field("last_seen", &self.last_seen)
            .field("partial", &self.partial)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::{
        ipv4,
        reassembly::{
            flow::FlowState,
            stream::{Direction, Endpoint, Stream, StreamId},
        },
        tcp::{self, Flags},
        Error,
    };

    const CLIENT: Endpoint = Endpoint {
        addr: ipv4::Addr([10, 0, 0, 1]),
        port: 40000,
    };
    const SERVER: Endpoint = Endpoint {
        addr: ipv4::Addr([10, 0, 0, 2]),
        port: 80,
    };

    fn segment(seq: u32, ack: u32, flags: Flags) -> tcp::Segment {
        let mut tcp = tcp::Segment::new(0, 0);
        tcp.set_seq(seq);
        tcp.set_ack(ack);
        tcp.set_flags(flags);
        tcp
    }

    fn established() -> Stream {
        let ts = Duration::from_secs(1);
        let mut stream = Stream::new(CLIENT, SERVER, ts);
        let c2s = Direction::ClientToServer;
        let s2c = Direction::ServerToClient;

        stream
            .process_segment(c2s, &segment(99, 0, Flags::SYN), &[], ts)
            .unwrap();
        stream
            .process_segment(s2c, &segment(499, 100, Flags::SYN | Flags::ACK), &[], ts)
            .unwrap();
        stream
            .process_segment(c2s, &segment(100, 500, Flags::ACK), &[], ts)
            .unwrap();
        stream
    }

    #[test]
    fn id_is_unordered() {
        assert_eq!(StreamId::new(CLIENT, SERVER), StreamId::new(SERVER, CLIENT));
        assert_eq!(
            format!("{}", StreamId::new(SERVER, CLIENT)),
            "10.0.0.1:40000 <-> 10.0.0.2:80"
        );
    }

    #[test]
    fn handshake() {
        let stream = established();

        assert!(stream.is_established());
        assert!(!stream.is_partial());
        assert_eq!(stream.client_flow().sequence_number(), 100);
        assert_eq!(stream.server_flow().sequence_number(), 500);
        assert_eq!(stream.direction(SERVER), Direction::ServerToClient);
    }

    #[test]
    fn data_callbacks() {
        let mut stream = established();
        let seen = Arc::new(Mutex::new(vec![]));

        let sink = seen.clone();
        stream.on_client_data(move |stream| {
            sink.lock().unwrap().extend_from_slice(stream.client_payload());
        });

        let ts = Duration::from_secs(2);
        stream
            .process_segment(Direction::ClientToServer, &segment(100, 500, Flags::ACK), b"GET", ts)
            .unwrap();
        stream
            .process_segment(Direction::ClientToServer, &segment(103, 500, Flags::ACK), b" /", ts)
            .unwrap();

        assert_eq!(&seen.lock().unwrap()[..], b"GET /");
        // consumed payloads are dropped
        assert_eq!(stream.client_payload(), b"");
        assert_eq!(stream.last_seen(), ts);
    }

    #[test]
    fn missing_callback() {
        let mut stream = established();
        let ts = Duration::from_secs(2);

        assert_eq!(
            stream.process_segment(Direction::ServerToClient, &segment(500, 103, Flags::ACK), b"200", ts),
            Err(Error::CallbackNotSet)
        );

        stream.auto_cleanup_payloads(false);
        stream
            .process_segment(Direction::ServerToClient, &segment(503, 103, Flags::ACK), b" OK", ts)
            .unwrap();
        assert_eq!(stream.server_payload(), b"200 OK");
    }

    #[test]
    fn out_of_order_callback() {
        let mut stream = established();
        let seen = Arc::new(Mutex::new(vec![]));

        let sink = seen.clone();
        stream.on_client_out_of_order(move |_, seq, payload| {
            sink.lock().unwrap().push((seq, payload.to_vec()));
        });
        stream.auto_cleanup_payloads(false);

        let ts = Duration::from_secs(2);
        stream
            .process_segment(Direction::ClientToServer, &segment(110, 500, Flags::ACK), b"late", ts)
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(110u32, b"late".to_vec())]);
        assert_eq!(stream.client_flow().buffered_bytes(), 4);
    }

    #[test]
    fn close() {
        let mut stream = established();
        let closed = Arc::new(Mutex::new(0));

        let count = closed.clone();
        stream.on_closed(move |_| *count.lock().unwrap() += 1);

        let ts = Duration::from_secs(3);
        stream
            .process_segment(Direction::ClientToServer, &segment(100, 500, Flags::FIN | Flags::ACK), &[], ts)
            .unwrap();
        assert_eq!(stream.client_flow().state(), FlowState::FinSent);
        assert!(!stream.is_finished());

        stream
            .process_segment(Direction::ServerToClient, &segment(500, 101, Flags::FIN | Flags::ACK), &[], ts)
            .unwrap();
        assert!(stream.is_finished());
        assert_eq!(*closed.lock().unwrap(), 1);
    }

    #[test]
    fn close_without_data_callback() {
        let mut stream = established();
        let closed = Arc::new(Mutex::new(0));

        let count = closed.clone();
        stream.on_closed(move |_| *count.lock().unwrap() += 1);
        stream.on_client_data(|_| {});

        let ts = Duration::from_secs(3);
        stream
            .process_segment(Direction::ClientToServer, &segment(100, 500, Flags::FIN | Flags::ACK), &[], ts)
            .unwrap();

        assert_eq!(
            stream.process_segment(
                Direction::ServerToClient,
                &segment(500, 101, Flags::FIN | Flags::ACK),
                b"bye",
                ts
            ),
            Err(Error::CallbackNotSet)
        );
        assert!(stream.is_finished());
        assert_eq!(*closed.lock().unwrap(), 1);
    }

    #[test]
    fn partial() {
        let stream = Stream::partial(
            CLIENT,
            SERVER,
            &segment(7000, 9000, Flags::ACK),
            Duration::from_secs(0),
        );

        assert!(stream.is_partial());
        assert!(stream.is_established());
        assert_eq!(stream.client_flow().sequence_number(), 7000);
        assert_eq!(stream.server_flow().sequence_number(), 9000);
    }
}
