//! Stream table: routes segments to their streams

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::{
    ipv4,
    packet::{LinkType, Packet},
    reassembly::stream::{Direction, Endpoint, Stream, StreamCallback, StreamId},
    registry::{Feature, Registry},
    tcp::{self, Flags},
    Error, Result,
};

/// Called when a stream is dropped before it finished
pub type TerminationCallback = Box<dyn FnMut(&mut Stream, TerminationReason) + Send>;

/// Limits and policies of a `StreamFollower`
#[derive(Clone, Debug)]
pub struct FollowerConfig {
    /// Attach to streams whose handshake was not seen (default: `false`)
    pub follow_partial_streams: bool,
    /// Out-of-order bytes a flow may buffer before its stream is terminated
    pub max_buffered_bytes: usize,
    /// Out-of-order chunks a flow may buffer before its stream is terminated
    pub max_buffered_chunks: usize,
    /// Idle time after which a stream is terminated
    pub stream_keep_alive: Duration,
    /// How often, in packet time, idle streams are looked for
    pub cleanup_interval: Duration,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        FollowerConfig {
            follow_partial_streams: false,
            max_buffered_bytes: 3 * 1024 * 1024,
            max_buffered_chunks: 512,
            stream_keep_alive: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(2 * 60),
        }
    }
}

/// Why a stream was dropped before it finished
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TerminationReason {
    /// No segment within the keep alive interval
    Timeout,
    /// A flow buffered more out-of-order data than allowed
    BufferedData,
}

/// What happened to a packet fed to a `StreamFollower`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// Not a TCP over IPv4 packet
    Ignored,
    /// Segment of a stream that's not being followed
    NotTracked,
    /// Fed to its stream
    Processed,
    /// Fed to its stream, which then finished and was removed
    Closed,
    /// Fed to its stream, which was then terminated and removed
    Terminated(TerminationReason),
}

/// Follows TCP streams and reassembles their data
///
/// Streams are created on a SYN (or on any segment, with `follow_partial_streams`) and handed to
/// the new stream callback, which installs the per-stream callbacks. Finished streams are removed
/// right after their last segment; idle streams are swept, in packet time, every
/// `cleanup_interval`.
pub struct StreamFollower {
    config: FollowerConfig,
    registry: Registry,
    streams: HashMap<StreamId, Stream>,
    last_cleanup: Duration,
    on_new_stream: Option<StreamCallback>,
    on_termination: Option<TerminationCallback>,
}

impl StreamFollower {
    /* Constructors */
    /// Creates a follower that decodes with the builtin registry
    pub fn new(config: FollowerConfig) -> Self {
        StreamFollower::with_registry(config, Registry::builtin().clone())
    }

    /// Creates a follower that decodes with `registry`
    pub fn with_registry(config: FollowerConfig, registry: Registry) -> Self {
        StreamFollower {
            config,
            registry,
            streams: HashMap::new(),
            last_cleanup: Duration::default(),
            on_new_stream: None,
            on_termination: None,
        }
    }

    /* Callbacks */
    /// Sets the callback invoked for every new stream; it must be set before feeding packets
    pub fn on_new_stream<F>(&mut self, f: F)
    where
        F: FnMut(&mut Stream) + Send + 'static,
    {
        self.on_new_stream = Some(Box::new(f));
    }

    /// Sets the callback invoked when a stream is terminated
    pub fn on_termination<F>(&mut self, f: F)
    where
        F: FnMut(&mut Stream, TerminationReason) + Send + 'static,
    {
        self.on_termination = Some(Box::new(f));
    }

    /* Getters */
    /// Returns the configuration
    pub fn config(&self) -> &FollowerConfig {
        &self.config
    }

    /// Number of streams being followed
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Returns the stream between `a` and `b`
    pub fn find_stream(&self, a: Endpoint, b: Endpoint) -> Result<&Stream> {
        self.streams
            .get(&StreamId::new(a, b))
            .ok_or(Error::StreamNotFound)
    }

    /// Returns the stream between `a` and `b` for modification
    pub fn find_stream_mut(&mut self, a: Endpoint, b: Endpoint) -> Result<&mut Stream> {
        self.streams
            .get_mut(&StreamId::new(a, b))
            .ok_or(Error::StreamNotFound)
    }

    /// Stops following the stream between `a` and `b` and hands it over
    pub fn remove_stream(&mut self, a: Endpoint, b: Endpoint) -> Result<Stream> {
        self.streams
            .remove(&StreamId::new(a, b))
            .ok_or(Error::StreamNotFound)
    }

    /* Processing */
    /// Decodes captured bytes and feeds them to their stream
    pub fn process_bytes(&mut self, link: LinkType, bytes: &[u8], ts: Duration) -> Result<Verdict> {
        self.registry.require(Feature::StreamFollowing)?;

        let packet = Packet::parse_with(&self.registry, link, bytes, ts)?;
        self.process_packet(&packet)
    }

    /// Feeds a decoded packet to its stream
    #[tracing::instrument(skip(self, packet), fields(ts = ?packet.timestamp()))]
    pub fn process_packet(&mut self, packet: &Packet) -> Result<Verdict> {
        self.registry.require(Feature::StreamFollowing)?;

        let ts = packet.timestamp();
        if ts.saturating_sub(self.last_cleanup) >= self.config.cleanup_interval {
            self.cleanup_streams(ts);
            self.last_cleanup = ts;
        }

        let (ip, tcp) = match (
            packet.try_find_pdu::<ipv4::Packet>(),
            packet.try_find_pdu::<tcp::Segment>(),
        ) {
            (Some(ip), Some(tcp)) => (ip, tcp),
            _ => return Ok(Verdict::Ignored),
        };

        let source = Endpoint::new(ip.get_source(), tcp.get_sport());
        let destination = Endpoint::new(ip.get_destination(), tcp.get_dport());
        let id = StreamId::new(source, destination);
        let payload = tcp.payload()?;

        if !self.streams.contains_key(&id) {
            let stream = if tcp.has_flags(Flags::SYN) && !tcp.has_flags(Flags::ACK) {
                Stream::new(source, destination, ts)
            } else if self.config.follow_partial_streams
                && !tcp.has_flags(Flags::SYN)
                && !tcp.has_flags(Flags::RST)
            {
                Stream::partial(source, destination, tcp, ts)
            } else {
                trace!(stream = %id, "segment of an untracked stream");
                return Ok(Verdict::NotTracked);
            };

            self.open(id, stream)?;
        }

        let stream = self.streams.get_mut(&id).ok_or(Error::StreamNotFound)?;
        let direction = stream.direction(source);
        let processed = stream.process_segment(direction, tcp, &payload, ts);

        if stream.is_finished() {
            self.streams.remove(&id);
            return processed.map(|_| Verdict::Closed);
        }
        processed?;

        let flow = match direction {
            Direction::ClientToServer => stream.client_flow(),
            Direction::ServerToClient => stream.server_flow(),
        };
        if flow.buffered_bytes() > self.config.max_buffered_bytes
            || flow.buffered_chunks() > self.config.max_buffered_chunks
        {
            self.terminate(id, TerminationReason::BufferedData);
            return Ok(Verdict::Terminated(TerminationReason::BufferedData));
        }

        Ok(Verdict::Processed)
    }

    /// Terminates the streams that have been idle for longer than the keep alive interval
    ///
    /// Returns the number of terminated streams
    pub fn cleanup_streams(&mut self, now: Duration) -> usize {
        let keep_alive = self.config.stream_keep_alive;
        let expired = self
            .streams
            .iter()
            .filter(|(_, stream)| now.saturating_sub(stream.last_seen()) > keep_alive)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();

        for id in &expired {
            self.terminate(*id, TerminationReason::Timeout);
        }

        expired.len()
    }

    /* Private */
    fn open(&mut self, id: StreamId, mut stream: Stream) -> Result<()> {
        let callback = self.on_new_stream.as_mut().ok_or(Error::CallbackNotSet)?;

        debug!(stream = %id, partial = stream.is_partial(), "new stream");
        callback(&mut stream);
        self.streams.insert(id, stream);

        Ok(())
    }

    fn terminate(&mut self, id: StreamId, reason: TerminationReason) {
        if let Some(mut stream) = self.streams.remove(&id) {
            warn!(stream = %id, ?reason, "stream terminated");

            if let Some(callback) = self.on_termination.as_mut() {
                callback(&mut stream, reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::{
        ipv4,
        packet::{LinkType, Packet},
        pdu::Pdu,
        raw,
        reassembly::{
            follower::{FollowerConfig, StreamFollower, TerminationReason, Verdict},
            stream::Endpoint,
        },
        registry::{Feature, Registry},
        tcp::{self, Flags},
        udp, Error,
    };

    const CLIENT: Endpoint = Endpoint {
        addr: ipv4::Addr([10, 0, 0, 1]),
        port: 40000,
    };
    const SERVER: Endpoint = Endpoint {
        addr: ipv4::Addr([10, 0, 0, 2]),
        port: 80,
    };

    fn packet(from: Endpoint, to: Endpoint, seq: u32, flags: Flags, data: &[u8], secs: u64) -> Packet {
        let mut tcp = tcp::Segment::new(from.port, to.port);
        tcp.set_seq(seq);
        tcp.set_flags(flags);

        let mut ip: Box<dyn Pdu> = Box::new(ipv4::Packet::new(from.addr, to.addr));
        ip.push(Box::new(tcp));
        if !data.is_empty() {
            ip.push(Box::new(raw::Payload::new(data)));
        }

        Packet::from_boxed(ip).with_timestamp(Duration::from_secs(secs))
    }

    fn follower(config: FollowerConfig) -> (StreamFollower, Arc<Mutex<Vec<u8>>>) {
        let data = Arc::new(Mutex::new(vec![]));

        let mut follower = StreamFollower::new(config);
        let sink = data.clone();
        follower.on_new_stream(move |stream| {
            let sink = sink.clone();
            stream.on_client_data(move |stream| {
                sink.lock().unwrap().extend_from_slice(stream.client_payload());
            });
            stream.auto_cleanup_payloads(true);
        });

        (follower, data)
    }

    #[test]
    fn new_stream_callback_required() {
        let mut follower = StreamFollower::new(FollowerConfig::default());

        assert_eq!(
            follower.process_packet(&packet(CLIENT, SERVER, 0, Flags::SYN, &[], 1)),
            Err(Error::CallbackNotSet)
        );
        assert_eq!(follower.stream_count(), 0);
    }

    #[test]
    fn finished_stream_removed_on_callback_error() {
        let (mut follower, _) = follower(FollowerConfig::default());

        follower.process_packet(&packet(CLIENT, SERVER, 0, Flags::SYN, &[], 1)).unwrap();
        follower
            .process_packet(&packet(SERVER, CLIENT, 499, Flags::SYN | Flags::ACK, &[], 1))
            .unwrap();
        follower.process_packet(&packet(CLIENT, SERVER, 1, Flags::ACK, &[], 1)).unwrap();
        follower
            .process_packet(&packet(CLIENT, SERVER, 1, Flags::FIN | Flags::ACK, &[], 2))
            .unwrap();

        // no server data callback
        assert_eq!(
            follower.process_packet(&packet(SERVER, CLIENT, 500, Flags::FIN | Flags::ACK, b"bye", 2)),
            Err(Error::CallbackNotSet)
        );
        assert_eq!(follower.stream_count(), 0);
    }

    #[test]
    fn untracked() {
        let (mut follower, _) = follower(FollowerConfig::default());

        assert_eq!(
            follower.process_packet(&packet(CLIENT, SERVER, 0, Flags::ACK, b"x", 1)),
            Ok(Verdict::NotTracked)
        );
        assert_eq!(
            follower.find_stream(CLIENT, SERVER).unwrap_err(),
            Error::StreamNotFound
        );
    }

    #[test]
    fn not_tcp() {
        let (mut follower, _) = follower(FollowerConfig::default());

        let mut ip: Box<dyn Pdu> = Box::new(ipv4::Packet::new(CLIENT.addr, SERVER.addr));
        ip.push(Box::new(udp::Packet::new(53, 53)));

        assert_eq!(
            follower.process_packet(&Packet::from_boxed(ip)),
            Ok(Verdict::Ignored)
        );
    }

    #[test]
    fn partial_stream() {
        let (mut follower, data) = follower(FollowerConfig {
            follow_partial_streams: true,
            ..FollowerConfig::default()
        });

        assert_eq!(
            follower.process_packet(&packet(CLIENT, SERVER, 1000, Flags::ACK, b"abc", 1)),
            Ok(Verdict::Processed)
        );
        assert_eq!(
            follower.process_packet(&packet(CLIENT, SERVER, 1003, Flags::ACK, b"def", 1)),
            Ok(Verdict::Processed)
        );

        assert_eq!(&data.lock().unwrap()[..], b"abcdef");
        assert!(follower.find_stream(SERVER, CLIENT).unwrap().is_partial());
    }

    #[test]
    fn buffer_limit() {
        let (mut follower, _) = follower(FollowerConfig {
            follow_partial_streams: true,
            max_buffered_chunks: 2,
            ..FollowerConfig::default()
        });

        let reasons = Arc::new(Mutex::new(vec![]));
        let sink = reasons.clone();
        follower.on_termination(move |_, reason| sink.lock().unwrap().push(reason));

        follower
            .process_packet(&packet(CLIENT, SERVER, 0, Flags::ACK, b"a", 1))
            .unwrap();
        for seq in &[10, 20] {
            assert_eq!(
                follower.process_packet(&packet(CLIENT, SERVER, *seq, Flags::ACK, b"b", 1)),
                Ok(Verdict::Processed)
            );
        }
        assert_eq!(
            follower.process_packet(&packet(CLIENT, SERVER, 30, Flags::ACK, b"c", 1)),
            Ok(Verdict::Terminated(TerminationReason::BufferedData))
        );

        assert_eq!(follower.stream_count(), 0);
        assert_eq!(*reasons.lock().unwrap(), vec![TerminationReason::BufferedData]);
    }

    #[test]
    fn idle_streams() {
        let (mut follower, _) = follower(FollowerConfig::default());

        let terminated = Arc::new(Mutex::new(0));
        let count = terminated.clone();
        follower.on_termination(move |_, reason| {
            assert_eq!(reason, TerminationReason::Timeout);
            *count.lock().unwrap() += 1;
        });

        follower
            .process_packet(&packet(CLIENT, SERVER, 0, Flags::SYN, &[], 10))
            .unwrap();
        assert_eq!(follower.cleanup_streams(Duration::from_secs(60)), 0);
        assert_eq!(follower.stream_count(), 1);

        // a packet far enough in the future triggers the sweep
        let other = Endpoint::new(ipv4::Addr([10, 0, 0, 3]), 40001);
        follower
            .process_packet(&packet(other, SERVER, 0, Flags::SYN, &[], 10 + 301))
            .unwrap();

        assert_eq!(*terminated.lock().unwrap(), 1);
        assert_eq!(follower.stream_count(), 1);
        assert!(follower.find_stream(other, SERVER).is_ok());
    }

    #[test]
    fn remove() {
        let (mut follower, _) = follower(FollowerConfig::default());

        follower
            .process_packet(&packet(CLIENT, SERVER, 0, Flags::SYN, &[], 1))
            .unwrap();

        let stream = follower.remove_stream(SERVER, CLIENT).unwrap();
        assert_eq!(stream.client(), CLIENT);
        assert_eq!(
            follower.remove_stream(SERVER, CLIENT).unwrap_err(),
            Error::StreamNotFound
        );
    }

    #[test]
    fn feature_disabled() {
        let mut registry = Registry::default();
        registry.disable_feature(Feature::StreamFollowing);
        let mut follower = StreamFollower::with_registry(FollowerConfig::default(), registry);

        assert_eq!(
            follower.process_bytes(LinkType::Raw, &[0x45], Duration::default()),
            Err(Error::FeatureDisabled(Feature::StreamFollowing))
        );
    }

    #[test]
    fn bytes() {
        let (mut follower, _) = follower(FollowerConfig::default());

        let syn = packet(CLIENT, SERVER, 0, Flags::SYN, &[], 1);
        let bytes = syn.serialize().unwrap();

        assert_eq!(
            follower.process_bytes(LinkType::Raw, &bytes, Duration::from_secs(1)),
            Ok(Verdict::Processed)
        );
        assert_eq!(follower.stream_count(), 1);
    }
}
