//! Stream following from several producer threads

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hash32::{FnvHasher, Hash, Hasher};

use crate::{
    ipv4,
    packet::Packet,
    reassembly::{
        follower::{FollowerConfig, StreamFollower, TerminationReason, Verdict},
        stream::{Endpoint, Stream, StreamId},
    },
    registry::Registry,
    tcp, Result,
};

/// A `StreamFollower` that can be shared between threads
///
/// The stream table is split in shards by the hash of the stream identity. Each shard sits behind
/// its own mutex, so segments of one stream are processed one at a time while different shards
/// make progress in parallel.
pub struct SharedFollower {
    shards: Vec<Mutex<StreamFollower>>,
}

impl SharedFollower {
    /// Creates a follower with `shards` shards (at least one) that decodes with the builtin
    /// registry
    ///
    /// `on_new_stream` is shared by all the shards, so it must be `Fn + Sync`.
    pub fn new<F>(config: FollowerConfig, shards: usize, on_new_stream: F) -> Self
    where
        F: Fn(&mut Stream) + Send + Sync + 'static,
    {
        let on_new_stream = Arc::new(on_new_stream);

        let shards = (0..shards.max(1))
            .map(|_| {
                let mut follower =
                    StreamFollower::with_registry(config.clone(), Registry::builtin().clone());
                let on_new_stream = on_new_stream.clone();
                follower.on_new_stream(move |stream| on_new_stream(stream));
                Mutex::new(follower)
            })
            .collect();

        SharedFollower { shards }
    }

    /// Sets the termination callback of every shard
    pub fn on_termination<F>(&self, f: F)
    where
        F: Fn(&mut Stream, TerminationReason) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        for shard in &self.shards {
            let f = f.clone();
            lock(shard).on_termination(move |stream, reason| f(stream, reason));
        }
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Number of streams being followed, across all shards
    pub fn stream_count(&self) -> usize {
        self.shards.iter().map(|shard| lock(shard).stream_count()).sum()
    }

    /// Feeds a decoded packet to its stream
    pub fn process_packet(&self, packet: &Packet) -> Result<Verdict> {
        let id = match (
            packet.try_find_pdu::<ipv4::Packet>(),
            packet.try_find_pdu::<tcp::Segment>(),
        ) {
            (Some(ip), Some(tcp)) => StreamId::new(
                Endpoint::new(ip.get_source(), tcp.get_sport()),
                Endpoint::new(ip.get_destination(), tcp.get_dport()),
            ),
            _ => return Ok(Verdict::Ignored),
        };

        lock(self.shard(id)).process_packet(packet)
    }

    /// Runs `f` on the stream between `a` and `b`
    pub fn with_stream<F, R>(&self, a: Endpoint, b: Endpoint, f: F) -> Result<R>
    where
        F: FnOnce(&mut Stream) -> R,
    {
        let mut shard = lock(self.shard(StreamId::new(a, b)));
        shard.find_stream_mut(a, b).map(f)
    }

    /// Stops following the stream between `a` and `b` and hands it over
    pub fn remove_stream(&self, a: Endpoint, b: Endpoint) -> Result<Stream> {
        lock(self.shard(StreamId::new(a, b))).remove_stream(a, b)
    }

    /// Sweeps the idle streams of every shard; returns the number of terminated streams
    pub fn cleanup_streams(&self, now: Duration) -> usize {
        self.shards
            .iter()
            .map(|shard| lock(shard).cleanup_streams(now))
            .sum()
    }

    fn shard(&self, id: StreamId) -> &Mutex<StreamFollower> {
        let mut hasher = FnvHasher::default();
        id.hash(&mut hasher);

        &self.shards[hasher.finish() as usize % self.shards.len()]
    }
}

// a callback that panicked leaves its shard usable
fn lock(shard: &Mutex<StreamFollower>) -> MutexGuard<'_, StreamFollower> {
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use crate::{
        ipv4,
        packet::Packet,
        pdu::Pdu,
        raw,
        reassembly::{
            follower::{FollowerConfig, Verdict},
            shared::SharedFollower,
            stream::Endpoint,
        },
        tcp::{self, Flags},
        Error,
    };

    const SERVER: Endpoint = Endpoint {
        addr: ipv4::Addr([10, 0, 0, 100]),
        port: 443,
    };

    fn packet(from: Endpoint, seq: u32, flags: Flags, data: &[u8]) -> Packet {
        let mut tcp = tcp::Segment::new(from.port, SERVER.port);
        tcp.set_seq(seq);
        tcp.set_flags(flags);

        let mut ip: Box<dyn Pdu> = Box::new(ipv4::Packet::new(from.addr, SERVER.addr));
        ip.push(Box::new(tcp));
        if !data.is_empty() {
            ip.push(Box::new(raw::Payload::new(data)));
        }

        Packet::from_boxed(ip).with_timestamp(Duration::from_secs(1))
    }

    #[test]
    fn parallel_producers() {
        let received = Arc::new(Mutex::new(0));

        let sink = received.clone();
        let follower = Arc::new(SharedFollower::new(
            FollowerConfig::default(),
            4,
            move |stream| {
                let sink = sink.clone();
                stream.on_client_data(move |stream| {
                    *sink.lock().unwrap() += stream.client_payload().len();
                });
            },
        ));

        let threads = (0..8u8)
            .map(|i| {
                let follower = follower.clone();
                thread::spawn(move || {
                    let client = Endpoint::new(ipv4::Addr([10, 0, 0, i + 1]), 50000);

                    follower
                        .process_packet(&packet(client, 0, Flags::SYN, &[]))
                        .unwrap();
                    follower
                        .process_packet(&packet(client, 1, Flags::ACK, b"0123456789"))
                        .unwrap();
                })
            })
            .collect::<Vec<_>>();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(follower.stream_count(), 8);
        assert_eq!(*received.lock().unwrap(), 80);
    }

    #[test]
    fn lookups() {
        let follower = SharedFollower::new(FollowerConfig::default(), 3, |_| {});
        let client = Endpoint::new(ipv4::Addr([192, 168, 1, 1]), 1234);

        assert_eq!(
            follower.process_packet(&packet(client, 41, Flags::SYN, &[])),
            Ok(Verdict::Processed)
        );
        assert_eq!(
            follower.with_stream(SERVER, client, |stream| stream.client_flow().sequence_number()),
            Ok(42)
        );

        follower.remove_stream(client, SERVER).unwrap();
        assert_eq!(
            follower.with_stream(client, SERVER, |_| ()).unwrap_err(),
            Error::StreamNotFound
        );
        assert_eq!(follower.cleanup_streams(Duration::from_secs(3600)), 0);
    }
}
