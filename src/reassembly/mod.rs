//! TCP stream reassembly
//!
//! Turns TCP segments, in whatever order they were captured, into the ordered byte streams the two
//! endpoints of each connection sent each other.
//!
//! A `StreamFollower` keeps a table of `Stream`s keyed by the unordered pair of their endpoints. A
//! stream tracks each direction in a `Flow`, and each flow orders its bytes with a `DataTracker`:
//! in-order bytes are made ready right away, bytes past a gap are buffered until the gap is filled,
//! and bytes that were already seen are dropped. Sequence numbers are compared modulo 2^32.
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use pdustack::reassembly::{FollowerConfig, StreamFollower};
//!
//! let received = Arc::new(Mutex::new(Vec::new()));
//!
//! let mut follower = StreamFollower::new(FollowerConfig::default());
//! let sink = received.clone();
//! follower.on_new_stream(move |stream| {
//!     let sink = sink.clone();
//!     stream.on_client_data(move |stream| {
//!         sink.lock().unwrap().extend_from_slice(stream.client_payload());
//!     });
//! });
//!
//! // feed it with `follower.process_packet(&packet)` or `follower.process_bytes(..)`
//! assert_eq!(follower.stream_count(), 0);
//! ```

mod flow;
mod follower;
mod shared;
mod stream;
mod tracker;

pub use self::{
    flow::{Flow, FlowState, Progress},
    follower::{FollowerConfig, StreamFollower, TerminationCallback, TerminationReason, Verdict},
    shared::SharedFollower,
    stream::{Direction, Endpoint, OutOfOrderCallback, Stream, StreamCallback, StreamId},
    tracker::{seq_compare, DataTracker, Placement},
};
