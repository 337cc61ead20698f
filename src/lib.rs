//! PDU stacks: layered packet construction, parsing and TCP stream reassembly
//!
//! There's no IO stuff in this crate. Bytes come from (and go to) whatever capture or injection
//! mechanism you use; this crate turns them into a chain of protocol layers and back.
//!
//! A packet is a chain of PDUs (Protocol Data Units), outermost first: an Ethernet frame owns an
//! IPv4 packet, which owns a TCP segment, which owns the payload. Every layer implements the `Pdu`
//! trait; the chain is manipulated through `dyn Pdu` and concrete layers are reached with checked
//! downcasts (`find_pdu`, `cast`). Fields that depend on the layers below (lengths, checksums,
//! next protocol tags) are computed during serialization.
//!
//! On top of that, the `reassembly` module reconstructs the byte streams of TCP connections.
//!
//! # Examples
//!
//! - Constructing a frame
//!
//! ```
//! use pdustack::{ether, ipv4, mac, pdu::Pdu, raw, udp};
//!
//! let mut eth: Box<dyn Pdu> = Box::new(ether::Frame::new(
//!     mac::Addr::BROADCAST,
//!     mac::Addr([0x20, 0x18, 0x03, 0x01, 0x00, 0x00]),
//! ));
//! eth.push(Box::new(ipv4::Packet::new(
//!     ipv4::Addr([192, 168, 1, 11]),
//!     ipv4::Addr([192, 168, 1, 33]),
//! )));
//! eth.push(Box::new(udp::Packet::new(5683, 5683)));
//! eth.push(Box::new(raw::Payload::new(b"on")));
//!
//! let bytes = eth.serialize().unwrap();
//!
//! // frames are padded to the Ethernet minimum
//! assert_eq!(bytes.len(), 60);
//! assert_eq!(eth.size(), bytes.len());
//! ```
//!
//! - Parsing it back
//!
//! ```
//! # use pdustack::{ether, ipv4, mac, pdu::Pdu, raw, udp};
//! # let mut eth: Box<dyn Pdu> = Box::new(ether::Frame::new(mac::Addr::BROADCAST, mac::Addr([1; 6])));
//! # eth.push(Box::new(ipv4::Packet::new(ipv4::Addr([192, 168, 1, 11]), ipv4::Addr([192, 168, 1, 33]))));
//! # eth.push(Box::new(udp::Packet::new(5683, 5683)));
//! # eth.push(Box::new(raw::Payload::new(b"on")));
//! # let bytes = eth.serialize().unwrap();
//! use pdustack::packet::{LinkType, Packet};
//!
//! let packet = Packet::parse(LinkType::Ethernet, &bytes).unwrap();
//!
//! let udp = packet.find_pdu::<udp::Packet>().unwrap();
//! assert_eq!(udp.get_dport(), 5683);
//!
//! // the padding is not part of the UDP payload
//! assert_eq!(packet.rfind_pdu::<raw::Payload>().unwrap().data(), b"on");
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

#[macro_use]
mod macros;

mod error;
mod fmt;

// Engine
pub mod options;
pub mod packet;
pub mod pdu;
pub mod registry;

// Medium Access Control layer
pub mod ether;
pub mod mac;

pub mod arp;

// Network layer
pub mod ipv4;

pub mod icmp;

// Transport layer
pub mod tcp;
pub mod udp;

pub mod raw;

pub mod reassembly;

pub use crate::error::{Error, ErrorKind, Result};
