//! ARP: Address Resolution Protocol
//!
//! Only the Ethernet / IPv4 flavor of ARP is supported
//!
//! # References
//!
//! - [RFC 826: An Ethernet Address Resolution Protocol][rfc]
//!
//! [rfc]: https://tools.ietf.org/html/rfc826

use core::fmt;
use core::ops::Range;

use byteorder::{ByteOrder, NetworkEndian as NE};

use crate::{
    ether, ipv4, mac,
    pdu::{Decoded, Layer, Pdu, PduType},
    Error, Result,
};

/* Packet structure */
const HTYPE: Range<usize> = 0..2;
const PTYPE: Range<usize> = 2..4;
const HLEN: usize = 4;
const PLEN: usize = 5;
const OPER: Range<usize> = 6..8;
const SHA: Range<usize> = 8..14;
const SPA: Range<usize> = 14..18;
const THA: Range<usize> = 18..24;
const TPA: Range<usize> = 24..28;

/// Size of an Ethernet / IPv4 ARP packet
pub const SIZE: usize = TPA.end;

/// ARP packet
pub struct Packet {
    oper: Operation,
    sha: mac::Addr,
    spa: ipv4::Addr,
    tha: mac::Addr,
    tpa: ipv4::Addr,
    inner: Option<Box<dyn Pdu>>,
}

layer!(Packet { oper, sha, spa, tha, tpa } derived {});

impl Packet {
    /* Constructors */
    /// Creates a new ARP request with all the addresses unspecified
    pub fn new() -> Self {
        Packet {
            oper: Operation::Request,
            sha: mac::Addr::UNSPECIFIED,
            spa: ipv4::Addr::UNSPECIFIED,
            tha: mac::Addr::UNSPECIFIED,
            tpa: ipv4::Addr::UNSPECIFIED,
            inner: None,
        }
    }

    /* Getters */
    /// HTYPE (Hardware TYPE)
    pub fn get_htype(&self) -> HardwareType {
        HardwareType::Ethernet
    }

    /// PTYPE (Protocol TYPE)
    pub fn get_ptype(&self) -> ether::Type {
        ether::Type::Ipv4
    }

    /// OPER (OPERation)
    pub fn get_oper(&self) -> Operation {
        self.oper
    }

    /// SHA (Sender Hardware Address)
    pub fn get_sha(&self) -> mac::Addr {
        self.sha
    }

    /// SPA (Sender Protocol Address)
    pub fn get_spa(&self) -> ipv4::Addr {
        self.spa
    }

    /// THA (Target Hardware Address)
    pub fn get_tha(&self) -> mac::Addr {
        self.tha
    }

    /// TPA (Target Protocol Address)
    pub fn get_tpa(&self) -> ipv4::Addr {
        self.tpa
    }

    /// Is this an ARP probe?
    pub fn is_a_probe(&self) -> bool {
        self.spa == ipv4::Addr::UNSPECIFIED
    }

    /* Setters */
    /// Overwrites the OPER (OPERation)
    pub fn set_oper(&mut self, oper: Operation) {
        self.oper = oper;
    }

    /// Overwrites the SHA (Sender Hardware Address)
    pub fn set_sha(&mut self, sha: mac::Addr) {
        self.sha = sha;
    }

    /// Overwrites the SPA (Sender Protocol Address)
    pub fn set_spa(&mut self, spa: ipv4::Addr) {
        self.spa = spa;
    }

    /// Overwrites the THA (Target Hardware Address)
    pub fn set_tha(&mut self, tha: mac::Addr) {
        self.tha = tha;
    }

    /// Overwrites the TPA (Target Protocol Address)
    pub fn set_tpa(&mut self, tpa: ipv4::Addr) {
        self.tpa = tpa;
    }

    /* Miscellaneous */
    /// ARP announcement
    ///
    /// Fills in:
    ///
    /// - OPER = Request
    /// - SPA = TPA = addr
    /// - THA = 00:00:00:00:00:00
    pub fn announce(&mut self, addr: ipv4::Addr) {
        self.oper = Operation::Request;
        self.spa = addr;
        self.tha = mac::Addr::UNSPECIFIED;
        self.tpa = addr;
    }

    /// ARP probe
    ///
    /// Fills in:
    ///
    /// - OPER = Request
    /// - SPA = 0.0.0.0
    /// - THA = 00:00:00:00:00:00
    /// - TPA = addr
    pub fn probe(&mut self, addr: ipv4::Addr) {
        self.oper = Operation::Request;
        self.spa = ipv4::Addr::UNSPECIFIED;
        self.tha = mac::Addr::UNSPECIFIED;
        self.tpa = addr;
    }
}

impl Default for Packet {
    fn default() -> Self {
        Packet::new()
    }
}

impl Pdu for Packet {
    fn pdu_type(&self) -> PduType {
        Self::PDU_TYPE
    }

    fn header_size(&self) -> usize {
        SIZE
    }

    fn write_header(&self, buffer: &mut [u8]) -> Result<()> {
        NE::write_u16(&mut buffer[HTYPE], self.get_htype().into());
        NE::write_u16(&mut buffer[PTYPE], self.get_ptype().into());
        buffer[HLEN] = 6;
        buffer[PLEN] = 4;
        NE::write_u16(&mut buffer[OPER], self.oper.into());
        buffer[SHA].copy_from_slice(&self.sha.0);
        buffer[SPA].copy_from_slice(&self.spa.0);
        buffer[THA].copy_from_slice(&self.tha.0);
        buffer[TPA].copy_from_slice(&self.tpa.0);

        Ok(())
    }

    chain!();
}

impl Layer for Packet {
    const PDU_TYPE: PduType = PduType::Arp;

    /// NOTE trailing bytes (e.g. Ethernet padding) are ignored
    fn decode(bytes: &[u8]) -> Result<Decoded<Self>> {
        if bytes.len() < SIZE {
            return Err(Error::MalformedPacket);
        }

        let htype = HardwareType::from(NE::read_u16(&bytes[HTYPE]));
        let ptype = ether::Type::from(NE::read_u16(&bytes[PTYPE]));
        if htype != HardwareType::Ethernet
            || ptype != ether::Type::Ipv4
            || bytes[HLEN] != 6
            || bytes[PLEN] != 4
        {
            return Err(Error::MalformedPacket);
        }

        let packet = Packet {
            oper: NE::read_u16(&bytes[OPER]).into(),
            sha: mac::Addr::read(&bytes[SHA]),
            spa: ipv4::Addr::read(&bytes[SPA]),
            tha: mac::Addr::read(&bytes[THA]),
            tpa: ipv4::Addr::read(&bytes[TPA]),
            inner: None,
        };

        Ok(Decoded::new(packet, SIZE..SIZE, None))
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("arp::Packet")
            .field("oper", &self.oper)
            .field("sha", &self.sha)
            .field("spa", &self.spa)
            .field("tha", &self.tha)
            .field("tpa", &self.tpa)
            .finish()
    }
}

full_range!(
    u16,
    /// Hardware type
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum HardwareType {
        /// Ethernet
        Ethernet = 1,
    }
);

full_range!(
    u16,
    /// ARP operation
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Operation {
        /// Request operation
        Request = 1,
        /// Reply operation
        Reply = 2,
    }
);
