//! IPv4: Internet Protocol v4
//!
//! # References
//!
//! - [RFC 791: Internet protocol][rfc]
//!
//! [rfc]: https://tools.ietf.org/html/rfc791

use core::fmt;
use core::ops::Range;

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u16, u32, usize};
use hash32_derive::Hash32;

use crate::{
    fmt::Hex,
    options::{FromOption, Options, PduOption},
    pdu::{Decoded, Layer, Pdu, PduType},
    Error, Result,
};

/* Packet structure */
const VERSION_IHL: usize = 0;
mod ihl {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 4;
}
mod version {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::ihl::OFFSET + super::ihl::SIZE;
    pub const SIZE: usize = 4;
}

const DSCP_ECN: usize = 1;
mod ecn {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 2;
}
mod dscp {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::ecn::OFFSET + super::ecn::SIZE;
    pub const SIZE: usize = 6;
}

const TOTAL_LENGTH: Range<usize> = 2..4;
const IDENTIFICATION: Range<usize> = 4..6;

const FLAGS: usize = 6;
mod mf {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 5;
    pub const SIZE: usize = 1;
}
mod df {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::mf::OFFSET + super::mf::SIZE;
    pub const SIZE: usize = 1;
}

const FRAGMENT_OFFSET: Range<usize> = 6..8;
mod fragment_offset {
    pub const MASK: u16 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 13;
}

const TTL: usize = 8;
const PROTOCOL: usize = 9;
const CHECKSUM: Range<usize> = 10..12;
const SOURCE: Range<usize> = 12..16;
const DESTINATION: Range<usize> = 16..20;

/// Minimum size of the IPv4 header
pub const MIN_HEADER_SIZE: usize = DESTINATION.end;

/// Maximum size of the IPv4 header, options included
pub const MAX_HEADER_SIZE: usize = 60;

/// IPv4 packet
pub struct Packet {
    dscp: u8,
    ecn: u8,
    identification: u16,
    df: bool,
    mf: bool,
    fragment_offset: u16,
    ttl: u8,
    protocol: Protocol,
    checksum: u16,
    source: Addr,
    destination: Addr,
    options: Options<OptionKind>,
    inner: Option<Box<dyn Pdu>>,
}

layer!(Packet {
    dscp,
    ecn,
    identification,
    df,
    mf,
    fragment_offset,
    ttl,
    source,
    destination,
    options,
} derived {
    protocol,
    checksum,
});

impl Packet {
    /* Constructors */
    /// Creates a new IPv4 packet
    ///
    /// Most of the header will be filled with sensible defaults:
    ///
    /// - DSCP = 0
    /// - ECN = 0
    /// - Identification = 0
    /// - DF = true
    /// - MF = false
    /// - Fragment Offset = 0
    /// - TTL = 64
    ///
    /// The Protocol field follows the inner PDU; the Total Length and Checksum fields are computed
    /// during serialization.
    pub fn new(source: Addr, destination: Addr) -> Self {
        Packet {
            dscp: 0,
            ecn: 0,
            identification: 0,
            df: true,
            mf: false,
            fragment_offset: 0,
            ttl: 64, // cf. RFC 1700
            protocol: Protocol::Unknown(0),
            checksum: 0,
            source,
            destination,
            options: Options::new(),
            inner: None,
        }
    }

    /* Getters */
    /// DSCP (Differentiated Services Code Point)
    pub fn get_dscp(&self) -> u8 {
        self.dscp
    }

    /// ECN (Explicit Congestion Notification)
    pub fn get_ecn(&self) -> u8 {
        self.ecn
    }

    /// Identification
    pub fn get_identification(&self) -> u16 {
        self.identification
    }

    /// DF (Don't Fragment)
    pub fn get_df(&self) -> bool {
        self.df
    }

    /// MF (More Fragments)
    pub fn get_mf(&self) -> bool {
        self.mf
    }

    /// Fragment Offset
    pub fn get_fragment_offset(&self) -> u16 {
        self.fragment_offset
    }

    /// TTL (Time To Live)
    pub fn get_ttl(&self) -> u8 {
        self.ttl
    }

    /// Protocol
    ///
    /// This is the protocol of the inner PDU, if it has an IP protocol number
    pub fn get_protocol(&self) -> Protocol {
        self.inner
            .as_ref()
            .and_then(|inner| Protocol::from_pdu_type(inner.pdu_type()))
            .unwrap_or(self.protocol)
    }

    /// Returns the Checksum field as it was decoded
    pub fn get_checksum(&self) -> u16 {
        self.checksum
    }

    /// Source (IP address)
    pub fn get_source(&self) -> Addr {
        self.source
    }

    /// Destination (IP address)
    pub fn get_destination(&self) -> Addr {
        self.destination
    }

    /// Checks if this packet is a fragment of a larger datagram
    pub fn is_fragment(&self) -> bool {
        self.mf || self.fragment_offset != 0
    }

    /* Setters */
    /// Overwrites the DSCP (Differentiated Services Code Point)
    pub fn set_dscp(&mut self, dscp: u8) {
        self.dscp = dscp & dscp::MASK;
    }

    /// Overwrites the ECN (Explicit Congestion Notification)
    pub fn set_ecn(&mut self, ecn: u8) {
        self.ecn = ecn & ecn::MASK;
    }

    /// Overwrites the identification
    pub fn set_identification(&mut self, id: u16) {
        self.identification = id;
    }

    /// Overwrites the DF (Don't Fragment)
    pub fn set_df(&mut self, df: bool) {
        self.df = df;
    }

    /// Overwrites the MF (More Fragments)
    pub fn set_mf(&mut self, mf: bool) {
        self.mf = mf;
    }

    /// Overwrites the Fragment Offset
    pub fn set_fragment_offset(&mut self, fo: u16) {
        self.fragment_offset = fo & fragment_offset::MASK;
    }

    /// Overwrites the TTL (Time To Live)
    pub fn set_ttl(&mut self, ttl: u8) {
        self.ttl = ttl;
    }

    /// Overwrites the Protocol
    ///
    /// NOTE this has no effect if the inner PDU has its own IP protocol number
    pub fn set_protocol(&mut self, proto: Protocol) {
        self.protocol = proto;
    }

    /// Overwrites the Source (IP address)
    pub fn set_source(&mut self, addr: Addr) {
        self.source = addr;
    }

    /// Overwrites the Destination (IP address)
    pub fn set_destination(&mut self, addr: Addr) {
        self.destination = addr;
    }

    /* Options */
    /// Appends an option to the header
    pub fn add_option(&mut self, kind: OptionKind, data: &[u8]) -> Result<()> {
        self.options.add(kind, data)
    }

    /// Returns the first option of the given kind
    pub fn search_option(&self, kind: OptionKind) -> Result<&PduOption<OptionKind>> {
        self.options.search(kind)
    }

    /// Returns the options of this header
    pub fn options(&self) -> &Options<OptionKind> {
        &self.options
    }

    /// Removes the first option of the given kind
    pub fn remove_option(&mut self, kind: OptionKind) -> bool {
        self.options.remove(kind)
    }
}

impl Pdu for Packet {
    fn pdu_type(&self) -> PduType {
        Self::PDU_TYPE
    }

    fn header_size(&self) -> usize {
        MIN_HEADER_SIZE + self.options.padded_size()
    }

    fn write_header(&self, buffer: &mut [u8]) -> Result<()> {
        let header_size = self.header_size();
        if header_size > MAX_HEADER_SIZE {
            return Err(Error::Serialization);
        }

        let ihl = (header_size / 4) as u8;
        buffer[VERSION_IHL] = 0;
        set!(buffer[VERSION_IHL], version, 4);
        set!(buffer[VERSION_IHL], ihl, ihl);

        buffer[DSCP_ECN] = 0;
        set!(buffer[DSCP_ECN], dscp, self.dscp);
        set!(buffer[DSCP_ECN], ecn, self.ecn);

        NE::write_u16(&mut buffer[IDENTIFICATION], self.identification);

        NE::write_u16(
            &mut buffer[FRAGMENT_OFFSET],
            self.fragment_offset & fragment_offset::MASK,
        );
        set!(buffer[FLAGS], df, u8::from(self.df));
        set!(buffer[FLAGS], mf, u8::from(self.mf));

        buffer[TTL] = self.ttl;
        buffer[PROTOCOL] = self.get_protocol().into();
        buffer[SOURCE].copy_from_slice(&self.source.0);
        buffer[DESTINATION].copy_from_slice(&self.destination.0);

        self.options
            .write(&mut buffer[MIN_HEADER_SIZE..header_size]);

        Ok(())
    }

    /// Writes the Total Length and Checksum fields
    fn fix_up(&self, buffer: &mut [u8], _: Option<&(dyn Pdu + 'static)>) -> Result<()> {
        let total_len = u16(buffer.len()).map_err(|_| Error::Serialization)?;
        NE::write_u16(&mut buffer[TOTAL_LENGTH], total_len);

        let header = &mut buffer[..self.header_size()];
        let cksum = compute_checksum(header, CHECKSUM.start);
        NE::write_u16(&mut header[CHECKSUM], cksum);

        Ok(())
    }

    chain!();
}

impl Layer for Packet {
    const PDU_TYPE: PduType = PduType::Ipv4;

    /// NOTE bytes past the Total Length (e.g. Ethernet padding) are ignored
    fn decode(bytes: &[u8]) -> Result<Decoded<Self>> {
        if bytes.len() < MIN_HEADER_SIZE {
            // truncated header
            return Err(Error::MalformedPacket);
        }

        let header_len = usize(get!(bytes[VERSION_IHL], ihl)) * 4;
        let total_len = usize(NE::read_u16(&bytes[TOTAL_LENGTH]));

        if get!(bytes[VERSION_IHL], version) != 4 {
            return Err(Error::MalformedPacket);
        } else if header_len < MIN_HEADER_SIZE {
            // IHL < 5
            return Err(Error::MalformedPacket);
        } else if total_len < header_len || total_len > bytes.len() {
            return Err(Error::MalformedPacket);
        }

        let header = &bytes[..header_len];
        let fo = NE::read_u16(&header[FRAGMENT_OFFSET]);
        let packet = Packet {
            dscp: get!(header[DSCP_ECN], dscp),
            ecn: get!(header[DSCP_ECN], ecn),
            identification: NE::read_u16(&header[IDENTIFICATION]),
            df: get!(header[FLAGS], df) == 1,
            mf: get!(header[FLAGS], mf) == 1,
            fragment_offset: get!(fo, fragment_offset),
            ttl: header[TTL],
            protocol: header[PROTOCOL].into(),
            checksum: NE::read_u16(&header[CHECKSUM]),
            source: Addr::read(&header[SOURCE]),
            destination: Addr::read(&header[DESTINATION]),
            options: Options::parse(&header[MIN_HEADER_SIZE..])?,
            inner: None,
        };

        // fragments can't be decoded on their own
        let next = if packet.is_fragment() {
            None
        } else {
            packet.protocol.pdu_type()
        };

        Ok(Decoded::new(packet, header_len..total_len, next).checksum(verify_checksum(header)))
    }
}

/// Header only
impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ipv4::Packet")
            .field("dscp", &self.get_dscp())
            .field("ecn", &self.get_ecn())
            .field("identification", &self.get_identification())
            .field("df", &self.get_df())
            .field("mf", &self.get_mf())
            .field("fragment_offset", &self.get_fragment_offset())
            .field("ttl", &self.get_ttl())
            .field("protocol", &self.get_protocol())
            .field("checksum", &Hex(self.get_checksum()))
            .field("source", &self.get_source())
            .field("destination", &self.get_destination())
            .field("options", &self.options)
            .finish()
    }
}

/// IPv4 address
#[derive(Clone, Copy, Default, Eq, Hash, Hash32, Ord, PartialEq, PartialOrd)]
pub struct Addr(pub [u8; 4]);

impl Addr {
    /// Loopback address
    pub const LOOPBACK: Self = Addr([127, 0, 0, 1]);

    /// Unspecified address
    pub const UNSPECIFIED: Self = Addr([0; 4]);

    pub(crate) fn read(bytes: &[u8]) -> Self {
        let mut addr = [0; 4];
        addr.copy_from_slice(&bytes[..4]);
        Addr(addr)
    }
}

impl FromOption for Addr {
    fn from_option(data: &[u8]) -> Result<Self> {
        if data.len() != 4 {
            return Err(Error::MalformedOption);
        }

        Ok(Addr::read(data))
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ipv4::Addr").field(&self.0).finish()
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use core::fmt::Write;

        let mut is_first = true;
        for byte in &self.0 {
            if is_first {
                is_first = false;
            } else {
                f.write_char('.')?;
            }

            write!(f, "{}", byte)?;
        }

        Ok(())
    }
}

full_range!(
    u8,
    /// IP protocol
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub enum Protocol {
        /// ICMP
        Icmp = 0x01,
        /// TCP
        Tcp = 0x06,
        /// UDP
        Udp = 0x11,
    }
);

impl Protocol {
    /// Protocol of a payload with this protocol number, if it has a decoder in this crate
    pub fn pdu_type(self) -> Option<PduType> {
        match self {
            Protocol::Icmp => Some(PduType::Icmp),
            Protocol::Tcp => Some(PduType::Tcp),
            Protocol::Udp => Some(PduType::Udp),
            Protocol::Unknown(_) => None,
        }
    }

    /// Protocol number of a payload of the given protocol
    pub fn from_pdu_type(ty: PduType) -> Option<Self> {
        match ty {
            PduType::Icmp => Some(Protocol::Icmp),
            PduType::Tcp => Some(Protocol::Tcp),
            PduType::Udp => Some(Protocol::Udp),
            _ => None,
        }
    }
}

full_range!(
    u8,
    /// IPv4 option kind (copied flag, class and number)
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub enum OptionKind {
        /// End of Option List
        Eol = 0,
        /// No Operation
        Nop = 1,
        /// Record Route
        RecordRoute = 7,
        /// Internet Timestamp
        Timestamp = 68,
        /// Security
        Security = 130,
        /// Loose Source and Record Route
        Lsrr = 131,
        /// Strict Source and Record Route
        Ssrr = 137,
        /// Router Alert
        RouterAlert = 148,
    }
);

/* Checksums */
/// Sum of the 16-bit words of `bytes`; an odd trailing byte is padded with zero
fn sum(bytes: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        sum = sum.wrapping_add(u32(NE::read_u16(chunk)));
    }

    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u32(*last) << 8);
    }

    sum
}

/// Folds the carries of a one's complement sum back into 16 bits
fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    sum as u16
}

/// Computes the IPv4 checksum of the header
pub(crate) fn compute_checksum(header: &[u8], cksum_pos: usize) -> u16 {
    let mut sum = 0u32;
    let skip = cksum_pos / 2;
    for (i, chunk) in header.chunks(2).enumerate() {
        if i == skip {
            // skip checksum field
            continue;
        }
        sum = sum.wrapping_add(u32(NE::read_u16(chunk)));
    }

    !fold(sum)
}

/// Verifies the IPv4 checksum of the header
pub(crate) fn verify_checksum(header: &[u8]) -> bool {
    debug_assert!(header.len() % 2 == 0);

    fold(sum(header)) == 0xffff
}

fn pseudo_header(source: Addr, destination: Addr, protocol: Protocol, len: u16) -> u32 {
    sum(&source.0)
        .wrapping_add(sum(&destination.0))
        .wrapping_add(u32(u8::from(protocol)))
        .wrapping_add(u32(len))
}

/// Checksum of a transport segment (TCP, UDP) including the IPv4 pseudo-header
///
/// The checksum field of `segment` must be zeroed
pub(crate) fn transport_checksum(ip: &Packet, protocol: Protocol, segment: &[u8]) -> Result<u16> {
    let len = u16(segment.len()).map_err(|_| Error::Serialization)?;
    let sum = pseudo_header(ip.source, ip.destination, protocol, len).wrapping_add(sum(segment));

    Ok(!fold(sum))
}

/// Verifies the checksum of a transport segment against its pseudo-header
pub(crate) fn verify_transport_checksum(
    source: Addr,
    destination: Addr,
    protocol: Protocol,
    segment: &[u8],
) -> bool {
    match u16(segment.len()) {
        Ok(len) => {
            let sum = pseudo_header(source, destination, protocol, len).wrapping_add(sum(segment));
            fold(sum) == 0xffff
        }
        Err(_) => false,
    }
}

/// One's complement checksum of `bytes` with no pseudo-header (ICMP)
pub(crate) fn checksum(bytes: &[u8]) -> u16 {
    !fold(sum(bytes))
}

#[cfg(test)]
mod tests {
    use crate::{
        ipv4::{self, OptionKind, Protocol},
        pdu::{Layer, Pdu, PduType},
        raw,
        registry::{Feature, Registry},
        Error,
    };

    const HEADER: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8, 0x00,
        0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    const IP_SRC: ipv4::Addr = ipv4::Addr([192, 168, 0, 33]);
    const IP_DST: ipv4::Addr = ipv4::Addr([192, 168, 0, 1]);

    #[test]
    fn checksum() {
        assert_eq!(
            super::compute_checksum(&HEADER, super::CHECKSUM.start),
            0xb861
        )
    }

    #[test]
    fn verify() {
        assert!(super::verify_checksum(&HEADER));

        let mut header = HEADER;
        header[11] ^= 1;
        assert!(!super::verify_checksum(&header));
    }

    #[test]
    fn odd_sum() {
        assert_eq!(super::sum(&[0x12, 0x34, 0x56]), 0x1234 + 0x5600);
    }

    #[test]
    fn serialize() {
        let mut ip = ipv4::Packet::new(IP_SRC, IP_DST);
        ip.set_protocol(Protocol::Unknown(253));

        let mut ip: Box<dyn Pdu> = Box::new(ip);
        ip.attach_inner(Box::new(raw::Payload::new(&[0xaa, 0xbb])));

        let bytes = ip.serialize().unwrap();
        assert_eq!(
            bytes,
            [
                69, 0, // version & ihl, dscp & ecn
                0, 22, // total length
                0, 0, 64, 0, // identification, flags & fragment offset
                64, 253, // ttl, protocol
                184, 120, // checksum
                192, 168, 0, 33, // source
                192, 168, 0, 1, // destination
                0xaa, 0xbb, // payload
            ]
        );
        assert!(super::verify_checksum(&bytes[..20]));
    }

    #[test]
    fn options() {
        let mut ip = ipv4::Packet::new(IP_SRC, IP_DST);
        ip.add_option(OptionKind::RouterAlert, &[0, 0]).unwrap();
        assert_eq!(ip.header_size(), 24);

        let ip: Box<dyn Pdu> = Box::new(ip);
        let bytes = ip.serialize().unwrap();
        assert_eq!(bytes[0], 0x46);
        assert_eq!(&bytes[20..], &[148, 4, 0, 0]);

        let parsed = ipv4::Packet::parse(&bytes).unwrap();
        assert_eq!(
            parsed.search_option(OptionKind::RouterAlert).unwrap().data(),
            &[0, 0]
        );

        let parsed: Box<dyn Pdu> = Box::new(parsed);
        assert!(*ip == *parsed);
    }

    #[test]
    fn oversized_options() {
        let mut ip = ipv4::Packet::new(IP_SRC, IP_DST);
        ip.add_option(OptionKind::Unknown(30), &[0; 40]).unwrap();

        let ip: Box<dyn Pdu> = Box::new(ip);
        assert_eq!(ip.serialize().unwrap_err(), Error::Serialization);
    }

    #[test]
    fn flags() {
        let mut ip = ipv4::Packet::new(IP_SRC, IP_DST);
        ip.set_df(false);
        ip.set_mf(true);
        ip.set_fragment_offset(0x1abc);

        let ip: Box<dyn Pdu> = Box::new(ip);
        let bytes = ip.serialize().unwrap();
        assert_eq!(&bytes[6..8], &[0x3a, 0xbc]);

        let parsed = ipv4::Packet::parse(&bytes).unwrap();
        assert!(!parsed.get_df());
        assert!(parsed.get_mf());
        assert_eq!(parsed.get_fragment_offset(), 0x1abc);
        assert!(parsed.is_fragment());
    }

    #[test]
    fn fragments_are_raw() {
        let mut ip = ipv4::Packet::new(IP_SRC, IP_DST);
        ip.set_mf(true);
        ip.set_protocol(Protocol::Udp);

        let mut ip: Box<dyn Pdu> = Box::new(ip);
        ip.attach_inner(Box::new(raw::Payload::new(&[0; 12])));
        let bytes = ip.serialize().unwrap();

        let parsed = ipv4::Packet::parse(&bytes).unwrap();
        assert_eq!(parsed.get_protocol(), Protocol::Udp);
        assert_eq!(parsed.inner().unwrap().pdu_type(), PduType::Raw);
    }

    #[test]
    fn malformed() {
        // truncated header
        assert_eq!(
            ipv4::Packet::parse(&HEADER[..19]).unwrap_err(),
            Error::MalformedPacket
        );

        // total length past the end of the input
        assert_eq!(
            ipv4::Packet::parse(&HEADER).unwrap_err(),
            Error::MalformedPacket
        );

        let mut header = HEADER;
        header[2..4].copy_from_slice(&[0, 20]);
        assert!(ipv4::Packet::parse(&header).is_ok());

        // wrong version
        header[0] = 0x65;
        assert_eq!(
            ipv4::Packet::parse(&header).unwrap_err(),
            Error::MalformedPacket
        );

        // IHL < 5
        header[0] = 0x44;
        assert_eq!(
            ipv4::Packet::parse(&header).unwrap_err(),
            Error::MalformedPacket
        );

        // options region longer than the input
        header[0] = 0x46;
        assert_eq!(
            ipv4::Packet::parse(&header).unwrap_err(),
            Error::MalformedPacket
        );
    }

    #[test]
    fn checksum_verdict() {
        let mut header = HEADER;
        header[2..4].copy_from_slice(&[0, 20]);
        header[10..12].copy_from_slice(&[0, 0]);

        assert!(ipv4::Packet::parse(&header).is_ok());

        let mut registry = Registry::default();
        registry.enable_feature(Feature::ChecksumValidation);
        assert_eq!(
            registry.parse::<ipv4::Packet>(&header).unwrap_err(),
            Error::MalformedPacket
        );
    }

    #[test]
    fn display() {
        assert_eq!(IP_SRC.to_string(), "192.168.0.33");
    }
}
