//! TCP: Transmission Control Protocol
//!
//! # References
//!
//! - [RFC 793: Transmission Control Protocol][rfc793]
//! - [RFC 7323: TCP Extensions for High Performance][rfc7323]
//! - [RFC 2018: TCP Selective Acknowledgment Options][rfc2018]
//!
//! [rfc793]: https://tools.ietf.org/html/rfc793
//! [rfc7323]: https://tools.ietf.org/html/rfc7323
//! [rfc2018]: https://tools.ietf.org/html/rfc2018

use core::ops::{BitOr, BitOrAssign, Range};
use core::fmt;
use std::borrow::Cow;

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::usize;

use crate::{
    fmt::Hex,
    ipv4,
    options::{Options, PduOption},
    pdu::{Decoded, Layer, Pdu, PduType},
    raw, Error, Result,
};

/* Segment structure */
const SOURCE: Range<usize> = 0..2;
const DESTINATION: Range<usize> = 2..4;
const SEQ: Range<usize> = 4..8;
const ACK: Range<usize> = 8..12;

const DATA_OFFSET: usize = 12;
mod data_offset {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 4;
    pub const SIZE: usize = 4;
}

const FLAGS: usize = 13;
const WINDOW: Range<usize> = 14..16;
const CHECKSUM: Range<usize> = 16..18;
const URGENT_POINTER: Range<usize> = 18..20;

/// Minimum size of the TCP header
pub const MIN_HEADER_SIZE: usize = URGENT_POINTER.end;

/// Maximum size of the TCP header, options included
pub const MAX_HEADER_SIZE: usize = 60;

/// TCP segment
///
/// The Data Offset and Checksum fields are computed during serialization. The checksum covers the
/// IPv4 pseudo-header, so it's only computed when the segment is encapsulated in an IPv4 packet.
pub struct Segment {
    sport: u16,
    dport: u16,
    seq: u32,
    ack: u32,
    flags: Flags,
    window: u16,
    checksum: u16,
    urgent_pointer: u16,
    options: Options<OptionKind>,
    inner: Option<Box<dyn Pdu>>,
}

layer!(Segment {
    sport,
    dport,
    seq,
    ack,
    flags,
    window,
    urgent_pointer,
    options,
} derived {
    checksum,
});

impl Segment {
    /* Constructors */
    /// Creates a new segment with no flags set and a window of 32 KiB
    pub fn new(sport: u16, dport: u16) -> Self {
        Segment {
            sport,
            dport,
            seq: 0,
            ack: 0,
            flags: Flags::empty(),
            window: 32768,
            checksum: 0,
            urgent_pointer: 0,
            options: Options::new(),
            inner: None,
        }
    }

    /* Getters */
    /// Returns the Source (port) field of the header
    pub fn get_sport(&self) -> u16 {
        self.sport
    }

    /// Returns the Destination (port) field of the header
    pub fn get_dport(&self) -> u16 {
        self.dport
    }

    /// Returns the Sequence Number field of the header
    pub fn get_seq(&self) -> u32 {
        self.seq
    }

    /// Returns the Acknowledgment Number field of the header
    pub fn get_ack(&self) -> u32 {
        self.ack
    }

    /// Returns the control flags
    pub fn get_flags(&self) -> Flags {
        self.flags
    }

    /// Checks if all the given flags are set
    pub fn has_flags(&self, flags: Flags) -> bool {
        self.flags.contains(flags)
    }

    /// Returns the Window field of the header
    pub fn get_window(&self) -> u16 {
        self.window
    }

    /// Returns the Checksum field as it was decoded
    pub fn get_checksum(&self) -> u16 {
        self.checksum
    }

    /// Returns the Urgent Pointer field of the header
    pub fn get_urgent_pointer(&self) -> u16 {
        self.urgent_pointer
    }

    /* Setters */
    /// Sets the Source (port) field of the header
    pub fn set_sport(&mut self, port: u16) {
        self.sport = port;
    }

    /// Sets the Destination (port) field of the header
    pub fn set_dport(&mut self, port: u16) {
        self.dport = port;
    }

    /// Sets the Sequence Number field of the header
    pub fn set_seq(&mut self, seq: u32) {
        self.seq = seq;
    }

    /// Sets the Acknowledgment Number field of the header
    pub fn set_ack(&mut self, ack: u32) {
        self.ack = ack;
    }

    /// Replaces the control flags
    pub fn set_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    /// Sets the Window field of the header
    pub fn set_window(&mut self, window: u16) {
        self.window = window;
    }

    /// Sets the Urgent Pointer field of the header
    pub fn set_urgent_pointer(&mut self, urgent_pointer: u16) {
        self.urgent_pointer = urgent_pointer;
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

    /// Removes the first option of the given kind
    pub fn remove_option(&mut self, kind: OptionKind) -> bool {
        self.options.remove(kind)
    }

    /// Returns the options of this header
    pub fn options(&self) -> &Options<OptionKind> {
        &self.options
    }

    /// Returns the Maximum Segment Size option
    pub fn mss(&self) -> Result<u16> {
        self.search_option(OptionKind::Mss)?.to()
    }

    /// Sets the Maximum Segment Size option
    pub fn set_mss(&mut self, mss: u16) -> Result<()> {
        let mut data = [0; 2];
        NE::write_u16(&mut data, mss);
        self.options.replace(OptionKind::Mss, &data)
    }

    /// Returns the shift count of the Window Scale option
    pub fn winscale(&self) -> Result<u8> {
        self.search_option(OptionKind::Wscale)?.to()
    }

    /// Sets the Window Scale option
    pub fn set_winscale(&mut self, shift: u8) -> Result<()> {
        self.options.replace(OptionKind::Wscale, &[shift])
    }

    /// Checks for the SACK Permitted option
    pub fn sack_permitted(&self) -> bool {
        self.options.try_search(OptionKind::SackOk).is_some()
    }

    /// Adds the SACK Permitted option
    pub fn set_sack_permitted(&mut self) -> Result<()> {
        self.options.replace(OptionKind::SackOk, &[])
    }

    /// Returns the edges of the blocks of the SACK option
    pub fn sack(&self) -> Result<Vec<u32>> {
        self.search_option(OptionKind::Sack)?.to()
    }

    /// Sets the SACK option
    pub fn set_sack(&mut self, edges: &[u32]) -> Result<()> {
        let mut data = vec![0; edges.len() * 4];
        NE::write_u32_into(edges, &mut data);
        self.options.replace(OptionKind::Sack, &data)
    }

    /// Returns the value and echo reply of the Timestamps option
    pub fn timestamp(&self) -> Result<(u32, u32)> {
        self.search_option(OptionKind::Tsopt)?.to()
    }

    /// Sets the Timestamps option
    pub fn set_timestamp(&mut self, value: u32, echo: u32) -> Result<()> {
        let mut data = [0; 8];
        NE::write_u32_into(&[value, echo], &mut data);
        self.options.replace(OptionKind::Tsopt, &data)
    }

    /* Miscellaneous */
    /// Returns the bytes carried by this segment
    ///
    /// Borrowed when the inner PDU is a raw payload, serialized otherwise
    pub fn payload(&self) -> Result<Cow<'_, [u8]>> {
        match self.inner.as_deref() {
            None => Ok(Cow::Borrowed(&[])),
            Some(inner) => match inner.cast::<raw::Payload>() {
                Ok(raw) => Ok(Cow::Borrowed(raw.data())),
                Err(_) => inner.serialize().map(Cow::Owned),
            },
        }
    }

    /// Checks the decoded Checksum field against the one computed with `ip`'s pseudo-header
    pub fn verify_checksum(&self, ip: &ipv4::Packet) -> Result<bool> {
        let pdu: &(dyn Pdu + 'static) = self;
        let mut bytes = pdu.serialize()?;
        NE::write_u16(&mut bytes[CHECKSUM], self.checksum);

        Ok(ipv4::verify_transport_checksum(
            ip.get_source(),
            ip.get_destination(),
            ipv4::Protocol::Tcp,
            &bytes,
        ))
    }
}

impl Pdu for Segment {
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

        NE::write_u16(&mut buffer[SOURCE], self.sport);
        NE::write_u16(&mut buffer[DESTINATION], self.dport);
        NE::write_u32(&mut buffer[SEQ], self.seq);
        NE::write_u32(&mut buffer[ACK], self.ack);

        buffer[DATA_OFFSET] = 0;
        set!(buffer[DATA_OFFSET], data_offset, (header_size / 4) as u8);
        buffer[FLAGS] = self.flags.bits();

        NE::write_u16(&mut buffer[WINDOW], self.window);
        NE::write_u16(&mut buffer[CHECKSUM], 0);
        NE::write_u16(&mut buffer[URGENT_POINTER], self.urgent_pointer);

        self.options
            .write(&mut buffer[MIN_HEADER_SIZE..header_size]);

        Ok(())
    }

    /// Writes the Checksum field if `outer` is an IPv4 packet
    fn fix_up(&self, buffer: &mut [u8], outer: Option<&(dyn Pdu + 'static)>) -> Result<()> {
        if let Some(ip) = outer.and_then(|outer| outer.cast::<ipv4::Packet>().ok()) {
            let cksum = ipv4::transport_checksum(ip, ipv4::Protocol::Tcp, buffer)?;
            NE::write_u16(&mut buffer[CHECKSUM], cksum);
        }

        Ok(())
    }

    chain!();
}

impl Layer for Segment {
    const PDU_TYPE: PduType = PduType::Tcp;

    fn decode(bytes: &[u8]) -> Result<Decoded<Self>> {
        if bytes.len() < MIN_HEADER_SIZE {
            return Err(Error::MalformedPacket);
        }

        let header_len = usize(get!(bytes[DATA_OFFSET], data_offset)) * 4;
        if header_len < MIN_HEADER_SIZE || header_len > bytes.len() {
            return Err(Error::MalformedPacket);
        }

        let segment = Segment {
            sport: NE::read_u16(&bytes[SOURCE]),
            dport: NE::read_u16(&bytes[DESTINATION]),
            seq: NE::read_u32(&bytes[SEQ]),
            ack: NE::read_u32(&bytes[ACK]),
            flags: Flags(bytes[FLAGS]),
            window: NE::read_u16(&bytes[WINDOW]),
            checksum: NE::read_u16(&bytes[CHECKSUM]),
            urgent_pointer: NE::read_u16(&bytes[URGENT_POINTER]),
            options: Options::parse(&bytes[MIN_HEADER_SIZE..header_len])?,
            inner: None,
        };

        Ok(Decoded::new(segment, header_len..bytes.len(), None))
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("tcp::Segment")
            .field("sport", &self.sport)
            .field("dport", &self.dport)
            .field("seq", &self.seq)
            .field("ack", &self.ack)
            .field("flags", &self.flags)
            .field("window", &self.window)
            .field("checksum", &Hex(self.checksum))
            .field("urgent_pointer", &self.urgent_pointer)
            .field("options", &self.options)
            .field("inner", &self.inner)
            .finish()
    }
}

/// Control flags
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Flags(u8);

impl Flags {
    /// No more data from sender
    pub const FIN: Self = Flags(1 << 0);
    /// Synchronize sequence numbers
    pub const SYN: Self = Flags(1 << 1);
    /// Reset the connection
    pub const RST: Self = Flags(1 << 2);
    /// Push function
    pub const PSH: Self = Flags(1 << 3);
    /// Acknowledgment field significant
    pub const ACK: Self = Flags(1 << 4);
    /// Urgent pointer field significant
    pub const URG: Self = Flags(1 << 5);
    /// ECN echo
    pub const ECE: Self = Flags(1 << 6);
    /// Congestion window reduced
    pub const CWR: Self = Flags(1 << 7);

    const NAMES: [(Flags, &'static str); 8] = [
        (Flags::FIN, "FIN"),
        (Flags::SYN, "SYN"),
        (Flags::RST, "RST"),
        (Flags::PSH, "PSH"),
        (Flags::ACK, "ACK"),
        (Flags::URG, "URG"),
        (Flags::ECE, "ECE"),
        (Flags::CWR, "CWR"),
    ];

    /// No flags set
    pub const fn empty() -> Self {
        Flags(0)
    }

    /// Returns the raw bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Checks if all the flags in `other` are set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the flags in `other`
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the flags in `other`
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<u8> for Flags {
    fn from(bits: u8) -> Self {
        Flags(bits)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut is_first = true;
        for (flag, name) in Self::NAMES.iter() {
            if self.contains(*flag) {
                if is_first {
                    is_first = false;
                } else {
                    f.write_str(" | ")?;
                }

                f.write_str(name)?;
            }
        }

        if is_first {
            f.write_str("(empty)")?;
        }

        Ok(())
    }
}

full_range!(
    u8,
    /// TCP option kind
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub enum OptionKind {
        /// End of Option List
        Eol = 0,
        /// No-Operation
        Nop = 1,
        /// Maximum Segment Size
        Mss = 2,
        /// Window Scale
        Wscale = 3,
        /// SACK Permitted
        SackOk = 4,
        /// SACK
        Sack = 5,
        /// Timestamps
        Tsopt = 8,
    }
);

#[cfg(test)]
mod tests {
    use crate::{
        ipv4,
        pdu::{Layer, Pdu},
        raw,
        tcp::{self, Flags, OptionKind},
        Error,
    };

    const IP_SRC: ipv4::Addr = ipv4::Addr([10, 0, 0, 1]);
    const IP_DST: ipv4::Addr = ipv4::Addr([10, 0, 0, 2]);

    fn syn() -> tcp::Segment {
        let mut tcp = tcp::Segment::new(49152, 80);
        tcp.set_seq(0xdead_beef);
        tcp.set_flags(Flags::SYN);
        tcp.set_window(65535);
        tcp.set_mss(1460).unwrap();
        tcp.set_sack_permitted().unwrap();
        tcp.set_timestamp(1, 0).unwrap();
        tcp.set_winscale(7).unwrap();
        tcp
    }

    #[test]
    fn serialize() {
        let tcp: Box<dyn Pdu> = Box::new(syn());
        let bytes = tcp.serialize().unwrap();

        assert_eq!(
            &bytes[..],
            &[
                0xc0, 0x00, // source
                0x00, 0x50, // destination
                0xde, 0xad, 0xbe, 0xef, // sequence number
                0, 0, 0, 0, // acknowledgment number
                0xa0, // data offset
                0x02, // flags
                0xff, 0xff, // window
                0, 0, // checksum
                0, 0, // urgent pointer
                2, 4, 0x05, 0xb4, // MSS
                4, 2, // SACK permitted
                8, 10, 0, 0, 0, 1, 0, 0, 0, 0, // timestamps
                3, 3, 7, // window scale
                0, // padding
            ][..]
        );
    }

    #[test]
    fn parse() {
        let tcp: Box<dyn Pdu> = Box::new(syn());
        let bytes = tcp.serialize().unwrap();

        let parsed = tcp::Segment::parse(&bytes).unwrap();
        assert_eq!(parsed.get_sport(), 49152);
        assert_eq!(parsed.get_dport(), 80);
        assert_eq!(parsed.get_seq(), 0xdead_beef);
        assert!(parsed.has_flags(Flags::SYN));
        assert!(!parsed.has_flags(Flags::SYN | Flags::ACK));
        assert_eq!(parsed.mss(), Ok(1460));
        assert_eq!(parsed.winscale(), Ok(7));
        assert_eq!(parsed.timestamp(), Ok((1, 0)));
        assert!(parsed.sack_permitted());
        assert_eq!(parsed.sack(), Err(Error::OptionNotFound));

        let parsed: Box<dyn Pdu> = Box::new(parsed);
        assert!(*parsed == *tcp);
    }

    #[test]
    fn setters_replace() {
        let mut tcp = syn();
        tcp.set_mss(536).unwrap();
        tcp.set_sack(&[100, 200, 300, 400]).unwrap();

        assert_eq!(tcp.mss(), Ok(536));
        assert_eq!(tcp.sack(), Ok(vec![100, 200, 300, 400]));
        assert_eq!(
            tcp.options()
                .iter()
                .filter(|opt| opt.kind() == OptionKind::Mss)
                .count(),
            1
        );
    }

    #[test]
    fn checksum() {
        let mut ip: Box<dyn Pdu> = Box::new(ipv4::Packet::new(IP_SRC, IP_DST));
        ip.push(Box::new(syn()));
        ip.push(Box::new(raw::Payload::new(b"GET / HTTP/1.1\r\n\r\n")));

        let bytes = ip.serialize().unwrap();
        let parsed = ipv4::Packet::parse(&bytes).unwrap();
        let tcp = parsed.inner().unwrap().cast::<tcp::Segment>().unwrap();

        assert_ne!(tcp.get_checksum(), 0);
        assert_eq!(tcp.verify_checksum(&parsed), Ok(true));
        assert_eq!(tcp.payload().unwrap(), &b"GET / HTTP/1.1\r\n\r\n"[..]);

        let other = ipv4::Packet::new(IP_DST, IP_DST);
        assert_eq!(tcp.verify_checksum(&other), Ok(false));
    }

    #[test]
    fn options_too_long() {
        let mut tcp = tcp::Segment::new(1, 2);
        tcp.add_option(OptionKind::Unknown(253), &[0; 39]).unwrap();

        let tcp: Box<dyn Pdu> = Box::new(tcp);
        assert_eq!(tcp.serialize().unwrap_err(), Error::Serialization);
    }

    #[test]
    fn bad_data_offset() {
        let tcp: Box<dyn Pdu> = Box::new(tcp::Segment::new(1, 2));
        let mut bytes = tcp.serialize().unwrap();

        bytes[12] = 0x40;
        assert_eq!(tcp::Segment::parse(&bytes).unwrap_err(), Error::MalformedPacket);

        bytes[12] = 0x60;
        assert_eq!(tcp::Segment::parse(&bytes).unwrap_err(), Error::MalformedPacket);
    }

    #[test]
    fn malformed_options() {
        let tcp: Box<dyn Pdu> = Box::new(syn());
        let mut bytes = tcp.serialize().unwrap();

        // MSS option claims to run past the end of the header
        bytes[21] = 40;
        assert_eq!(tcp::Segment::parse(&bytes).unwrap_err(), Error::MalformedOption);
    }

    #[test]
    fn flags() {
        let mut flags = Flags::SYN | Flags::ACK;
        assert_eq!(format!("{:?}", flags), "SYN | ACK");

        flags.remove(Flags::SYN);
        flags |= Flags::FIN;
        assert_eq!(format!("{:?}", flags), "FIN | ACK");
        assert_eq!(format!("{:?}", Flags::empty()), "(empty)");
    }
}
