//! Ethernet II

use core::{fmt, ops::Range};

use byteorder::{ByteOrder, NetworkEndian as NE};

use crate::{
    fmt::Hex,
    mac,
    pdu::{Decoded, Layer, Pdu, PduType},
    Error, Result,
};

/* Frame format */
const DESTINATION: Range<usize> = 0..6;
const SOURCE: Range<usize> = 6..12;
const TYPE: Range<usize> = 12..14;

/// Size of the MAC header
pub const HEADER_SIZE: usize = TYPE.end;

/// Minimum size of a frame, frame check sequence excluded
pub const MIN_FRAME_SIZE: usize = 60;

/// Layer 2 Ethernet frame
///
/// # Structure
///
/// - MAC destination. 6 bytes
/// - MAC source. 6 bytes
/// - Ethertype. 2 bytes
/// - Payload. 46-1500 bytes (\*)
///
/// (\*) Frames that carry a payload are zero padded to `MIN_FRAME_SIZE` on serialization. The
/// frame check sequence is not part of this representation.
///
/// Ethernet has no length field, so the padding can't be told apart from the payload when
/// parsing. Inner protocols with a length of their own (IPv4, ARP) drop it; a raw payload keeps
/// it. A short raw payload therefore comes back padded to 46 bytes.
///
/// The Ethertype is taken from the inner PDU when its protocol has one; the `type_` field is only
/// used for payloads whose protocol has no Ethertype of its own (e.g. raw bytes).
pub struct Frame {
    destination: mac::Addr,
    source: mac::Addr,
    type_: Type,
    inner: Option<Box<dyn Pdu>>,
}

layer!(Frame { destination, source } derived { type_ });

impl Frame {
    /* Constructors */
    /// Creates a new Ethernet frame with no payload and an Ethertype of IPv4
    pub fn new(destination: mac::Addr, source: mac::Addr) -> Self {
        Frame {
            destination,
            source,
            type_: Type::Ipv4,
            inner: None,
        }
    }

    /* Getters */
    /// Returns the Destination field of the header
    pub fn get_destination(&self) -> mac::Addr {
        self.destination
    }

    /// Returns the Source field of the header
    pub fn get_source(&self) -> mac::Addr {
        self.source
    }

    /// Returns the Type field of the header
    pub fn get_type(&self) -> Type {
        self.inner
            .as_ref()
            .and_then(|inner| Type::from_pdu_type(inner.pdu_type()))
            .unwrap_or(self.type_)
    }

    /* Setters */
    /// Sets the destination field of the header
    pub fn set_destination(&mut self, addr: mac::Addr) {
        self.destination = addr;
    }

    /// Sets the source field of the header
    pub fn set_source(&mut self, addr: mac::Addr) {
        self.source = addr;
    }

    /// Sets the Type field of the header
    pub fn set_type(&mut self, type_: Type) {
        self.type_ = type_;
    }
}

impl Pdu for Frame {
    fn pdu_type(&self) -> PduType {
        Self::PDU_TYPE
    }

    fn header_size(&self) -> usize {
        HEADER_SIZE
    }

    fn trailer_size(&self) -> usize {
        match &self.inner {
            Some(inner) => MIN_FRAME_SIZE.saturating_sub(HEADER_SIZE + inner.size()),
            None => 0,
        }
    }

    fn write_header(&self, buffer: &mut [u8]) -> Result<()> {
        buffer[DESTINATION].copy_from_slice(&self.destination.0);
        buffer[SOURCE].copy_from_slice(&self.source.0);
        NE::write_u16(&mut buffer[TYPE], self.get_type().into());

        let padding = buffer.len() - self.trailer_size();
        for byte in &mut buffer[padding..] {
            *byte = 0;
        }

        Ok(())
    }

    chain!();
}

impl Layer for Frame {
    const PDU_TYPE: PduType = PduType::EthernetII;

    fn decode(bytes: &[u8]) -> Result<Decoded<Self>> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::MalformedPacket);
        }

        let type_ = Type::from(NE::read_u16(&bytes[TYPE]));
        let frame = Frame {
            destination: mac::Addr::read(&bytes[DESTINATION]),
            source: mac::Addr::read(&bytes[SOURCE]),
            type_,
            inner: None,
        };

        Ok(Decoded::new(
            frame,
            HEADER_SIZE..bytes.len(),
            type_.pdu_type(),
        ))
    }
}

/// NOTE the payload is printed as a nested layer
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ether::Frame")
            .field("destination", &self.get_destination())
            .field("source", &self.get_source())
            .field("type", &Hex(self.get_type().into()))
            .field("inner", &self.inner)
            .finish()
    }
}

full_range!(
    u16,
    /// Ether Type
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub enum Type {
        /// IPv4
        Ipv4 = 0x0800,

        /// ARP
        Arp = 0x0806,

        /// IPv6
        Ipv6 = 0x86DD,
    }
);

impl Type {
    /// Protocol of a payload with this Ethertype, if it has a decoder in this crate
    pub fn pdu_type(self) -> Option<PduType> {
        match self {
            Type::Ipv4 => Some(PduType::Ipv4),
            Type::Arp => Some(PduType::Arp),
            _ => None,
        }
    }

    /// Ethertype of a payload of the given protocol
    pub fn from_pdu_type(ty: PduType) -> Option<Self> {
        match ty {
            PduType::Ipv4 => Some(Type::Ipv4),
            PduType::Arp => Some(Type::Arp),
            _ => None,
        }
    }
}
