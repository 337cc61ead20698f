//! UDP: User Datagram Protocol

use core::fmt;
use core::ops::Range;

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u16, usize};

use crate::{
    fmt::Hex,
    ipv4,
    pdu::{Decoded, Layer, Pdu, PduType},
    Error, Result,
};

/* Packet structure */
const SOURCE: Range<usize> = 0..2;
const DESTINATION: Range<usize> = 2..4;
const LENGTH: Range<usize> = 4..6;
const CHECKSUM: Range<usize> = 6..8;

/// Size of the UDP header
pub const HEADER_SIZE: usize = CHECKSUM.end;

/// UDP packet
///
/// The Length and Checksum fields are computed during serialization. The checksum covers the
/// IPv4 pseudo-header, so it's only computed when the packet is encapsulated in an IPv4 packet;
/// otherwise it's left as zero (no checksum).
pub struct Packet {
    sport: u16,
    dport: u16,
    checksum: u16,
    inner: Option<Box<dyn Pdu>>,
}

layer!(Packet { sport, dport } derived { checksum });

impl Packet {
    /* Constructors */
    /// Creates a new UDP packet
    pub fn new(sport: u16, dport: u16) -> Self {
        Packet {
            sport,
            dport,
            checksum: 0,
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

    /// Returns the Checksum field as it was decoded
    pub fn get_checksum(&self) -> u16 {
        self.checksum
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

    /* Miscellaneous */
    /// Checks the decoded Checksum field against the one computed with `ip`'s pseudo-header
    ///
    /// A zero checksum means "no checksum" and always matches
    pub fn verify_checksum(&self, ip: &ipv4::Packet) -> Result<bool> {
        if self.checksum == 0 {
            return Ok(true);
        }

        let pdu: &(dyn Pdu + 'static) = self;
        let mut bytes = pdu.serialize()?;
        NE::write_u16(&mut bytes[CHECKSUM], 0);
        let expected = checksum(ip, &bytes)?;

        Ok(expected == self.checksum)
    }
}

fn checksum(ip: &ipv4::Packet, bytes: &[u8]) -> Result<u16> {
    let cksum = ipv4::transport_checksum(ip, ipv4::Protocol::Udp, bytes)?;

    // all zeros means "no checksum"
    Ok(if cksum == 0 { 0xffff } else { cksum })
}

impl Pdu for Packet {
    fn pdu_type(&self) -> PduType {
        Self::PDU_TYPE
    }

    fn header_size(&self) -> usize {
        HEADER_SIZE
    }

    fn write_header(&self, buffer: &mut [u8]) -> Result<()> {
        NE::write_u16(&mut buffer[SOURCE], self.sport);
        NE::write_u16(&mut buffer[DESTINATION], self.dport);
        NE::write_u16(&mut buffer[CHECKSUM], 0);

        Ok(())
    }

    /// Writes the Length field, and the Checksum field if `outer` is an IPv4 packet
    fn fix_up(&self, buffer: &mut [u8], outer: Option<&(dyn Pdu + 'static)>) -> Result<()> {
        let len = u16(buffer.len()).map_err(|_| Error::Serialization)?;
        NE::write_u16(&mut buffer[LENGTH], len);

        if let Some(ip) = outer.and_then(|outer| outer.cast::<ipv4::Packet>().ok()) {
            let cksum = checksum(ip, buffer)?;
            NE::write_u16(&mut buffer[CHECKSUM], cksum);
        }

        Ok(())
    }

    chain!();
}

impl Layer for Packet {
    const PDU_TYPE: PduType = PduType::Udp;

    fn decode(bytes: &[u8]) -> Result<Decoded<Self>> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::MalformedPacket);
        }

        let len = usize(NE::read_u16(&bytes[LENGTH]));
        if len < HEADER_SIZE || len > bytes.len() {
            return Err(Error::MalformedPacket);
        }

        let packet = Packet {
            sport: NE::read_u16(&bytes[SOURCE]),
            dport: NE::read_u16(&bytes[DESTINATION]),
            checksum: NE::read_u16(&bytes[CHECKSUM]),
            inner: None,
        };

        Ok(Decoded::new(packet, HEADER_SIZE..len, None))
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("udp::Packet")
            .field("sport", &self.sport)
            .field("dport", &self.dport)
            .field("checksum", &Hex(self.checksum))
            .field("inner", &self.inner)
            .finish()
    }
}
