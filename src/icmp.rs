//! ICMP: Internet Control Message Protocol
//!
//! # References
//!
//! - [RFC 792: Internet Control Message Protocol][rfc]
//!
//! [rfc]: https://tools.ietf.org/html/rfc792

use core::fmt;
use core::ops::Range;

use byteorder::{ByteOrder, NetworkEndian as NE};

use crate::{
    fmt::Hex,
    ipv4,
    pdu::{Decoded, Layer, Pdu, PduType},
    Error, Result,
};

/* Message structure */
const TYPE: usize = 0;
const CODE: usize = 1;
const CHECKSUM: Range<usize> = 2..4;
const REST: Range<usize> = 4..8;

/// Size of the ICMP header
pub const HEADER_SIZE: usize = REST.end;

/// ICMP Message
///
/// The payload (e.g. echo data or the header of the offending datagram) is kept as an inner PDU
pub struct Message {
    type_: Type,
    code: u8,
    checksum: u16,
    rest: [u8; 4],
    inner: Option<Box<dyn Pdu>>,
}

layer!(Message { type_, code, rest } derived { checksum });

impl Message {
    /* Constructors */
    /// Creates a new ICMP message of the given type with code 0
    pub fn new(type_: Type) -> Self {
        Message {
            type_,
            code: 0,
            checksum: 0,
            rest: [0; 4],
            inner: None,
        }
    }

    /// Creates an Echo Request message
    pub fn echo_request(identifier: u16, sequence_number: u16) -> Self {
        let mut m = Message::new(Type::EchoRequest);
        NE::write_u16(&mut m.rest[..2], identifier);
        NE::write_u16(&mut m.rest[2..], sequence_number);
        m
    }

    /// Creates the Echo Reply to this Echo Request
    pub fn echo_reply(&self) -> Result<Self> {
        if self.type_ != Type::EchoRequest {
            return Err(Error::FieldNotPresent);
        }

        let mut reply = self.clone();
        reply.type_ = Type::EchoReply;
        Ok(reply)
    }

    /* Getters */
    /// Returns the Type field of the header
    pub fn get_type(&self) -> Type {
        self.type_
    }

    /// Returns the Code field of the header
    pub fn get_code(&self) -> u8 {
        self.code
    }

    /// Returns the Checksum field as it was decoded
    pub fn get_checksum(&self) -> u16 {
        self.checksum
    }

    /// Returns the "rest of header" field, whose meaning depends on the message type
    pub fn get_rest(&self) -> [u8; 4] {
        self.rest
    }

    /// Returns the Identifier field of an Echo message
    pub fn get_identifier(&self) -> Result<u16> {
        self.echo()?;
        Ok(NE::read_u16(&self.rest[..2]))
    }

    /// Returns the Sequence Number field of an Echo message
    pub fn get_sequence_number(&self) -> Result<u16> {
        self.echo()?;
        Ok(NE::read_u16(&self.rest[2..]))
    }

    /* Setters */
    /// Sets the Type field of the header
    pub fn set_type(&mut self, type_: Type) {
        self.type_ = type_;
    }

    /// Sets the Code field of the header
    pub fn set_code(&mut self, code: u8) {
        self.code = code;
    }

    /// Sets the "rest of header" field
    pub fn set_rest(&mut self, rest: [u8; 4]) {
        self.rest = rest;
    }

    /// Sets the Identifier field of an Echo message
    pub fn set_identifier(&mut self, id: u16) -> Result<()> {
        self.echo()?;
        NE::write_u16(&mut self.rest[..2], id);
        Ok(())
    }

    /// Sets the Sequence Number field of an Echo message
    pub fn set_sequence_number(&mut self, seq_no: u16) -> Result<()> {
        self.echo()?;
        NE::write_u16(&mut self.rest[2..], seq_no);
        Ok(())
    }

    /* Private */
    fn echo(&self) -> Result<()> {
        match self.type_ {
            Type::EchoRequest | Type::EchoReply => Ok(()),
            _ => Err(Error::FieldNotPresent),
        }
    }
}

impl Pdu for Message {
    fn pdu_type(&self) -> PduType {
        Self::PDU_TYPE
    }

    fn header_size(&self) -> usize {
        HEADER_SIZE
    }

    fn write_header(&self, buffer: &mut [u8]) -> Result<()> {
        buffer[TYPE] = self.type_.into();
        buffer[CODE] = self.code;
        buffer[CHECKSUM].copy_from_slice(&[0, 0]);
        buffer[REST].copy_from_slice(&self.rest);

        Ok(())
    }

    /// Computes the checksum over the header and the payload
    fn fix_up(&self, buffer: &mut [u8], _: Option<&(dyn Pdu + 'static)>) -> Result<()> {
        let cksum = ipv4::checksum(buffer);
        NE::write_u16(&mut buffer[CHECKSUM], cksum);

        Ok(())
    }

    chain!();
}

impl Layer for Message {
    const PDU_TYPE: PduType = PduType::Icmp;

    fn decode(bytes: &[u8]) -> Result<Decoded<Self>> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::MalformedPacket);
        }

        let mut rest = [0; 4];
        rest.copy_from_slice(&bytes[REST]);
        let message = Message {
            type_: bytes[TYPE].into(),
            code: bytes[CODE],
            checksum: NE::read_u16(&bytes[CHECKSUM]),
            rest,
            inner: None,
        };

        Ok(Decoded::new(message, HEADER_SIZE..bytes.len(), None)
            .checksum(ipv4::checksum(bytes) == 0))
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("icmp::Message")
            .field("type", &self.get_type())
            .field("code", &self.get_code())
            .field("checksum", &Hex(self.get_checksum()))
            .field("inner", &self.inner)
            .finish()
    }
}

full_range!(
    u8,
    /// ICMP types
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Type {
        /// Echo Reply
        EchoReply = 0,
        /// Destination Unreachable
        DestinationUnreachable = 3,
        /// Echo Request
        EchoRequest = 8,
        /// Time Exceeded
        TimeExceeded = 11,
    }
);
