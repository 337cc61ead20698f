//! Packets: a PDU chain plus capture metadata

use core::time::Duration;

use crate::{
    pdu::{Layer, Pdu, PduType},
    registry::Registry,
    Error, Result,
};

full_range!(
    u32,
    /// Link layer type of captured bytes
    ///
    /// Values follow the pcap `LINKTYPE_*` numbering
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub enum LinkType {
        /// Ethernet II frames
        Ethernet = 1,
        /// Raw IP, no link layer header
        Raw = 101,
    }
);

/// Top level container of a PDU chain
#[derive(Clone, Debug, Default)]
pub struct Packet {
    pdu: Option<Box<dyn Pdu>>,
    timestamp: Duration,
}

impl Packet {
    /* Constructors */
    /// Wraps a chain whose outermost layer is `pdu`
    pub fn new<P>(pdu: P) -> Self
    where
        P: Pdu,
    {
        Packet::from_boxed(Box::new(pdu))
    }

    /// Wraps an already boxed chain
    pub fn from_boxed(pdu: Box<dyn Pdu>) -> Self {
        Packet {
            pdu: Some(pdu),
            timestamp: Duration::default(),
        }
    }

    /// Sets the capture timestamp (time since the epoch)
    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Decodes captured bytes with the builtin registry
    pub fn parse(link: LinkType, bytes: &[u8]) -> Result<Self> {
        Packet::parse_with(Registry::builtin(), link, bytes, Duration::default())
    }

    /// Decodes captured bytes with the given registry
    ///
    /// Unknown link types are kept as a raw payload
    pub fn parse_with(
        registry: &Registry,
        link: LinkType,
        bytes: &[u8],
        timestamp: Duration,
    ) -> Result<Self> {
        let ty = match link {
            LinkType::Ethernet => PduType::EthernetII,
            LinkType::Raw => match bytes.first().map(|b| b >> 4) {
                Some(4) => PduType::Ipv4,
                Some(_) => PduType::Raw,
                None => return Err(Error::MalformedPacket),
            },
            LinkType::Unknown(_) => PduType::Raw,
        };

        let pdu = registry.decode(ty, bytes)?;
        Ok(Packet::from_boxed(pdu).with_timestamp(timestamp))
    }

    /* Getters */
    /// Returns the capture timestamp
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Returns the outermost layer
    pub fn pdu(&self) -> Option<&(dyn Pdu + 'static)> {
        self.pdu.as_deref()
    }

    /// Returns the outermost layer for modification
    pub fn pdu_mut(&mut self) -> Option<&mut (dyn Pdu + 'static)> {
        self.pdu.as_deref_mut()
    }

    /// Takes the chain out of this packet
    pub fn release_pdu(&mut self) -> Option<Box<dyn Pdu>> {
        self.pdu.take()
    }

    /// Size of the chain in bytes
    pub fn size(&self) -> usize {
        self.pdu().map_or(0, |pdu| pdu.size())
    }

    /* Lookup */
    /// Returns the outermost layer of type `T`
    pub fn find_pdu<T>(&self) -> Result<&T>
    where
        T: Layer,
    {
        self.pdu().ok_or(Error::PduNotFound)?.find_pdu()
    }

    /// Returns the outermost layer of type `T`, if any
    pub fn try_find_pdu<T>(&self) -> Option<&T>
    where
        T: Layer,
    {
        self.pdu()?.try_find_pdu()
    }

    /// Returns the innermost layer of type `T`
    pub fn rfind_pdu<T>(&self) -> Result<&T>
    where
        T: Layer,
    {
        self.pdu().ok_or(Error::PduNotFound)?.rfind_pdu()
    }

    /// Returns the outermost layer of type `T` for modification
    pub fn find_pdu_mut<T>(&mut self) -> Result<&mut T>
    where
        T: Layer,
    {
        self.pdu_mut().ok_or(Error::PduNotFound)?.find_pdu_mut()
    }

    /* Serialization */
    /// Serializes the chain; an empty packet serializes to no bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.pdu().map_or(Ok(vec![]), |pdu| pdu.serialize())
    }
}
