//! PDU: Protocol Data Unit
//!
//! A packet is a chain of layers, outermost (link layer) first. Every layer exclusively owns the
//! layer it encapsulates, its *inner* PDU, through a `Box<dyn Pdu>`. Attaching a layer moves it into
//! its new owner and detaching one moves it back out, so a chain can't contain cycles and dropping a
//! layer drops everything below it.
//!
//! There is no stored pointer back to the *outer* layer. The outer layer is handed down during
//! traversals instead: serialization passes it to `Pdu::fix_up`, which is where layers like TCP and
//! UDP need it (pseudo-header checksums).
//!
//! # Serialization
//!
//! `serialize` walks the chain outermost first. Each layer
//!
//! 1. writes its own header (and trailer) into a buffer that spans the whole PDU,
//! 2. lets its inner layer serialize itself into the space between header and trailer, and
//! 3. patches the header fields that depend on the serialized inner layers (lengths, checksums).

use core::any::Any;
use core::fmt;
use core::ops::Range;

use crate::{registry::Registry, Error, Result};

full_range!(
    u32,
    /// Protocol type tag
    ///
    /// Out of tree protocol modules use `PduType::Unknown` with a value of their choosing.
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub enum PduType {
        /// Ethernet II
        EthernetII = 1,
        /// ARP
        Arp = 2,
        /// IPv4
        Ipv4 = 3,
        /// ICMP
        Icmp = 4,
        /// TCP
        Tcp = 5,
        /// UDP
        Udp = 6,
        /// Uninterpreted bytes
        Raw = 7,
    }
);

/// The contract a protocol layer implements to take part in a chain
pub trait Pdu: Any + fmt::Debug + Send {
    /// Returns the protocol type tag of this layer
    fn pdu_type(&self) -> PduType;

    /// Size of this layer's header in bytes, options included
    fn header_size(&self) -> usize;

    /// Size of this layer's trailer in bytes
    fn trailer_size(&self) -> usize {
        0
    }

    /// Layers that can be parsed but not turned back into bytes return `false`
    fn is_serializable(&self) -> bool {
        true
    }

    /// View into the inner PDU
    fn inner(&self) -> Option<&(dyn Pdu + 'static)>;

    /// Mutable view into the inner PDU
    fn inner_mut(&mut self) -> Option<&mut (dyn Pdu + 'static)>;

    /// Replaces the inner PDU and hands the previous one back to the caller
    fn replace_inner(&mut self, inner: Option<Box<dyn Pdu>>) -> Option<Box<dyn Pdu>>;

    /// Deep copy of this layer and every layer it encapsulates
    fn clone_pdu(&self) -> Box<dyn Pdu>;

    /// Semantic equality against a layer of unknown type
    fn dyn_eq(&self, other: &dyn Pdu) -> bool;

    /// Writes the header and trailer of this layer
    ///
    /// `buffer` spans the whole PDU: `header_size() + inner size + trailer_size()` bytes. The bytes
    /// that belong to the inner PDU must be left alone.
    fn write_header(&self, buffer: &mut [u8]) -> Result<()>;

    /// Patches header fields that depend on the serialized inner layers
    ///
    /// Called once the inner chain has been written into `buffer`. `outer` is the layer that
    /// encapsulates this one, if any.
    fn fix_up(&self, buffer: &mut [u8], outer: Option<&(dyn Pdu + 'static)>) -> Result<()> {
        let _ = (buffer, outer);
        Ok(())
    }

    /// Upcast used by the checked downcasts
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast used by the checked downcasts
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A concrete protocol layer: a type tag plus a decoder
pub trait Layer: Pdu + Sized {
    /// Type tag shared by every instance of this layer
    const PDU_TYPE: PduType;

    /// Parses this layer's header off the front of `bytes`
    ///
    /// The decoder doesn't look at the payload; it reports where the payload is and which protocol
    /// the header says it contains.
    fn decode(bytes: &[u8]) -> Result<Decoded<Self>>;

    /// Parses this layer and, recursively, its payload using the builtin registry
    fn parse(bytes: &[u8]) -> Result<Self> {
        Registry::builtin().parse(bytes)
    }
}

/// Output of a layer decoder
#[derive(Debug)]
pub struct Decoded<T> {
    /// The decoded header, without inner PDU
    pub pdu: T,
    /// Location of the payload within the decoded bytes
    pub payload: Range<usize>,
    /// Protocol of the payload, as declared by the header
    pub next: Option<PduType>,
    /// `false` if the layer carries a checksum and it doesn't match
    pub checksum_ok: bool,
}

impl<T> Decoded<T> {
    /// Decoder output with a valid (or absent) checksum
    pub fn new(pdu: T, payload: Range<usize>, next: Option<PduType>) -> Self {
        Decoded {
            pdu,
            payload,
            next,
            checksum_ok: true,
        }
    }

    /// Records the outcome of the checksum verification
    pub fn checksum(mut self, ok: bool) -> Self {
        self.checksum_ok = ok;
        self
    }
}

/// Checked downcast of a generic PDU into a concrete layer
pub fn pdu_cast<'a, T>(pdu: &'a (dyn Pdu + 'static)) -> Result<&'a T>
where
    T: Layer,
{
    if pdu.pdu_type() != T::PDU_TYPE {
        return Err(Error::BadCast);
    }

    pdu.as_any().downcast_ref::<T>().ok_or(Error::BadCast)
}

/// Mutable checked downcast of a generic PDU into a concrete layer
pub fn pdu_cast_mut<'a, T>(pdu: &'a mut (dyn Pdu + 'static)) -> Result<&'a mut T>
where
    T: Layer,
{
    if pdu.pdu_type() != T::PDU_TYPE {
        return Err(Error::BadCast);
    }

    pdu.as_any_mut().downcast_mut::<T>().ok_or(Error::BadCast)
}

impl dyn Pdu {
    /* Size */
    /// Size in bytes of this layer and everything it encapsulates
    pub fn size(&self) -> usize {
        self.header_size() + self.inner().map_or(0, |inner| inner.size()) + self.trailer_size()
    }

    /* Ownership */
    /// Takes ownership of `pdu` as the new inner layer; the previous inner layer is dropped
    pub fn attach_inner(&mut self, pdu: Box<dyn Pdu>) {
        self.replace_inner(Some(pdu));
    }

    /// Detaches the inner layer and hands it to the caller
    pub fn release_inner(&mut self) -> Option<Box<dyn Pdu>> {
        self.replace_inner(None)
    }

    /// Attaches `pdu` below the innermost layer of this chain
    pub fn push(&mut self, pdu: Box<dyn Pdu>) {
        match self.inner_mut() {
            Some(inner) => inner.push(pdu),
            None => self.attach_inner(pdu),
        }
    }

    /* Lookup */
    /// Returns an iterator over the layers of this chain, outermost first
    pub fn layers(&self) -> Layers<'_> {
        Layers { next: Some(self) }
    }

    /// Returns the outermost layer of type `T`, if any
    pub fn try_find_pdu<T>(&self) -> Option<&T>
    where
        T: Layer,
    {
        self.layers().find_map(|pdu| pdu_cast::<T>(pdu).ok())
    }

    /// Returns the outermost layer of type `T`
    pub fn find_pdu<T>(&self) -> Result<&T>
    where
        T: Layer,
    {
        self.try_find_pdu().ok_or(Error::PduNotFound)
    }

    /// Returns the innermost layer of type `T`, if any
    pub fn try_rfind_pdu<T>(&self) -> Option<&T>
    where
        T: Layer,
    {
        let layers = self.layers().collect::<Vec<_>>();
        layers
            .into_iter()
            .rev()
            .find_map(|pdu| pdu_cast::<T>(pdu).ok())
    }

    /// Returns the innermost layer of type `T`
    pub fn rfind_pdu<T>(&self) -> Result<&T>
    where
        T: Layer,
    {
        self.try_rfind_pdu().ok_or(Error::PduNotFound)
    }

    /// Returns the outermost layer of type `T` for modification
    pub fn find_pdu_mut<T>(&mut self) -> Result<&mut T>
    where
        T: Layer,
    {
        if self.pdu_type() == T::PDU_TYPE {
            return pdu_cast_mut(self);
        }

        match self.inner_mut() {
            Some(inner) => inner.find_pdu_mut(),
            None => Err(Error::PduNotFound),
        }
    }

    /// Checked downcast into a concrete layer
    pub fn cast<T>(&self) -> Result<&T>
    where
        T: Layer,
    {
        pdu_cast(self)
    }

    /// Mutable checked downcast into a concrete layer
    pub fn cast_mut<T>(&mut self) -> Result<&mut T>
    where
        T: Layer,
    {
        pdu_cast_mut(self)
    }

    /* Serialization */
    /// Serializes this chain into a new buffer of exactly `size()` bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![0; self.size()];
        serialize_into(self, &mut buffer, None)?;
        Ok(buffer)
    }
}

fn serialize_into(
    pdu: &(dyn Pdu + 'static),
    buffer: &mut [u8],
    outer: Option<&(dyn Pdu + 'static)>,
) -> Result<()> {
    if !pdu.is_serializable() {
        return Err(Error::PduNotSerializable);
    }

    pdu.write_header(buffer)?;

    if let Some(inner) = pdu.inner() {
        let start = pdu.header_size();
        let end = buffer.len() - pdu.trailer_size();
        serialize_into(inner, &mut buffer[start..end], Some(pdu))?;
    }

    pdu.fix_up(buffer, outer)
}

impl PartialEq for dyn Pdu {
    fn eq(&self, other: &dyn Pdu) -> bool {
        self.dyn_eq(other)
    }
}

impl Clone for Box<dyn Pdu> {
    fn clone(&self) -> Self {
        self.clone_pdu()
    }
}

/// Iterator over the layers of a chain, outermost first
pub struct Layers<'a> {
    next: Option<&'a (dyn Pdu + 'static)>,
}

impl<'a> Iterator for Layers<'a> {
    type Item = &'a (dyn Pdu + 'static);

    fn next(&mut self) -> Option<Self::Item> {
        let pdu = self.next?;
        self.next = pdu.inner();
        Some(pdu)
    }
}
