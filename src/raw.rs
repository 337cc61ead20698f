//! Opaque payload bytes

use core::fmt;

use crate::{
    fmt::Bytes,
    pdu::{Decoded, Layer, Pdu, PduType},
    registry::Registry,
    Result,
};

/// Uninterpreted bytes at the end of a chain
///
/// Decoding falls back to this layer whenever the next protocol is unknown or disabled. The
/// `inner` slot is kept so that a payload can still be composed on top of, but nothing ever
/// decodes into it.
pub struct Payload {
    data: Vec<u8>,
    inner: Option<Box<dyn Pdu>>,
}

layer!(Payload { data } derived {});

impl Payload {
    /// Copies `data` into a new payload
    pub fn new(data: &[u8]) -> Self {
        Payload {
            data: data.to_owned(),
            inner: None,
        }
    }

    /// Returns the payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the payload bytes for in-place modification
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Consumes the payload and returns its bytes
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Reinterprets the payload as a `T` layer, decoding whatever follows it
    pub fn to<T>(&self) -> Result<T>
    where
        T: Layer,
    {
        Registry::builtin().parse(&self.data)
    }
}

impl Pdu for Payload {
    fn pdu_type(&self) -> PduType {
        Self::PDU_TYPE
    }

    fn header_size(&self) -> usize {
        self.data.len()
    }

    fn write_header(&self, buffer: &mut [u8]) -> Result<()> {
        buffer[..self.data.len()].copy_from_slice(&self.data);

        Ok(())
    }

    chain!();
}

impl Layer for Payload {
    const PDU_TYPE: PduType = PduType::Raw;

    fn decode(bytes: &[u8]) -> Result<Decoded<Self>> {
        let len = bytes.len();

        Ok(Decoded::new(Payload::new(bytes), len..len, None))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("raw::Payload")
            .field("data", &Bytes(&self.data))
            .field("inner", &self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        pdu::{Layer, Pdu},
        raw, udp, Error,
    };

    #[test]
    fn serialize() {
        let raw: Box<dyn Pdu> = Box::new(raw::Payload::new(b"hello"));

        assert_eq!(raw.size(), 5);
        assert_eq!(raw.serialize().unwrap(), b"hello");
    }

    #[test]
    fn decode_keeps_everything() {
        let raw = raw::Payload::parse(&[1, 2, 3]).unwrap();

        assert_eq!(raw.data(), &[1, 2, 3]);
        assert!(raw.inner().is_none());
    }

    #[test]
    fn empty() {
        let raw: Box<dyn Pdu> = Box::new(raw::Payload::new(&[]));

        assert_eq!(raw.size(), 0);
        assert_eq!(raw.serialize().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn reinterpret() {
        let raw = raw::Payload::new(&[0, 53, 0, 53, 0, 9, 0, 0, b'x']);

        let udp = raw.to::<udp::Packet>().unwrap();
        assert_eq!(udp.get_dport(), 53);
        assert_eq!(
            udp.inner().unwrap().cast::<raw::Payload>().unwrap().data(),
            b"x"
        );

        assert_eq!(
            raw::Payload::new(&[0; 4]).to::<udp::Packet>().unwrap_err(),
            Error::MalformedPacket
        );
    }

    #[test]
    fn debug() {
        let raw = raw::Payload::new(&[0xde, 0xad]);

        assert_eq!(
            format!("{:?}", raw),
            "raw::Payload { data: [0xde, 0xad], inner: None }"
        );
    }
}
