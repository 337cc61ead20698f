//! Protocol registry
//!
//! Maps protocol type tags to decoders and keeps track of which protocols and features are
//! enabled. Decoding a chain goes through a registry: each decoder parses its own header and names
//! the protocol of its payload, and the registry looks up the next decoder.
//!
//! Payloads whose protocol is unknown, unregistered or disabled are kept as `raw::Payload`.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use tracing::trace;

use crate::{
    arp, ether, icmp, ipv4,
    pdu::{Decoded, Layer, Pdu, PduType},
    raw, tcp, udp, Error, Result,
};

/// Type erased layer decoder
pub type DecodeFn = fn(&[u8]) -> Result<Decoded<Box<dyn Pdu>>>;

fn erased<T>(bytes: &[u8]) -> Result<Decoded<Box<dyn Pdu>>>
where
    T: Layer,
{
    let decoded = T::decode(bytes)?;
    Ok(Decoded {
        pdu: Box::new(decoded.pdu),
        payload: decoded.payload,
        next: decoded.next,
        checksum_ok: decoded.checksum_ok,
    })
}

/// Optional capabilities
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Feature {
    /// Reject packets whose checksums don't match while decoding
    ChecksumValidation,
    /// TCP stream following
    StreamFollowing,
}

/// Decoders plus enabled protocols and features
#[derive(Clone, Debug)]
pub struct Registry {
    decoders: HashMap<PduType, DecodeFn>,
    disabled: HashSet<PduType>,
    features: HashSet<Feature>,
}

impl Default for Registry {
    /// Every builtin protocol, stream following enabled
    fn default() -> Self {
        let mut registry = Registry::empty();

        registry.register::<ether::Frame>();
        registry.register::<arp::Packet>();
        registry.register::<ipv4::Packet>();
        registry.register::<icmp::Message>();
        registry.register::<tcp::Segment>();
        registry.register::<udp::Packet>();
        registry.register::<raw::Payload>();
        registry.enable_feature(Feature::StreamFollowing);

        registry
    }
}

impl Registry {
    /// Registry without decoders or features
    pub fn empty() -> Self {
        Registry {
            decoders: HashMap::new(),
            disabled: HashSet::new(),
            features: HashSet::new(),
        }
    }

    /// Process wide registry with the default configuration
    pub fn builtin() -> &'static Registry {
        static BUILTIN: OnceLock<Registry> = OnceLock::new();

        BUILTIN.get_or_init(Registry::default)
    }

    /* Protocols */
    /// Registers the decoder of `T`, replacing the previous decoder for the same tag
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: Layer,
    {
        self.decoders.insert(T::PDU_TYPE, erased::<T>);
        self
    }

    /// Disables a protocol; its payloads will be decoded as raw bytes
    pub fn disable_protocol(&mut self, ty: PduType) -> &mut Self {
        self.disabled.insert(ty);
        self
    }

    /// Re-enables a protocol
    pub fn enable_protocol(&mut self, ty: PduType) -> &mut Self {
        self.disabled.remove(&ty);
        self
    }

    /// Checks that a protocol is registered and enabled
    pub fn check_protocol(&self, ty: PduType) -> Result<()> {
        if self.disabled.contains(&ty) || !self.decoders.contains_key(&ty) {
            Err(Error::ProtocolDisabled(ty))
        } else {
            Ok(())
        }
    }

    /* Features */
    /// Enables a feature
    pub fn enable_feature(&mut self, feature: Feature) -> &mut Self {
        self.features.insert(feature);
        self
    }

    /// Disables a feature
    pub fn disable_feature(&mut self, feature: Feature) -> &mut Self {
        self.features.remove(&feature);
        self
    }

    /// Checks if a feature is enabled
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Fails with `FeatureDisabled` if the feature is not enabled
    pub fn require(&self, feature: Feature) -> Result<()> {
        if self.has_feature(feature) {
            Ok(())
        } else {
            Err(Error::FeatureDisabled(feature))
        }
    }

    /* Decoding */
    /// Decodes `bytes` as a `ty` layer, and its payload recursively
    ///
    /// The outermost protocol must be registered and enabled. On failure no part of the chain is
    /// handed back.
    pub fn decode(&self, ty: PduType, bytes: &[u8]) -> Result<Box<dyn Pdu>> {
        self.check_protocol(ty)?;
        self.decode_layer(ty, bytes)
    }

    /// Decodes `bytes` as a `T` layer, and its payload recursively
    pub fn parse<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: Layer,
    {
        self.check_protocol(T::PDU_TYPE)?;

        let mut decoded = T::decode(bytes)?;
        self.verify(&decoded)?;
        if let Some(inner) = self.decode_payload(&decoded, bytes)? {
            decoded.pdu.replace_inner(Some(inner));
        }
        Ok(decoded.pdu)
    }

    fn decode_layer(&self, ty: PduType, bytes: &[u8]) -> Result<Box<dyn Pdu>> {
        let decode = self
            .decoders
            .get(&ty)
            .ok_or(Error::ProtocolDisabled(ty))?;

        let mut decoded = decode(bytes)?;
        self.verify(&decoded)?;
        if let Some(inner) = self.decode_payload(&decoded, bytes)? {
            decoded.pdu.attach_inner(inner);
        }
        Ok(decoded.pdu)
    }

    fn verify<T>(&self, decoded: &Decoded<T>) -> Result<()> {
        if !decoded.checksum_ok && self.has_feature(Feature::ChecksumValidation) {
            Err(Error::MalformedPacket)
        } else {
            Ok(())
        }
    }

    fn decode_payload<T>(&self, decoded: &Decoded<T>, bytes: &[u8]) -> Result<Option<Box<dyn Pdu>>> {
        let payload = bytes
            .get(decoded.payload.clone())
            .ok_or(Error::MalformedPacket)?;

        if payload.is_empty() {
            return Ok(None);
        }

        let ty = match decoded.next {
            Some(ty) if self.check_protocol(ty).is_ok() => ty,
            next => {
                trace!(?next, len = payload.len(), "payload kept as raw bytes");
                PduType::Raw
            }
        };

        if ty == PduType::Raw {
            // the raw layer is the end of the chain
            return Ok(Some(Box::new(raw::Payload::new(payload))));
        }

        self.decode_layer(ty, payload).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ether, ipv4,
        pdu::PduType,
        raw,
        registry::{Feature, Registry},
        udp, Error,
    };

    // Ethernet + IPv4 + UDP, payload = "Hello, world!\n"
    const FRAME: &[u8] = &[
        255, 255, 255, 255, 255, 255, // eth: destination
        1, 1, 1, 1, 1, 1, // eth: source
        8, 0, // eth: type
        69, 0, // ipv4: version & ihl, dscp & ecn
        0, 42, // ipv4: total length
        0, 0, 64, 0, // ipv4: identification, flags & fragment offset
        64, 17, // ipv4: ttl, protocol
        185, 80, // ipv4: checksum
        192, 168, 0, 33, // ipv4: source
        192, 168, 0, 1, // ipv4: destination
        0, 0, // udp: source
        5, 57, // udp: destination
        0, 22, // udp: length
        0, 0, // udp: checksum
        72, 101, 108, 108, 111, 44, 32, 119, 111, 114, 108, 100, 33, 10, // udp: payload
    ];

    #[test]
    fn decode() {
        let eth = Registry::builtin()
            .decode(PduType::EthernetII, FRAME)
            .unwrap();

        let udp = eth.find_pdu::<udp::Packet>().unwrap();
        assert_eq!(udp.get_dport(), 1337);
        assert_eq!(
            eth.rfind_pdu::<raw::Payload>().unwrap().data(),
            b"Hello, world!\n"
        );
    }

    #[test]
    fn disabled_protocol_is_raw() {
        let mut registry = Registry::default();
        registry.disable_protocol(PduType::Udp);

        let eth = registry.decode(PduType::EthernetII, FRAME).unwrap();
        assert!(eth.try_find_pdu::<udp::Packet>().is_none());
        assert_eq!(eth.find_pdu::<raw::Payload>().unwrap().data().len(), 22);

        assert_eq!(
            registry.parse::<udp::Packet>(&FRAME[34..]).unwrap_err(),
            Error::ProtocolDisabled(PduType::Udp)
        );

        registry.enable_protocol(PduType::Udp);
        assert!(registry.parse::<udp::Packet>(&FRAME[34..]).is_ok());
    }

    #[test]
    fn empty_registry() {
        let registry = Registry::empty();

        assert_eq!(
            registry.decode(PduType::EthernetII, FRAME).unwrap_err(),
            Error::ProtocolDisabled(PduType::EthernetII)
        );
    }

    #[test]
    fn only_outer_layers() {
        let mut registry = Registry::empty();
        registry.register::<ether::Frame>();

        let eth = registry.decode(PduType::EthernetII, FRAME).unwrap();
        assert!(eth.try_find_pdu::<ipv4::Packet>().is_none());
        assert_eq!(eth.find_pdu::<raw::Payload>().unwrap().data().len(), 42);
    }

    #[test]
    fn checksum_validation() {
        let mut bytes = FRAME.to_vec();
        bytes[24] = 0; // break the IPv4 header checksum

        // lenient by default
        assert!(Registry::builtin()
            .decode(PduType::EthernetII, &bytes)
            .is_ok());

        let mut registry = Registry::default();
        registry.enable_feature(Feature::ChecksumValidation);
        assert_eq!(
            registry.decode(PduType::EthernetII, &bytes).unwrap_err(),
            Error::MalformedPacket
        );
        assert!(registry.decode(PduType::EthernetII, FRAME).is_ok());
    }

    #[test]
    fn features() {
        let mut registry = Registry::default();
        assert!(registry.require(Feature::StreamFollowing).is_ok());

        registry.disable_feature(Feature::StreamFollowing);
        assert_eq!(
            registry.require(Feature::StreamFollowing),
            Err(Error::FeatureDisabled(Feature::StreamFollowing))
        );
    }

    #[test]
    fn inner_errors_propagate() {
        let mut bytes = FRAME.to_vec();
        bytes[38] = 0xff; // UDP length larger than the datagram

        assert_eq!(
            Registry::builtin()
                .decode(PduType::EthernetII, &bytes)
                .unwrap_err(),
            Error::MalformedPacket
        );
    }
}
