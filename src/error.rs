//! Error types

use thiserror::Error;

use crate::{pdu::PduType, registry::Feature};

/// Result type alias for PDU, option and stream operations
pub type Result<T> = core::result::Result<T, Error>;

/// Main error type
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// The bytes violate the structure declared (or implied) by a header
    #[error("Malformed packet")]
    MalformedPacket,

    /// An option is truncated or its payload has an unexpected size
    #[error("Malformed option")]
    MalformedOption,

    /// A name-carrying field doesn't hold a valid domain name
    #[error("Invalid domain name")]
    InvalidDomainName,

    /// The option payload doesn't fit in the option length field
    #[error("Option payload too large")]
    OptionPayloadTooLarge,

    /// No option of the requested type
    #[error("Option not found")]
    OptionNotFound,

    /// No layer of the requested type in the chain
    #[error("PDU not found")]
    PduNotFound,

    /// No stream with the requested identity
    #[error("Stream not found")]
    StreamNotFound,

    /// The field doesn't exist for this variant of the header
    #[error("Field not present")]
    FieldNotPresent,

    /// Checked downcast to the wrong layer type
    #[error("Bad PDU cast")]
    BadCast,

    /// The chain can't be turned into valid bytes
    #[error("Serialization error")]
    Serialization,

    /// The layer can be parsed but not serialized
    #[error("PDU not serializable")]
    PduNotSerializable,

    /// A required callback hasn't been installed
    #[error("Callback not set")]
    CallbackNotSet,

    /// The protocol has been disabled in the registry
    #[error("Protocol disabled: {0:?}")]
    ProtocolDisabled(PduType),

    /// The feature has been disabled in the registry
    #[error("Feature disabled: {0:?}")]
    FeatureDisabled(Feature),
}

/// Broad classification of an `Error`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Input bytes don't follow the declared structure
    Malformed,
    /// A field can't represent the requested value
    Capacity,
    /// The requested element doesn't exist
    Lookup,
    /// Checked downcast mismatch
    TypeSafety,
    /// The chain can't be serialized
    Serialization,
    /// Missing wiring or capability
    Configuration,
}

impl Error {
    /// Returns the class this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedPacket | Error::MalformedOption | Error::InvalidDomainName => {
                ErrorKind::Malformed
            }
            Error::OptionPayloadTooLarge => ErrorKind::Capacity,
            Error::OptionNotFound
            | Error::PduNotFound
            | Error::StreamNotFound
            | Error::FieldNotPresent => ErrorKind::Lookup,
            Error::BadCast => ErrorKind::TypeSafety,
            Error::Serialization | Error::PduNotSerializable => ErrorKind::Serialization,
            Error::CallbackNotSet | Error::ProtocolDisabled(_) | Error::FeatureDisabled(_) => {
                ErrorKind::Configuration
            }
        }
    }
}
