//! TLV options
//!
//! Kind / length / value records as used by IPv4 and TCP. The length byte counts the two header
//! bytes, so the payload of a single option is at most `u8::MAX - 2` bytes. Kinds 0 (End of Option
//! List) and 1 (No-Operation) are a single byte on the wire and carry no payload.
//!
//! Options are kept in insertion order, which is also wire order, and the same kind may appear
//! more than once.

use core::fmt;

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::usize;

use crate::{fmt::Bytes, Error, Result};

/// Largest payload a single option can carry
pub const MAX_DATA_SIZE: usize = u8::MAX as usize - 2;

const EOL: u8 = 0;
const NOP: u8 = 1;

/// A single option
#[derive(Clone, Eq, PartialEq)]
pub struct PduOption<K> {
    kind: K,
    data: Vec<u8>,
}

impl<K> PduOption<K>
where
    K: Copy + Into<u8>,
{
    /// Creates a new option
    pub fn new(kind: K, data: &[u8]) -> Self {
        PduOption {
            kind,
            data: data.to_owned(),
        }
    }

    /// Returns the kind of this option
    pub fn kind(&self) -> K {
        self.kind
    }

    /// View into the payload
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the payload in bytes
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Interprets the payload as a `T`
    pub fn to<T>(&self) -> Result<T>
    where
        T: FromOption,
    {
        T::from_option(&self.data)
    }

    fn is_single_byte(&self) -> bool {
        is_single_byte(self.kind.into())
    }

    /// Size of this option on the wire
    fn size(&self) -> usize {
        if self.is_single_byte() {
            1
        } else {
            2 + self.data.len()
        }
    }
}

impl<K> fmt::Debug for PduOption<K>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PduOption")
            .field("kind", &self.kind)
            .field("data", &Bytes(&self.data))
            .finish()
    }
}

fn is_single_byte(kind: u8) -> bool {
    kind == EOL || kind == NOP
}

/// Option payloads that can be interpreted as a structured value
pub trait FromOption: Sized {
    /// Interprets `data` as `Self`; fails with `MalformedOption` on size mismatch
    fn from_option(data: &[u8]) -> Result<Self>;
}

impl FromOption for u8 {
    fn from_option(data: &[u8]) -> Result<Self> {
        match data {
            [byte] => Ok(*byte),
            _ => Err(Error::MalformedOption),
        }
    }
}

impl FromOption for u16 {
    fn from_option(data: &[u8]) -> Result<Self> {
        if data.len() != 2 {
            return Err(Error::MalformedOption);
        }

        Ok(NE::read_u16(data))
    }
}

impl FromOption for u32 {
    fn from_option(data: &[u8]) -> Result<Self> {
        if data.len() != 4 {
            return Err(Error::MalformedOption);
        }

        Ok(NE::read_u32(data))
    }
}

impl FromOption for (u32, u32) {
    fn from_option(data: &[u8]) -> Result<Self> {
        if data.len() != 8 {
            return Err(Error::MalformedOption);
        }

        Ok((NE::read_u32(&data[..4]), NE::read_u32(&data[4..])))
    }
}

impl FromOption for Vec<u32> {
    fn from_option(data: &[u8]) -> Result<Self> {
        if data.len() % 4 != 0 {
            return Err(Error::MalformedOption);
        }

        Ok(data.chunks_exact(4).map(NE::read_u32).collect())
    }
}

/// Ordered list of options
#[derive(Clone, Eq, PartialEq)]
pub struct Options<K> {
    list: Vec<PduOption<K>>,
}

impl<K> Default for Options<K> {
    fn default() -> Self {
        Options { list: Vec::new() }
    }
}

impl<K> Options<K>
where
    K: Copy + PartialEq + From<u8> + Into<u8>,
{
    /// Creates an empty option list
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an option
    ///
    /// Fails with `OptionPayloadTooLarge`, leaving the list untouched, if the payload doesn't fit
    /// in the length field or if a single-byte kind is given a payload.
    pub fn add(&mut self, kind: K, data: &[u8]) -> Result<()> {
        if data.len() > MAX_DATA_SIZE || (is_single_byte(kind.into()) && !data.is_empty()) {
            return Err(Error::OptionPayloadTooLarge);
        }

        self.list.push(PduOption::new(kind, data));
        Ok(())
    }

    /// Returns the first option of the given kind, if any
    pub fn try_search(&self, kind: K) -> Option<&PduOption<K>> {
        self.list.iter().find(|opt| opt.kind == kind)
    }

    /// Returns the first option of the given kind
    pub fn search(&self, kind: K) -> Result<&PduOption<K>> {
        self.try_search(kind).ok_or(Error::OptionNotFound)
    }

    /// Removes the first option of the given kind; returns `false` if there was none
    pub fn remove(&mut self, kind: K) -> bool {
        match self.list.iter().position(|opt| opt.kind == kind) {
            Some(pos) => {
                self.list.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Replaces the payload of the first option of the given kind, or appends a new option
    pub(crate) fn replace(&mut self, kind: K, data: &[u8]) -> Result<()> {
        if data.len() > MAX_DATA_SIZE {
            return Err(Error::OptionPayloadTooLarge);
        }

        match self.list.iter_mut().find(|opt| opt.kind == kind) {
            Some(opt) => {
                opt.data = data.to_owned();
                Ok(())
            }
            None => self.add(kind, data),
        }
    }

    /// Iterates over the options in wire order
    pub fn iter(&self) -> impl Iterator<Item = &PduOption<K>> {
        self.list.iter()
    }

    /// Number of options
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Checks if the list is empty
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Size of the options on the wire, without padding
    pub fn size(&self) -> usize {
        self.list.iter().map(PduOption::size).sum()
    }

    /// Size of the options on the wire, padded to a multiple of 32 bits
    pub fn padded_size(&self) -> usize {
        (self.size() + 3) & !3
    }

    /// Writes the options into `buffer`, zero filling whatever is left
    ///
    /// `buffer` must be at least `size()` bytes long
    pub(crate) fn write(&self, buffer: &mut [u8]) {
        let mut cursor = 0;
        for opt in &self.list {
            buffer[cursor] = opt.kind.into();
            if !opt.is_single_byte() {
                buffer[cursor + 1] = (opt.data.len() + 2) as u8;
                buffer[cursor + 2..cursor + 2 + opt.data.len()].copy_from_slice(&opt.data);
            }
            cursor += opt.size();
        }

        for byte in &mut buffer[cursor..] {
            *byte = 0;
        }
    }

    /// Parses an options region
    ///
    /// Parsing stops at the first End of Option List; the padding after it is not kept.
    pub(crate) fn parse(mut bytes: &[u8]) -> Result<Self> {
        let mut options = Options::new();

        while let Some(&kind) = bytes.first() {
            if kind == EOL {
                break;
            }

            if kind == NOP {
                options.list.push(PduOption::new(K::from(kind), &[]));
                bytes = &bytes[1..];
                continue;
            }

            let len = usize(*bytes.get(1).ok_or(Error::MalformedOption)?);
            if len < 2 || len > bytes.len() {
                return Err(Error::MalformedOption);
            }

            options
                .list
                .push(PduOption::new(K::from(kind), &bytes[2..len]));
            bytes = &bytes[len..];
        }

        Ok(options)
    }
}

impl<K> fmt::Debug for Options<K>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.list).finish()
    }
}
