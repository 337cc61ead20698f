//! Formatting helpers

use core::fmt;

/// Formats a 16-bit field (checksums, ether types) as `0x1234`
pub struct Hex(pub u16);

impl fmt::Debug for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Formats a byte string as `[0x01, 0x02]`, truncated after `LIMIT` bytes
pub struct Bytes<'a>(pub &'a [u8]);

impl Bytes<'_> {
    const LIMIT: usize = 16;
}

impl fmt::Debug for Bytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use core::fmt::Write;

        f.write_char('[')?;
        for (i, byte) in self.0.iter().take(Self::LIMIT).enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }

            write!(f, "0x{:02x}", byte)?;
        }
        if self.0.len() > Self::LIMIT {
            write!(f, ", .. ({} bytes)", self.0.len())?;
        }
        f.write_char(']')
    }
}

#[cfg(test)]
mod tests {
    use super::{Bytes, Hex};

    #[test]
    fn hex() {
        assert_eq!(format!("{:?}", Hex(0x0800)), "0x0800");
    }

    #[test]
    fn bytes() {
        assert_eq!(format!("{:?}", Bytes(&[1, 0xff])), "[0x01, 0xff]");
        assert_eq!(
            format!("{:?}", Bytes(&[0; 17])),
            "[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, \
             0x00, 0x00, .. (17 bytes)]"
        );
    }
}
