//! Formatting helpers

use core::fmt;

/// Renders a word as `0x0000`
pub struct Hex(pub u16);

impl fmt::Debug for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Renders a byte string as `[0x01, 0x02, ..]`
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Debug for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use core::fmt::Write;

        let mut is_first = true;

        f.write_char('[')?;
        for byte in self.0 {
            if is_first {
                is_first = false;
            } else {
                f.write_str(", ")?;
            }

            write!(f, "0x{:02x}", byte)?;
        }
        f.write_char(']')
    }
}
