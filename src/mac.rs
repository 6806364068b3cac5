//! MAC: Medium Access Control

use core::fmt;

use crate::fmt::HexBytes;

/// MAC address
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Addr(pub [u8; 6]);

impl Addr {
    /// Broadcast address
    pub const BROADCAST: Self = Addr([0xff; 6]);

    /// All zeros; the unknown target of an ARP request
    pub const UNSPECIFIED: Self = Addr([0; 6]);

    /// Checks if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Checks if this is a multicast address
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 1 == 1
    }
}

impl AsRef<[u8]> for Addr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 6]> for Addr {
    fn from(bytes: [u8; 6]) -> Self {
        Addr(bytes)
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("mac::Addr").field(&HexBytes(&self.0)).finish()
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut is_first = true;
        for byte in &self.0 {
            if is_first {
                is_first = false;
            } else {
                f.write_str(":")?;
            }

            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Addr;

    #[test]
    fn fmt() {
        let addr = Addr([0x78, 0x44, 0x76, 0xd9, 0x6a, 0x7c]);

        assert_eq!(addr.to_string(), "78:44:76:d9:6a:7c");
        assert_eq!(
            format!("{:?}", addr),
            "mac::Addr([0x78, 0x44, 0x76, 0xd9, 0x6a, 0x7c])"
        );
        assert!(!addr.is_multicast());
        assert!(Addr::BROADCAST.is_broadcast());
    }
}
