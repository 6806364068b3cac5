//! PPP: Point-to-Point Protocol encapsulation
//!
//! The Address (0xff) and Control (0x03) bytes are optional, as is the second byte of a
//! compressed Protocol field (RFC 1661, section 6.5).
//!
//! # References
//!
//! - [RFC 1661: The Point-to-Point Protocol (PPP)][rfc]
//!
//! [rfc]: https://tools.ietf.org/html/rfc1661

use core::fmt;

use crate::{
    buf::Buffer,
    dissect::{Discriminant, Dissect},
    error::{Error, Result},
    ether,
    packet::{Context, Layer},
};

const ADDRESS_CONTROL: [u8; 2] = [0xff, 0x03];

/// PPP encapsulation header
pub struct Packet {
    header: Buffer,
}

impl Packet {
    /* Constructors */
    /// Creates a new header with the Address and Control bytes and an uncompressed Protocol field
    ///
    /// The protocol is overwritten on finalization if the payload is a known network layer
    pub fn new(protocol: Protocol) -> Self {
        let mut header = ADDRESS_CONTROL.to_vec();
        header.extend_from_slice(&u16::from(protocol).to_be_bytes());

        Packet {
            header: Buffer::from_vec(header),
        }
    }

    /* Getters */
    /// Checks if the header starts with the Address and Control bytes
    pub fn has_address_control(&self) -> bool {
        self.header.with(|h| h.starts_with(&ADDRESS_CONTROL))
    }

    /// Checks if the Protocol field is compressed to a single byte
    pub fn is_compressed(&self) -> bool {
        self.header.len() - self.protocol_at() == 1
    }

    /// Returns the Protocol field
    pub fn get_protocol(&self) -> Protocol {
        let at = self.protocol_at();
        self.header
            .with(|h| match &h[at..] {
                [byte] => u16::from(*byte),
                [high, low] => u16::from_be_bytes([*high, *low]),
                // `parse` and `new` guarantee 1 or 2 bytes
                _ => 0,
            })
            .into()
    }

    /* Setters */
    /// Sets the Protocol field
    ///
    /// A compressed field is expanded to 2 bytes if `protocol` doesn't fit in one
    pub fn set_protocol(&mut self, protocol: Protocol) {
        let value = u16::from(protocol);
        let at = self.protocol_at();

        if self.is_compressed() && value <= 0xff {
            self.header.with_mut(|h| h[at] = value as u8);
        } else if self.is_compressed() {
            // new view: the expanded field must not spill over the payload
            let mut header = self.header.with(|h| h[..at].to_vec());
            header.extend_from_slice(&value.to_be_bytes());
            self.header = Buffer::from_vec(header);
        } else {
            self.header
                .with_mut(|h| h[at..at + 2].copy_from_slice(&value.to_be_bytes()));
        }
    }

    /* Private */
    fn protocol_at(&self) -> usize {
        if self.has_address_control() {
            ADDRESS_CONTROL.len()
        } else {
            0
        }
    }
}

impl Dissect for Packet {
    fn parse(bytes: Buffer) -> Result<Self> {
        let at = if bytes.with(|b| b.starts_with(&ADDRESS_CONTROL)) {
            ADDRESS_CONTROL.len()
        } else {
            0
        };

        // an odd first byte ends the field
        let len = match bytes.read_u8(at) {
            Ok(byte) if byte & 1 == 1 => 1,
            Ok(_) => 2,
            Err(_) => return Err(Error::malformed("PPP", "missing protocol field")),
        };

        let header = bytes
            .slice(0, at + len)
            .map_err(|_| Error::malformed("PPP", "truncated protocol field"))?;

        Ok(Packet { header })
    }
}

impl Layer for Packet {
    fn name(&self) -> &'static str {
        "PPP"
    }

    fn header(&self) -> &Buffer {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Buffer {
        &mut self.header
    }

    fn header_len(&self) -> usize {
        let at = self.protocol_at();
        if self.is_compressed() {
            at + 1
        } else {
            at + 2
        }
    }

    fn next_layer(&self) -> Option<Discriminant> {
        Some(Discriminant::PppProtocol(self.get_protocol().into()))
    }

    fn ether_type(&self) -> Option<u16> {
        Some(ether::Type::Ppp.into())
    }

    fn finalize(&mut self, cx: &Context<'_>) -> Result<()> {
        let protocol = cx
            .payload_layer()
            .and_then(|l| l.ether_type())
            .and_then(Protocol::from_ether_type);

        if let Some(protocol) = protocol {
            self.set_protocol(protocol);
        }

        Ok(())
    }
}

/// NOTE excludes the payload
impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ppp::Packet")
            .field("address_control", &self.has_address_control())
            .field("protocol", &self.get_protocol())
            .finish()
    }
}

full_range!(
    u16,
    /// PPP DLL protocol number
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum Protocol {
        /// Internet Protocol version 4
        Ipv4 = 0x0021,
        /// Internet Protocol version 6
        Ipv6 = 0x0057,
        /// Link Control Protocol
        Lcp = 0xc021,
        /// IP Control Protocol
        Ipcp = 0x8021,
    }
);

impl Protocol {
    /// Maps the EtherType of a network layer to its PPP protocol number
    pub fn from_ether_type(type_: u16) -> Option<Self> {
        match ether::Type::from(type_) {
            ether::Type::Ipv4 => Some(Protocol::Ipv4),
            ether::Type::Ipv6 => Some(Protocol::Ipv6),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::{
        buf::Buffer,
        dissect::{Discriminant, Dissect},
        error::Error,
        ipv4,
        packet::{Layer, Packet},
        ppp::{self, Protocol},
    };

    #[test]
    fn parse() {
        let full = ppp::Packet::parse(Buffer::from_bytes([0xff, 0x03, 0x00, 0x21, 0x45])).unwrap();
        assert!(full.has_address_control());
        assert!(!full.is_compressed());
        assert_eq!(full.get_protocol(), Protocol::Ipv4);
        assert_eq!(full.header().len(), 4);
        assert_eq!(full.next_layer(), Some(Discriminant::PppProtocol(0x21)));

        let bare = ppp::Packet::parse(Buffer::from_bytes([0x00, 0x57, 0x60])).unwrap();
        assert!(!bare.has_address_control());
        assert_eq!(bare.get_protocol(), Protocol::Ipv6);
        assert_eq!(bare.header().len(), 2);

        let compressed = ppp::Packet::parse(Buffer::from_bytes([0x21, 0x45])).unwrap();
        assert!(compressed.is_compressed());
        assert_eq!(compressed.get_protocol(), Protocol::Ipv4);
        assert_eq!(compressed.header().len(), 1);
    }

    #[test]
    fn too_short() {
        let cases: &[&[u8]] = &[&[], &[0xff, 0x03], &[0xff, 0x03, 0x00], &[0x00]];
        for bytes in cases {
            match ppp::Packet::parse(Buffer::from_bytes(bytes)) {
                Err(Error::Malformed { layer: "PPP", .. }) => {}
                other => panic!("unexpected {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn finalize_maps_ether_type() {
        let mut packet = Packet::new(ppp::Packet::new(Protocol::Lcp));
        packet.push(ipv4::Packet::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST));

        let bytes = packet.bytes().unwrap();
        assert_eq!(&bytes[..4], &[0xff, 0x03, 0x00, 0x21]);
        assert_eq!(bytes.len(), 24);
    }

    #[test]
    fn expand_compressed() {
        let mut ppp = ppp::Packet::parse(Buffer::from_bytes([0x21, 0x45])).unwrap();
        ppp.set_protocol(Protocol::Ipv6);
        assert_eq!(ppp.header().byte_copy(), [0x57]);

        ppp.set_protocol(Protocol::Lcp);
        assert!(!ppp.is_compressed());
        assert_eq!(ppp.header().byte_copy(), [0xc0, 0x21]);
    }
}
