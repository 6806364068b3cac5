//! IPv6: Internet Protocol v6
//!
//! Only the fixed header is understood; extension headers are left in the payload.
//!
//! # References
//!
//! - [RFC 8200 Internet Protocol, Version 6 (IPv6) Specification][rfc]
//!
//! [rfc]: https://tools.ietf.org/html/rfc8200

use core::{
    fmt,
    ops::{Range, RangeTo},
};
use std::net::Ipv6Addr;

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u16, u32, usize};

pub use crate::ipv4::Protocol as NextHeader;
use crate::{
    buf::Buffer,
    checksum,
    dissect::{Discriminant, Dissect},
    error::{Error, Result},
    ether,
    packet::{Context, Layer},
};

/* Packet structure */
const V: usize = 0;
mod v {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 4;
    pub const SIZE: usize = 4;
}

const TC: RangeTo<usize> = ..2;
mod tc {
    pub const MASK: u16 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 4;
    pub const SIZE: usize = 8;
}

const FLH: usize = 1;
const FLL: Range<usize> = 2..4;

const LENGTH: Range<usize> = 4..6;
const NEXT_HEADER: usize = 6;
const HOP_LIMIT: usize = 7;
const SOURCE: Range<usize> = 8..24;
const DESTINATION: Range<usize> = 24..40;

/// Fixed header size, in bytes
pub const HEADER_SIZE: usize = DESTINATION.end;

/// IPv6 packet
pub struct Packet {
    header: Buffer,
}

impl Packet {
    /* Constructors */
    /// Creates a new IPv6 packet
    ///
    /// Most of the header will be filled with sensible defaults:
    ///
    /// - Version = 6
    /// - Traffic class = 0
    /// - Flow label = 0
    /// - Hop limit = 255
    ///
    /// Payload length and Next header are computed when the packet is finalized
    pub fn new(source: Ipv6Addr, destination: Ipv6Addr) -> Self {
        let mut p = Packet {
            header: Buffer::new(HEADER_SIZE),
        };

        p.header.with_mut(|h| set!(h[V], v, 6));
        p.set_traffic_class(0);
        p.set_flow_label(0);
        p.set_hop_limit(255);
        p.set_source(source);
        p.set_destination(destination);

        p
    }

    /* Accessors */
    /// Reads the 'Version' field
    pub fn get_version(&self) -> u8 {
        self.header.with(|h| get!(h[V], v))
    }

    /// Reads the 'Traffic Class' field
    pub fn get_traffic_class(&self) -> u8 {
        self.header
            .with(|h| get!(NE::read_u16(&h[TC]), tc) as u8)
    }

    /// Reads the 'Flow Label' field (20 bits)
    pub fn get_flow_label(&self) -> u32 {
        let mask = (1 << 4) - 1;

        self.header
            .with(|h| (u32(h[FLH]) & mask) << 16 | u32(NE::read_u16(&h[FLL])))
    }

    /// Reads the 'Payload length' field
    pub fn get_length(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[LENGTH]))
    }

    /// Reads the 'Next Header' field
    pub fn get_next_header(&self) -> NextHeader {
        self.header.with(|h| h[NEXT_HEADER]).into()
    }

    /// Reads the 'Hop Limit' field
    pub fn get_hop_limit(&self) -> u8 {
        self.header.with(|h| h[HOP_LIMIT])
    }

    /// Reads the 'Source Address' field
    pub fn get_source(&self) -> Ipv6Addr {
        self.addr_at(SOURCE)
    }

    /// Reads the 'Destination Address' field
    pub fn get_destination(&self) -> Ipv6Addr {
        self.addr_at(DESTINATION)
    }

    /// Sets the 'Traffic class' field
    pub fn set_traffic_class(&mut self, tc: u8) {
        let mask = (1 << 4) - 1;

        self.header.with_mut(|h| {
            // low nibble
            let tcl = &mut h[1];
            *tcl &= !(mask << 4);
            *tcl |= (tc & mask) << 4;

            // high nibble
            let tch = &mut h[0];
            *tch &= !mask;
            *tch |= tc >> 4;
        })
    }

    /// Sets the 'Flow label' field
    pub fn set_flow_label(&mut self, fl: u32) {
        let mask = (1 << 4) - 1;

        self.header.with_mut(|h| {
            // low half-word
            NE::write_u16(&mut h[FLL], fl as u16);

            // high nibble
            let flh = &mut h[FLH];
            *flh &= !mask;
            *flh |= (fl >> 16) as u8 & mask;
        })
    }

    /// Sets the 'Next Header' field
    ///
    /// NOTE overwritten on finalization when the payload is a known layer
    pub fn set_next_header(&mut self, nh: NextHeader) {
        self.header.with_mut(|h| h[NEXT_HEADER] = nh.into())
    }

    /// Sets the 'Hop limit' field
    pub fn set_hop_limit(&mut self, hl: u8) {
        self.header.with_mut(|h| h[HOP_LIMIT] = hl)
    }

    /// Sets the 'Source address' field
    pub fn set_source(&mut self, addr: Ipv6Addr) {
        self.header
            .with_mut(|h| h[SOURCE].copy_from_slice(&addr.octets()))
    }

    /// Sets the 'Destination address' field
    pub fn set_destination(&mut self, addr: Ipv6Addr) {
        self.header
            .with_mut(|h| h[DESTINATION].copy_from_slice(&addr.octets()))
    }

    /* Private */
    fn addr_at(&self, range: Range<usize>) -> Ipv6Addr {
        let mut octets = [0; 16];
        self.header.with(|h| octets.copy_from_slice(&h[range]));
        Ipv6Addr::from(octets)
    }
}

impl Dissect for Packet {
    fn parse(bytes: Buffer) -> Result<Self> {
        let header = bytes.slice(0, HEADER_SIZE)?;

        if header.with(|h| get!(h[V], v)) != 6 {
            return Err(Error::malformed("IPv6", "version is not 6"));
        }

        Ok(Packet { header })
    }
}

impl Layer for Packet {
    fn name(&self) -> &'static str {
        "IPv6"
    }

    fn header(&self) -> &Buffer {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Buffer {
        &mut self.header
    }

    fn header_len(&self) -> usize {
        HEADER_SIZE
    }

    fn payload_len(&self, available: usize) -> usize {
        usize(self.get_length()).min(available)
    }

    fn next_layer(&self) -> Option<Discriminant> {
        Some(Discriminant::IpProtocol(self.get_next_header().into()))
    }

    fn ether_type(&self) -> Option<u16> {
        Some(ether::Type::Ipv6.into())
    }

    fn pseudo_header(&self, protocol: u8, len: usize) -> Option<Vec<u8>> {
        let len = u32(len).ok()?;
        Some(
            checksum::ipv6_pseudo_header(
                self.get_source(),
                self.get_destination(),
                protocol,
                len,
            )
            .to_vec(),
        )
    }

    fn finalize(&mut self, cx: &Context<'_>) -> Result<()> {
        let len = u16(cx.payload().len())?;
        self.header
            .with_mut(|h| NE::write_u16(&mut h[LENGTH], len));

        if let Some(nh) = cx.payload_layer().and_then(|l| l.ip_protocol()) {
            self.set_next_header(nh.into());
        }

        Ok(())
    }
}

/// NOTE excludes the payload
impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ipv6::Packet")
            .field("version", &self.get_version())
            .field("traffic_class", &self.get_traffic_class())
            .field("flow_label", &self.get_flow_label())
            .field("length", &self.get_length())
            .field("next_header", &self.get_next_header())
            .field("hop_limit", &self.get_hop_limit())
            .field("source", &self.get_source())
            .field("destination", &self.get_destination())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use crate::{
        buf::Buffer,
        dissect::Dissect,
        ipv6::{self, NextHeader},
        packet::Packet,
    };

    const SOURCE: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0x2219, 0x0300, 0xfe01, 0);
    const DESTINATION: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

    #[test]
    fn fields() {
        let mut ip = ipv6::Packet::new(SOURCE, DESTINATION);
        ip.set_traffic_class(0xab);
        ip.set_flow_label(0xf_ffff);

        assert_eq!(ip.get_version(), 6);
        assert_eq!(ip.get_traffic_class(), 0xab);
        assert_eq!(ip.get_flow_label(), 0xf_ffff);

        ip.set_flow_label(0x1_2345);
        assert_eq!(ip.get_flow_label(), 0x1_2345);
        assert_eq!(ip.get_traffic_class(), 0xab);
        assert_eq!(ip.get_version(), 6);
    }

    #[test]
    fn construct() {
        let mut packet = Packet::new(ipv6::Packet::new(SOURCE, DESTINATION));
        packet.set_payload(packet.root(), vec![0u8; 8]).unwrap();
        packet
            .layer_mut::<ipv6::Packet>(packet.root())
            .unwrap()
            .set_next_header(NextHeader::Udp);

        let bytes = packet.bytes().unwrap();
        assert_eq!(bytes.len(), 48);
        assert_eq!(
            &bytes[..8],
            &[
                0x60, 0x00, 0x00, 0x00, // version, traffic class & flow label
                0x00, 0x08, // payload length
                0x11, // next header
                0xff, // hop limit
            ]
        );

        let ip = ipv6::Packet::parse(Buffer::from_vec(bytes)).unwrap();
        assert_eq!(ip.get_source(), SOURCE);
        assert_eq!(ip.get_destination(), DESTINATION);
    }

    #[test]
    fn not_v6() {
        let mut bytes = [0; 40];
        bytes[0] = 0x45;
        assert!(ipv6::Packet::parse(Buffer::from_bytes(&bytes[..])).is_err());
    }
}
