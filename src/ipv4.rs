//! IPv4: Internet Protocol v4
//!
//! # References
//!
//! - [RFC 791: Internet protocol][rfc]
//!
//! [rfc]: https://tools.ietf.org/html/rfc791

use core::fmt;
use core::ops::Range;
use std::net::Ipv4Addr;

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u16, usize};

use crate::{
    buf::Buffer,
    checksum,
    dissect::{Discriminant, Dissect},
    error::{Error, Result},
    ether,
    fmt::Hex,
    packet::{Context, Layer},
    traits::UxxExt,
};

/* Packet structure */
const VERSION_IHL: usize = 0;
mod ihl {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 4;
}
mod version {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::ihl::OFFSET + super::ihl::SIZE;
    pub const SIZE: usize = 4;
}

const DSCP_ECN: usize = 1;
mod ecn {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 2;
}
mod dscp {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::ecn::OFFSET + super::ecn::SIZE;
    pub const SIZE: usize = 6;
}

const TOTAL_LENGTH: Range<usize> = 2..4;
const IDENTIFICATION: Range<usize> = 4..6;

const FLAGS: usize = 6;
mod mf {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 5;
    pub const SIZE: usize = 1;
}
mod df {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::mf::OFFSET + super::mf::SIZE;
    pub const SIZE: usize = 1;
}
mod reserved {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::df::OFFSET + super::df::SIZE;
    pub const SIZE: usize = 1;
}

const FRAGMENT_OFFSET: Range<usize> = 6..8;
mod fragment_offset {
    pub const MASK: u16 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 13;
}

const TTL: usize = 8;
const PROTOCOL: usize = 9;
const CHECKSUM: Range<usize> = 10..12;
const SOURCE: Range<usize> = 12..16;
const DESTINATION: Range<usize> = 16..20;

/// Minimum size of the IPv4 header
pub const MIN_HEADER_SIZE: usize = DESTINATION.end;

/// IPv4 packet
///
/// The header includes the options, if any
pub struct Packet {
    header: Buffer,
}

impl Packet {
    /* Constructors */
    /// Creates a new IPv4 packet
    ///
    /// This constructor populates the following header fields:
    ///
    /// - Version = 4
    /// - IHL = 5
    /// - DSCP = 0
    /// - ECN = 0
    /// - Identification = 0
    /// - DF = true
    /// - MF = false
    /// - Fragment Offset = 0
    /// - TTL = 64
    ///
    /// Total Length, Protocol and Checksum are computed when the packet is finalized
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr) -> Self {
        let mut packet = Packet {
            header: Buffer::new(MIN_HEADER_SIZE),
        };

        packet.set_version(4);
        packet.header.with_mut(|h| set!(h[VERSION_IHL], ihl, 5));
        packet.set_dscp(0);
        packet.set_ecn(0);
        packet.set_identification(0);
        packet.clear_reserved_flag();
        packet.set_df(true);
        packet.set_mf(false);
        packet.set_fragment_offset(0);
        packet.set_ttl(64); // cf. RFC 1700
        packet.set_source(source);
        packet.set_destination(destination);

        packet
    }

    /* Getters */
    /// Returns the version field of the header
    pub fn get_version(&self) -> u8 {
        self.header.with(|h| get!(h[VERSION_IHL], version))
    }

    /// Returns the IHL (Internet Header Length) field of the header
    pub fn get_ihl(&self) -> u8 {
        self.header.with(|h| get!(h[VERSION_IHL], ihl))
    }

    /// Returns the DSCP (Differentiated Services Code Point) field of the header
    pub fn get_dscp(&self) -> u8 {
        self.header.with(|h| get!(h[DSCP_ECN], dscp))
    }

    /// Returns the ECN (Explicit Congestion Notification) field of the header
    pub fn get_ecn(&self) -> u8 {
        self.header.with(|h| get!(h[DSCP_ECN], ecn))
    }

    /// Returns the total length field of the header
    pub fn get_total_length(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[TOTAL_LENGTH]))
    }

    /// Returns the identification field of the header
    pub fn get_identification(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[IDENTIFICATION]))
    }

    /// Returns the DF (Don't Fragment) field of the header
    pub fn get_df(&self) -> bool {
        self.header.with(|h| get!(h[FLAGS], df) == 1)
    }

    /// Returns the MF (More Fragments) field of the header
    pub fn get_mf(&self) -> bool {
        self.header.with(|h| get!(h[FLAGS], mf) == 1)
    }

    /// Returns the Fragment Offset field of the header
    pub fn get_fragment_offset(&self) -> u16 {
        self.header
            .with(|h| get!(NE::read_u16(&h[FRAGMENT_OFFSET]), fragment_offset))
    }

    /// Returns the TTL (Time To Live) field of the header
    pub fn get_ttl(&self) -> u8 {
        self.header.with(|h| h[TTL])
    }

    /// Returns the protocol field of the header
    pub fn get_protocol(&self) -> Protocol {
        self.header.with(|h| h[PROTOCOL]).into()
    }

    /// Returns the header checksum field
    pub fn get_checksum(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[CHECKSUM]))
    }

    /// Returns the Source (IP address) field of the header
    pub fn get_source(&self) -> Ipv4Addr {
        self.addr_at(SOURCE)
    }

    /// Returns the Destination (IP address) field of the header
    pub fn get_destination(&self) -> Ipv4Addr {
        self.addr_at(DESTINATION)
    }

    /// Returns the options; empty unless IHL > 5
    pub fn get_options(&self) -> Vec<u8> {
        self.header.with(|h| h[MIN_HEADER_SIZE..].to_vec())
    }

    /* Setters */
    /// Sets the version field of the header
    pub fn set_version(&mut self, version: u8) {
        self.header
            .with_mut(|h| set_!(&mut h[VERSION_IHL], version, version))
    }

    /// Sets the DSCP (Differentiated Services Code Point) field of the header
    pub fn set_dscp(&mut self, dscp: u8) {
        self.header.with_mut(|h| set!(h[DSCP_ECN], dscp, dscp))
    }

    /// Sets the ECN (Explicit Congestion Notification) field of the header
    pub fn set_ecn(&mut self, ecn: u8) {
        self.header.with_mut(|h| set!(h[DSCP_ECN], ecn, ecn))
    }

    /// Sets the identification field of the header
    pub fn set_identification(&mut self, id: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[IDENTIFICATION], id))
    }

    /// Sets the DF (Don't Fragment) field of the header
    pub fn set_df(&mut self, df: bool) {
        self.header
            .with_mut(|h| set!(h[FLAGS], df, if df { 1 } else { 0 }))
    }

    /// Sets the MF (More Fragments) field of the header
    pub fn set_mf(&mut self, mf: bool) {
        self.header
            .with_mut(|h| set!(h[FLAGS], mf, if mf { 1 } else { 0 }))
    }

    /// Sets the Fragment Offset field of the header
    pub fn set_fragment_offset(&mut self, fo: u16) {
        let offset = self::fragment_offset::OFFSET;
        let mask = self::fragment_offset::MASK;
        let start = FRAGMENT_OFFSET.start;

        self.header.with_mut(|h| {
            // low byte
            h[start + 1] = fo.low();

            // high byte
            let byte = &mut h[start];
            *byte &= !(mask << offset).high();
            *byte |= ((fo & mask) << offset).high();
        });
    }

    /// Sets the TTL (Time To Live) field of the header
    pub fn set_ttl(&mut self, ttl: u8) {
        self.header.with_mut(|h| h[TTL] = ttl)
    }

    /// Sets the Protocol field of the header
    ///
    /// NOTE overwritten on finalization when the payload is a known layer
    pub fn set_protocol(&mut self, proto: Protocol) {
        self.header.with_mut(|h| h[PROTOCOL] = proto.into())
    }

    /// Sets the Source (IP address) field of the header
    pub fn set_source(&mut self, addr: Ipv4Addr) {
        self.header
            .with_mut(|h| h[SOURCE].copy_from_slice(&addr.octets()))
    }

    /// Sets the Destination (IP address) field of the header
    pub fn set_destination(&mut self, addr: Ipv4Addr) {
        self.header
            .with_mut(|h| h[DESTINATION].copy_from_slice(&addr.octets()))
    }

    /// Replaces the options and updates IHL; `options` is zero padded to a multiple of 4 bytes
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the options don't fit in 40 bytes
    pub fn set_options(&mut self, options: &[u8]) -> Result<()> {
        let padded = (options.len() + 3) / 4 * 4;
        if padded > 40 {
            return Err(Error::invalid(format!(
                "{} bytes of IPv4 options don't fit in the header",
                options.len()
            )));
        }

        let len = MIN_HEADER_SIZE + padded;
        // new view: the options must not spill over the payload
        let mut header = self.header.read_bytes(0, MIN_HEADER_SIZE)?;
        header.resize(len, 0);
        header[MIN_HEADER_SIZE..MIN_HEADER_SIZE + options.len()].copy_from_slice(options);
        set!(header[VERSION_IHL], ihl, (len / 4) as u8);
        self.header = Buffer::from_vec(header);

        Ok(())
    }

    /* Private */
    fn addr_at(&self, range: Range<usize>) -> Ipv4Addr {
        let mut octets = [0; 4];
        self.header.with(|h| octets.copy_from_slice(&h[range]));
        Ipv4Addr::from(octets)
    }

    fn clear_reserved_flag(&mut self) {
        self.header.with_mut(|h| set!(h[FLAGS], reserved, 0))
    }

    fn set_total_length(&mut self, len: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[TOTAL_LENGTH], len))
    }

    fn update_checksum(&mut self) {
        self.header.with_mut(|h| {
            NE::write_u16(&mut h[CHECKSUM], 0);
            let cksum = checksum::compute(&[], h);
            NE::write_u16(&mut h[CHECKSUM], cksum);
        })
    }
}

impl Dissect for Packet {
    fn parse(bytes: Buffer) -> Result<Self> {
        let b0 = bytes.read_u8(VERSION_IHL)?;
        if get!(b0, version) != 4 {
            return Err(Error::malformed("IPv4", "version is not 4"));
        }

        let header_len = usize(get!(b0, ihl)) * 4;
        if header_len < MIN_HEADER_SIZE {
            return Err(Error::malformed("IPv4", "IHL < 5"));
        }

        let header = bytes.slice(0, header_len)?;
        let packet = Packet { header };
        if usize(packet.get_total_length()) < header_len {
            return Err(Error::malformed("IPv4", "total length < header length"));
        }

        Ok(packet)
    }
}

impl Layer for Packet {
    fn name(&self) -> &'static str {
        "IPv4"
    }

    fn header(&self) -> &Buffer {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Buffer {
        &mut self.header
    }

    // trims the link layer padding
    fn payload_len(&self, available: usize) -> usize {
        let declared = usize(self.get_total_length()).saturating_sub(self.header.len());
        declared.min(available)
    }

    fn header_len(&self) -> usize {
        self.header
            .read_u8(VERSION_IHL)
            .map(|b0| usize(get!(b0, ihl)) * 4)
            .unwrap_or(0)
            .max(MIN_HEADER_SIZE)
    }

    // only the first fragment starts with the transport header
    fn next_layer(&self) -> Option<Discriminant> {
        if self.get_fragment_offset() != 0 {
            return None;
        }

        Some(Discriminant::IpProtocol(self.get_protocol().into()))
    }

    fn ether_type(&self) -> Option<u16> {
        Some(ether::Type::Ipv4.into())
    }

    fn pseudo_header(&self, protocol: u8, len: usize) -> Option<Vec<u8>> {
        let len = u16(len).ok()?;
        Some(
            checksum::ipv4_pseudo_header(
                self.get_source(),
                self.get_destination(),
                protocol,
                len,
            )
            .to_vec(),
        )
    }

    fn finalize(&mut self, cx: &Context<'_>) -> Result<()> {
        let total_len = u16(self.header.len() + cx.payload().len())?;
        self.set_total_length(total_len);

        if let Some(proto) = cx.payload_layer().and_then(|l| l.ip_protocol()) {
            self.set_protocol(proto.into());
        }

        self.update_checksum();
        Ok(())
    }

    fn checksum_valid(&self, _: &Context<'_>) -> Option<bool> {
        Some(self.header.with(|h| checksum::verify(&[], h)))
    }
}

/// NOTE excludes the payload
impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ipv4::Packet")
            .field("version", &self.get_version())
            .field("ihl", &self.get_ihl())
            .field("dscp", &self.get_dscp())
            .field("ecn", &self.get_ecn())
            .field("total_length", &self.get_total_length())
            .field("identification", &self.get_identification())
            .field("df", &self.get_df())
            .field("mf", &self.get_mf())
            .field("fragment_offset", &self.get_fragment_offset())
            .field("ttl", &self.get_ttl())
            .field("protocol", &self.get_protocol())
            .field("checksum", &Hex(self.get_checksum()))
            .field("source", &self.get_source())
            .field("destination", &self.get_destination())
            .finish()
    }
}

full_range!(
    u8,
    /// IP protocol
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum Protocol {
        /// ICMP
        Icmp = 0x01,
        /// TCP
        Tcp = 0x06,
        /// UDP
        Udp = 0x11,
        /// ICMPv6
        Icmpv6 = 0x3a,
    }
);

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use rand::{self, RngCore};

    use crate::{
        buf::Buffer,
        dissect::{self, Discriminant, Dissect, LinkType},
        error::Error,
        ipv4,
        packet::{Layer, Packet},
    };

    const HEADER: [u8; 20] = [
        0x45, // version & IHL
        0x00, // DSCP & ECN
        0x00, 0x73, // total length
        0x00, 0x00, // identification
        0x40, 0x00, // DF & fragment offset
        0x40, // TTL
        0x11, // protocol
        0xb8, 0x61, // checksum
        0xc0, 0xa8, 0x00, 0x01, // source
        0xc0, 0xa8, 0x00, 0xc7, // destination
    ];

    #[test]
    fn parse() {
        let ip = ipv4::Packet::parse(Buffer::from_bytes(HEADER)).unwrap();

        assert_eq!(ip.get_version(), 4);
        assert_eq!(ip.get_ihl(), 5);
        assert_eq!(ip.get_total_length(), 0x73);
        assert!(ip.get_df());
        assert!(!ip.get_mf());
        assert_eq!(ip.get_fragment_offset(), 0);
        assert_eq!(ip.get_ttl(), 64);
        assert_eq!(ip.get_protocol(), ipv4::Protocol::Udp);
        assert_eq!(ip.get_checksum(), 0xb861);
        assert_eq!(ip.get_source(), Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(ip.get_destination(), Ipv4Addr::new(192, 168, 0, 199));
        assert!(ip.get_options().is_empty());

        // only 0x73 - 20 bytes belong to the payload
        assert_eq!(ip.payload_len(1000), 0x73 - 20);
    }

    #[test]
    fn malformed() {
        let mut bytes = HEADER;
        bytes[0] = 0x65;
        match ipv4::Packet::parse(Buffer::from_bytes(bytes)) {
            Err(Error::Malformed { layer: "IPv4", .. }) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }

        let mut bytes = HEADER;
        bytes[0] = 0x44;
        assert!(ipv4::Packet::parse(Buffer::from_bytes(bytes)).is_err());

        let mut bytes = HEADER;
        bytes[3] = 19;
        assert!(ipv4::Packet::parse(Buffer::from_bytes(bytes)).is_err());
    }

    #[test]
    fn construct() {
        let mut ip = ipv4::Packet::new(
            Ipv4Addr::new(192, 168, 0, 1),
            Ipv4Addr::new(192, 168, 0, 199),
        );
        // NOTE start with randomized bytes to make sure we set *everything* correctly
        let mut junk = [0; 3];
        rand::thread_rng().fill_bytes(&mut junk);
        ip.header_mut().write_bytes(9, &junk).unwrap();
        ip.set_protocol(ipv4::Protocol::Udp);

        let mut packet = Packet::new(ip);
        packet
            .set_payload(packet.root(), vec![0u8; 0x73 - 20])
            .unwrap();

        let bytes = packet.bytes().unwrap();
        assert_eq!(&bytes[..20], &HEADER[..]);
        assert_eq!(packet.checksum_valid(packet.root()), Some(true));
    }

    #[test]
    fn options() {
        let mut ip = ipv4::Packet::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST);
        ip.set_options(&[0x94, 0x04, 0x00]).unwrap();

        assert_eq!(ip.get_ihl(), 6);
        assert_eq!(ip.get_options(), [0x94, 0x04, 0x00, 0x00]);
        assert!(ip.set_options(&[0; 41]).is_err());

        let mut packet = Packet::new(ip);
        let bytes = packet.bytes().unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[2..4], &[0, 24]);
    }

    #[test]
    fn bad_checksum_is_not_an_error() {
        let mut bytes = HEADER;
        bytes[11] ^= 0xff;

        let ip = ipv4::Packet::parse(Buffer::from_bytes(bytes)).unwrap();
        let packet = Packet::new(ip);
        assert_eq!(packet.checksum_valid(packet.root()), Some(false));
    }

    #[test]
    fn later_fragments_are_not_dissected() {
        let mut bytes = HEADER.to_vec();
        bytes.extend_from_slice(&[
            0x04, 0xd2, 0x16, 0x2e, // udp: source & destination
            0x00, 0x73 - 20, 0x00, 0x00, // udp: length & checksum
        ]);
        bytes.resize(0x73, 0);

        let packet = dissect::parse(Discriminant::Link(LinkType::Raw), &bytes).unwrap();
        assert_eq!(packet.len(), 2);

        // fragment offset = 185 * 8 bytes
        bytes[6] = 0x00;
        bytes[7] = 0xb9;
        let packet = dissect::parse(Discriminant::Link(LinkType::Raw), &bytes).unwrap();
        assert_eq!(packet.len(), 1);
        assert_eq!(packet.extract::<ipv4::Packet>().unwrap().next_layer(), None);
        assert_eq!(packet.raw_payload(packet.root()).unwrap().len(), 0x73 - 20);
    }

    #[test]
    fn shrunk_header_is_regrown() {
        let mut packet = Packet::new(ipv4::Packet::new(
            Ipv4Addr::new(192, 168, 0, 1),
            Ipv4Addr::new(192, 168, 0, 199),
        ));
        let root = packet.root();
        packet.layer_mut::<ipv4::Packet>(root).unwrap().header_mut().truncate(10);

        let bytes = packet.bytes().unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(bytes[0], 0x45);
        assert_eq!(&bytes[12..], &[0; 8]);
        assert_eq!(packet.checksum_valid(root), Some(true));

        let mut ip = ipv4::Packet::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST);
        ip.set_options(&[0x94, 0x04, 0x00, 0x00]).unwrap();
        ip.header_mut().truncate(21);
        let mut packet = Packet::new(ip);
        assert_eq!(packet.bytes().unwrap().len(), 24);

        let mut ip = ipv4::Packet::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST);
        ip.header_mut().truncate(0);
        let mut packet = Packet::new(ip);
        assert_eq!(packet.bytes().unwrap().len(), 20);
    }
}
