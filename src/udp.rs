//! UDP: User Datagram Protocol

use core::{fmt, ops::Range};

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u16, usize};

use crate::{
    buf::Buffer,
    checksum::Checksum,
    dissect::{Discriminant, Dissect},
    error::{Error, Result},
    fmt::Hex,
    ipv4,
    packet::{Context, Layer},
};

/* Packet structure */
const SOURCE: Range<usize> = 0..2;
const DESTINATION: Range<usize> = 2..4;
const LENGTH: Range<usize> = 4..6;
const CHECKSUM: Range<usize> = 6..8;

/// Size of the UDP header
pub const HEADER_SIZE: u16 = CHECKSUM.end as u16;

/// UDP packet
pub struct Packet {
    header: Buffer,
}

impl Packet {
    /* Constructors */
    /// Creates a new UDP packet
    ///
    /// Length and Checksum are computed when the packet is finalized. The checksum is left as zero
    /// (none) if the packet is not carried by a network layer that provides a pseudo-header.
    pub fn new(source: u16, destination: u16) -> Self {
        let mut packet = Packet {
            header: Buffer::new(usize(HEADER_SIZE)),
        };

        packet.set_source(source);
        packet.set_destination(destination);
        packet.set_length(HEADER_SIZE);
        packet.set_checksum(0);

        packet
    }

    /* Getters */
    /// Returns the Source (port) field of the header
    pub fn get_source(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[SOURCE]))
    }

    /// Returns the Destination (port) field of the header
    pub fn get_destination(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[DESTINATION]))
    }

    /// Returns the Length field of the header
    pub fn get_length(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[LENGTH]))
    }

    /// Returns the Checksum field of the header; zero means "no checksum"
    pub fn get_checksum(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[CHECKSUM]))
    }

    /* Setters */
    /// Sets the Source (port) field of the header
    pub fn set_source(&mut self, port: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[SOURCE], port))
    }

    /// Sets the Destination (port) field of the header
    pub fn set_destination(&mut self, port: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[DESTINATION], port))
    }

    /// Zeroes the Checksum field of the header
    ///
    /// NOTE a later finalization computes it again
    pub fn zero_checksum(&mut self) {
        self.set_checksum(0);
    }

    /* Private */
    fn set_length(&mut self, len: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[LENGTH], len))
    }

    fn set_checksum(&mut self, checksum: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[CHECKSUM], checksum))
    }

    // NOTE includes the stored checksum field; zero it first to compute a new checksum
    fn sum(&self, pseudo_header: &[u8], payload: &[u8]) -> u16 {
        self.header.with(|h| {
            Checksum::new()
                .add(pseudo_header)
                .add(h)
                .add(payload)
                .finish()
        })
    }
}

impl Dissect for Packet {
    fn parse(bytes: Buffer) -> Result<Self> {
        let packet = Packet {
            header: bytes.slice(0, usize(HEADER_SIZE))?,
        };

        if packet.get_length() < HEADER_SIZE {
            return Err(Error::malformed("UDP", "length is smaller than the header"));
        }

        Ok(packet)
    }
}

impl Layer for Packet {
    fn name(&self) -> &'static str {
        "UDP"
    }

    fn header(&self) -> &Buffer {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Buffer {
        &mut self.header
    }

    fn payload_len(&self, available: usize) -> usize {
        usize(self.get_length().saturating_sub(HEADER_SIZE)).min(available)
    }

    fn header_len(&self) -> usize {
        usize(HEADER_SIZE)
    }

    fn next_layer(&self) -> Option<Discriminant> {
        Some(Discriminant::UdpPort(self.get_destination()))
    }

    // requests go to the service port, replies come from it
    fn next_layers(&self) -> Vec<Discriminant> {
        let (src, dst) = (self.get_source(), self.get_destination());
        let mut discs = vec![Discriminant::UdpPort(dst)];
        if src != dst {
            discs.push(Discriminant::UdpPort(src));
        }
        discs
    }

    fn ip_protocol(&self) -> Option<u8> {
        Some(ipv4::Protocol::Udp.into())
    }

    fn finalize(&mut self, cx: &Context<'_>) -> Result<()> {
        let len = usize(HEADER_SIZE) + cx.payload().len();
        self.set_length(u16(len)?);
        self.set_checksum(0);

        let pseudo_header = match cx
            .parent()
            .and_then(|p| p.pseudo_header(ipv4::Protocol::Udp.into(), len))
        {
            Some(ph) => ph,
            None => return Ok(()),
        };

        // zero is reserved for "no checksum"
        let checksum = match self.sum(&pseudo_header, cx.payload()) {
            0 => 0xffff,
            checksum => checksum,
        };
        self.set_checksum(checksum);

        Ok(())
    }

    fn checksum_valid(&self, cx: &Context<'_>) -> Option<bool> {
        if self.get_checksum() == 0 {
            return None;
        }

        let len = self.header.len() + cx.payload().len();
        let pseudo_header = cx
            .parent()
            .and_then(|p| p.pseudo_header(ipv4::Protocol::Udp.into(), len))?;

        Some(self.sum(&pseudo_header, cx.payload()) == 0)
    }
}

/// NOTE excludes the payload
impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("udp::Packet")
            .field("source", &self.get_source())
            .field("destination", &self.get_destination())
            .field("length", &self.get_length())
            .field("checksum", &Hex(self.get_checksum()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use rand::{self, RngCore};

    use crate::{
        dissect::{self, Discriminant, LinkType},
        ether, ipv4, mac,
        packet::{Layer, Packet, PayloadRef},
        udp,
    };

    const BYTES: &[u8] = &[
        255, 255, 255, 255, 255, 255, // ether: destination
        1, 1, 1, 1, 1, 1, // ether: source
        8, 0, // ether: type
        69, // ipv4: version & IHL
        0, // ipv4: DSCP & ECN
        0, 42, //ipv4: total length
        0, 0, // ipv4: identification
        64, 0, // ipv4: fragment
        64, //ipv4: ttl
        17, //ipv4: protocol
        185, 80, // ipv4: checksum
        192, 168, 0, 33, // ipv4: source
        192, 168, 0, 1, // ipv4: destination
        0, 0, // udp: source
        5, 57, // udp: destination
        0, 22, // udp: length
        0x37, 0xc0, // udp: checksum
        72, 101, 108, 108, 111, 44, 32, 119, 111, 114, 108, 100, 33, 10, // udp: payload
    ];

    const MAC_SRC: mac::Addr = mac::Addr([0x01; 6]);
    const MAC_DST: mac::Addr = mac::Addr([0xff; 6]);

    const IP_SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 33);
    const IP_DST: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);

    const UDP_DST: u16 = 1337;

    const MESSAGE: &[u8] = b"Hello, world!\n";

    #[test]
    fn construct() {
        let mut udp = udp::Packet::new(0, UDP_DST);
        // NOTE start with randomized bytes to make sure we set *everything* correctly
        let mut junk = [0; 4];
        rand::thread_rng().fill_bytes(&mut junk);
        udp.header_mut().write_bytes(4, &junk).unwrap();

        let mut packet = Packet::new(ether::Frame::new(MAC_DST, MAC_SRC));
        packet.push(ipv4::Packet::new(IP_SRC, IP_DST));
        let udp = packet.push(udp);
        packet.set_payload(udp, MESSAGE).unwrap();

        assert_eq!(packet.bytes().unwrap(), BYTES);
        assert_eq!(packet.checksum_valid(udp), Some(true));
    }

    #[test]
    fn parse() {
        let packet = dissect::parse(Discriminant::Link(LinkType::Ethernet), BYTES).unwrap();
        assert_eq!(packet.len(), 3);

        let eth = packet.extract::<ether::Frame>().unwrap();
        assert_eq!(eth.get_destination(), MAC_DST);
        assert_eq!(eth.get_source(), MAC_SRC);
        assert_eq!(eth.get_type(), ether::Type::Ipv4);

        let ip = packet.extract::<ipv4::Packet>().unwrap();
        assert_eq!(ip.get_source(), IP_SRC);
        assert_eq!(ip.get_destination(), IP_DST);

        let id = packet.find::<udp::Packet>(packet.root()).unwrap();
        let udp = packet.layer::<udp::Packet>(id).unwrap();
        assert_eq!(udp.get_source(), 0);
        assert_eq!(udp.get_destination(), UDP_DST);
        assert_eq!(udp.get_length(), MESSAGE.len() as u16 + udp::HEADER_SIZE);
        match packet.payload(id) {
            Some(PayloadRef::Raw(raw)) => assert_eq!(raw.byte_copy(), MESSAGE),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(packet.checksum_valid(id), Some(true));
    }

    #[test]
    fn new_payload_updates_length_and_checksum() {
        let mut packet = dissect::parse(Discriminant::Link(LinkType::Ethernet), BYTES).unwrap();
        let id = packet.find::<udp::Packet>(packet.root()).unwrap();

        packet.set_payload(id, &b"bye"[..]).unwrap();
        let bytes = packet.bytes().unwrap();

        assert_eq!(bytes.len(), BYTES.len() - MESSAGE.len() + 3);
        let udp = packet.layer::<udp::Packet>(id).unwrap();
        assert_eq!(udp.get_length(), 11);
        assert_eq!(packet.checksum_valid(id), Some(true));

        let ip = packet.extract::<ipv4::Packet>().unwrap();
        assert_eq!(ip.get_total_length(), 31);
        let ip = packet.find::<ipv4::Packet>(packet.root()).unwrap();
        assert_eq!(packet.checksum_valid(ip), Some(true));
    }

    #[test]
    fn no_checksum() {
        let mut bytes = BYTES.to_vec();
        bytes[40] = 0;
        bytes[41] = 0;

        let packet = dissect::parse(Discriminant::Link(LinkType::Ethernet), bytes).unwrap();
        let id = packet.find::<udp::Packet>(packet.root()).unwrap();
        assert_eq!(packet.checksum_valid(id), None);

        // not carried by a network layer
        let mut packet = Packet::new(udp::Packet::new(1, 2));
        let bytes = packet.bytes().unwrap();
        assert_eq!(bytes, [0, 1, 0, 2, 0, 8, 0, 0]);
    }

    #[test]
    fn length_smaller_than_header() {
        let mut bytes = BYTES.to_vec();
        bytes[39] = 7;

        // the UDP header is rejected and kept as the opaque payload of the IPv4 packet
        let packet = dissect::parse(Discriminant::Link(LinkType::Ethernet), bytes).unwrap();
        assert_eq!(packet.len(), 2);
        let ip = packet.find::<ipv4::Packet>(packet.root()).unwrap();
        assert_eq!(packet.raw_payload(ip).unwrap().len(), 22);
    }

    #[test]
    fn aliased_address_write_refreshes_checksum() {
        let mut packet = dissect::parse(Discriminant::Link(LinkType::Ethernet), BYTES).unwrap();
        let ip = packet.find::<ipv4::Packet>(packet.root()).unwrap();

        // ipv4: destination
        let mut alias = packet.get(ip).unwrap().header().clone();
        alias.write_bytes(16, &[192, 168, 0, 2]).unwrap();
        packet.invalidate(ip).unwrap();

        let bytes = packet.bytes().unwrap();
        assert_eq!(&bytes[30..34], &[192, 168, 0, 2]);
        assert_ne!(&bytes[40..42], &BYTES[40..42]);

        let packet = dissect::parse(Discriminant::Link(LinkType::Ethernet), bytes).unwrap();
        for id in packet.ids().skip(1) {
            assert_eq!(packet.checksum_valid(id), Some(true));
        }
    }

    #[test]
    fn next_layers() {
        let request = udp::Packet::new(1024, 1701);
        assert_eq!(
            request.next_layers(),
            [Discriminant::UdpPort(1701), Discriminant::UdpPort(1024)]
        );

        let reply = udp::Packet::new(1701, 40000);
        assert_eq!(
            reply.next_layers(),
            [Discriminant::UdpPort(40000), Discriminant::UdpPort(1701)]
        );

        let same = udp::Packet::new(1701, 1701);
        assert_eq!(same.next_layers(), [Discriminant::UdpPort(1701)]);
    }

    #[test]
    fn shrunk_header_is_regrown() {
        let mut packet = Packet::new(ipv4::Packet::new(IP_SRC, IP_DST));
        let id = packet.push(udp::Packet::new(0, UDP_DST));
        packet.layer_mut::<udp::Packet>(id).unwrap().header_mut().truncate(3);
        assert_eq!(packet.checksum_valid(id), None);

        let bytes = packet.bytes().unwrap();
        assert_eq!(bytes.len(), 20 + 8);
        assert_eq!(packet.checksum_valid(id), Some(true));
    }
}
