//! Ethernet II

use core::{fmt, ops::Range};

use byteorder::{ByteOrder, NetworkEndian as NE};

use crate::{
    buf::Buffer,
    dissect::{Discriminant, Dissect},
    error::Result,
    mac,
    packet::{Context, Layer},
};

/* Frame format */
const DESTINATION: Range<usize> = 0..6;
const SOURCE: Range<usize> = 6..12;
const TYPE: Range<usize> = 12..14;

/// Size of the MAC header
pub const HEADER_SIZE: usize = TYPE.end;

/// Layer 2 Ethernet frame
///
/// # Structure
///
/// - MAC destination. 6 bytes
/// - MAC source. 6 bytes
/// - Ethertype. 2 bytes
/// - Payload. 46-1500 bytes (\*)
/// - Frame check sequence. 4 bytes (\*)
///
/// (\*) This frame representation does NOT include the frame check sequence nor (zero) pads the
/// payload to the minimum size of 46 bytes.
pub struct Frame {
    header: Buffer,
}

impl Frame {
    /* Constructors */
    /// Creates a new Ethernet frame
    ///
    /// The Type field is filled in when the packet is finalized, from the layer it carries
    pub fn new(destination: mac::Addr, source: mac::Addr) -> Self {
        let mut frame = Frame {
            header: Buffer::new(HEADER_SIZE),
        };
        frame.set_destination(destination);
        frame.set_source(source);
        frame
    }

    /* Getters */
    /// Returns the Destination field of the header
    pub fn get_destination(&self) -> mac::Addr {
        let mut addr = [0; 6];
        self.header
            .with(|h| addr.copy_from_slice(&h[DESTINATION]));
        mac::Addr(addr)
    }

    /// Returns the Source field of the header
    pub fn get_source(&self) -> mac::Addr {
        let mut addr = [0; 6];
        self.header.with(|h| addr.copy_from_slice(&h[SOURCE]));
        mac::Addr(addr)
    }

    /// Returns the Type field of the header
    pub fn get_type(&self) -> Type {
        self.header.with(|h| NE::read_u16(&h[TYPE])).into()
    }

    /* Setters */
    /// Sets the destination field of the header
    pub fn set_destination(&mut self, addr: mac::Addr) {
        self.header
            .with_mut(|h| h[DESTINATION].copy_from_slice(&addr.0))
    }

    /// Sets the source field of the header
    pub fn set_source(&mut self, addr: mac::Addr) {
        self.header.with_mut(|h| h[SOURCE].copy_from_slice(&addr.0))
    }

    /// Sets the type field of the header
    pub fn set_type(&mut self, type_: Type) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[TYPE], type_.into()))
    }
}

impl Dissect for Frame {
    fn parse(bytes: Buffer) -> Result<Self> {
        Ok(Frame {
            header: bytes.slice(0, HEADER_SIZE)?,
        })
    }
}

impl Layer for Frame {
    fn name(&self) -> &'static str {
        "Ethernet"
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

    fn next_layer(&self) -> Option<Discriminant> {
        Some(Discriminant::EtherType(self.get_type().into()))
    }

    fn finalize(&mut self, cx: &Context<'_>) -> Result<()> {
        if let Some(type_) = cx.payload_layer().and_then(|l| l.ether_type()) {
            self.set_type(type_.into());
        }

        Ok(())
    }
}

/// NOTE excludes the payload
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ether::Frame")
            .field("destination", &self.get_destination())
            .field("source", &self.get_source())
            .field("type", &self.get_type())
            .finish()
    }
}

full_range!(
    u16,
    /// Ether Type
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum Type {
        /// IPv4
        Ipv4 = 0x0800,

        /// ARP
        Arp = 0x0806,

        /// IPv6
        Ipv6 = 0x86DD,

        /// PPP
        Ppp = 0x880B,

        /// LLDP
        Lldp = 0x88CC,
    }
);

#[cfg(test)]
mod tests {
    use rand::{self, RngCore};

    use crate::{
        buf::Buffer,
        dissect::Dissect,
        ether, mac,
        packet::{Layer, Packet, PayloadRef},
    };

    const BYTES: &[u8] = &[
        255, 255, 255, 255, 255, 255, // ether: destination
        0x78, 0x44, 0x76, 0xd9, 0x6a, 0x7c, // ether: source
        0x08, 0x00, // ether: type
    ];

    #[test]
    fn parse() {
        let eth = ether::Frame::parse(Buffer::from_bytes(BYTES)).unwrap();

        assert_eq!(eth.get_destination(), mac::Addr::BROADCAST);
        assert_eq!(
            eth.get_source(),
            mac::Addr([0x78, 0x44, 0x76, 0xd9, 0x6a, 0x7c])
        );
        assert_eq!(eth.get_type(), ether::Type::Ipv4);
        assert!(ether::Frame::parse(Buffer::from_bytes(&BYTES[..13])).is_err());
    }

    #[test]
    fn construct() {
        let mut eth = ether::Frame::new(
            mac::Addr::BROADCAST,
            mac::Addr([0x78, 0x44, 0x76, 0xd9, 0x6a, 0x7c]),
        );
        // NOTE start with randomized bytes to make sure we set *everything* correctly
        let mut junk = [0; 2];
        rand::thread_rng().fill_bytes(&mut junk);
        eth.header_mut().write_bytes(12, &junk).unwrap();
        eth.set_type(ether::Type::Ipv4);

        let mut packet = Packet::new(eth);
        assert_eq!(packet.bytes().unwrap(), BYTES);
        assert!(matches!(packet.payload(packet.root()), Some(PayloadRef::Empty)));
    }

    #[test]
    fn type_() {
        assert_eq!(ether::Type::from(0x88cc), ether::Type::Lldp);
        assert_eq!(u16::from(ether::Type::Unknown(0x1234)), 0x1234);
    }
}
