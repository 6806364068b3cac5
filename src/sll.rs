//! Linux cooked capture (SLL)
//!
//! The pseudo link layer header libpcap prepends to packets captured on the "any" device.
//!
//! # References
//!
//! - [`pcap/sll.h`](https://github.com/the-tcpdump-group/libpcap/blob/master/pcap/sll.h)

use core::{fmt, ops::Range};

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::u16;

use crate::{
    buf::Buffer,
    dissect::{Discriminant, Dissect},
    error::{Error, Result},
    ether,
    fmt::HexBytes,
    packet::{Context, Layer},
};

/* Header structure */
const PACKET_TYPE: Range<usize> = 0..2;
const ADDRESS_TYPE: Range<usize> = 2..4;
const ADDRESS_LENGTH: Range<usize> = 4..6;
const ADDRESS: Range<usize> = 6..14;
const PROTOCOL: Range<usize> = 14..16;

/// Size of the header
pub const HEADER_SIZE: usize = PROTOCOL.end;

/// Maximum size of the link layer address
pub const MAX_ADDRESS_LENGTH: usize = ADDRESS.end - ADDRESS.start;

/// Linux cooked capture header
pub struct Header {
    header: Buffer,
}

impl Header {
    /* Constructors */
    /// Creates a new header
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if `address` is longer than 8 bytes
    pub fn new(packet_type: PacketType, address_type: u16, address: &[u8]) -> Result<Self> {
        let mut header = Header {
            header: Buffer::new(HEADER_SIZE),
        };
        header.set_packet_type(packet_type);
        header.set_address_type(address_type);
        header.set_address(address)?;
        Ok(header)
    }

    /* Getters */
    /// Returns the packet type (direction) field
    pub fn get_packet_type(&self) -> PacketType {
        self.header.with(|h| NE::read_u16(&h[PACKET_TYPE])).into()
    }

    /// Returns the link layer address type (`ARPHRD_*`) field
    pub fn get_address_type(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[ADDRESS_TYPE]))
    }

    /// Returns the link layer address length field
    pub fn get_address_length(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[ADDRESS_LENGTH]))
    }

    /// Returns the link layer address of the sender
    ///
    /// NOTE a dissected header may claim more than 8 bytes; only the first 8 are returned
    pub fn get_address(&self) -> Vec<u8> {
        let len = usize::from(self.get_address_length()).min(MAX_ADDRESS_LENGTH);
        self.header
            .with(|h| h[ADDRESS.start..ADDRESS.start + len].to_vec())
    }

    /// Returns the protocol (EtherType) field
    pub fn get_protocol(&self) -> ether::Type {
        self.header.with(|h| NE::read_u16(&h[PROTOCOL])).into()
    }

    /* Setters */
    /// Sets the packet type field
    pub fn set_packet_type(&mut self, type_: PacketType) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[PACKET_TYPE], type_.into()))
    }

    /// Sets the link layer address type field
    pub fn set_address_type(&mut self, type_: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[ADDRESS_TYPE], type_))
    }

    /// Sets the link layer address length field
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if `len` is not in the range `0..=8`
    pub fn set_address_length(&mut self, len: u16) -> Result<()> {
        if usize::from(len) > MAX_ADDRESS_LENGTH {
            return Err(Error::invalid(format!(
                "link layer address length of {} out of range of 0 to {}",
                len, MAX_ADDRESS_LENGTH
            )));
        }

        self.header
            .with_mut(|h| NE::write_u16(&mut h[ADDRESS_LENGTH], len));
        Ok(())
    }

    /// Sets the link layer address and its length; unused address bytes are zeroed
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if `addr` is longer than 8 bytes
    pub fn set_address(&mut self, addr: &[u8]) -> Result<()> {
        let len = u16(addr.len()).unwrap_or(u16::MAX);
        self.set_address_length(len)?;

        self.header.with_mut(|h| {
            let field = &mut h[ADDRESS];
            field[..addr.len()].copy_from_slice(addr);
            field[addr.len()..].iter_mut().for_each(|b| *b = 0);
        });
        Ok(())
    }

    /// Sets the protocol field
    pub fn set_protocol(&mut self, type_: ether::Type) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[PROTOCOL], type_.into()))
    }
}

impl Dissect for Header {
    fn parse(bytes: Buffer) -> Result<Self> {
        Ok(Header {
            header: bytes.slice(0, HEADER_SIZE)?,
        })
    }
}

impl Layer for Header {
    fn name(&self) -> &'static str {
        "Linux SLL"
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
        Some(Discriminant::EtherType(self.get_protocol().into()))
    }

    fn finalize(&mut self, cx: &Context<'_>) -> Result<()> {
        if let Some(type_) = cx.payload_layer().and_then(|l| l.ether_type()) {
            self.set_protocol(type_.into());
        }

        Ok(())
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("sll::Header")
            .field("packet_type", &self.get_packet_type())
            .field("address_type", &self.get_address_type())
            .field("address", &HexBytes(&self.get_address()))
            .field("protocol", &self.get_protocol())
            .finish()
    }
}

full_range!(
    u16,
    /// Direction of the packet
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum PacketType {
        /// Sent to us
        Host = 0,
        /// Broadcast by somebody else
        Broadcast = 1,
        /// Multicast by somebody else
        Multicast = 2,
        /// Sent to somebody else by somebody else
        OtherHost = 3,
        /// Sent by us
        Outgoing = 4,
    }
);
