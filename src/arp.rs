//! ARP: Address Resolution Protocol
//!
//! # References
//!
//! - [RFC 826: An Ethernet Address Resolution Protocol][rfc]
//!
//! [rfc]: https://tools.ietf.org/html/rfc826

use core::fmt;
use core::ops::Range;
use std::net::{IpAddr, Ipv4Addr};

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::usize;

use crate::{
    buf::Buffer,
    dissect::Dissect,
    error::{Error, Result},
    ether,
    fmt::HexBytes,
    mac,
    packet::Layer,
};

/* Packet structure */
const HTYPE: Range<usize> = 0..2;
const PTYPE: Range<usize> = 2..4;
const HLEN: usize = 4;
const PLEN: usize = 5;
const OPER: Range<usize> = 6..8;

/// Size of the fixed part of the ARP header
pub const HEADER_SIZE: usize = OPER.end;

/// Size of an Ethernet / IPv4 ARP packet
pub const ETHERNET_IPV4_SIZE: usize = HEADER_SIZE + 2 * (6 + 4);

/// ARP packet
///
/// The addresses follow the fixed header; their sizes are given by the HLEN and PLEN fields.
pub struct Packet {
    header: Buffer,
}

impl Packet {
    /* Constructors */
    /// Creates an Ethernet / IPv4 ARP packet
    ///
    /// This function populates the following header fields:
    ///
    /// - HTYPE = Ethernet
    /// - PTYPE = IPv4
    /// - HLEN = 6
    /// - PLEN = 4
    pub fn new(
        oper: Operation,
        sha: mac::Addr,
        spa: Ipv4Addr,
        tha: mac::Addr,
        tpa: Ipv4Addr,
    ) -> Self {
        let mut packet = Packet {
            header: Buffer::new(ETHERNET_IPV4_SIZE),
        };

        packet.set_htype(HardwareType::Ethernet);
        packet.set_ptype(ether::Type::Ipv4);
        packet.header.with_mut(|h| {
            h[HLEN] = 6;
            h[PLEN] = 4;
        });
        packet.set_oper(oper);
        packet.header.with_mut(|h| {
            h[sha_at(6, 4)].copy_from_slice(&sha.0);
            h[spa_at(6, 4)].copy_from_slice(&spa.octets());
            h[tha_at(6, 4)].copy_from_slice(&tha.0);
            h[tpa_at(6, 4)].copy_from_slice(&tpa.octets());
        });

        packet
    }

    /// ARP probe: a request with SPA = 0.0.0.0 and THA = 00:00:00:00:00:00
    pub fn probe(sha: mac::Addr, tpa: Ipv4Addr) -> Self {
        Packet::new(
            Operation::Request,
            sha,
            Ipv4Addr::UNSPECIFIED,
            mac::Addr::UNSPECIFIED,
            tpa,
        )
    }

    /// ARP announcement: a request with SPA = TPA = `addr` and THA = 00:00:00:00:00:00
    pub fn announce(sha: mac::Addr, addr: Ipv4Addr) -> Self {
        Packet::new(
            Operation::Request,
            sha,
            addr,
            mac::Addr::UNSPECIFIED,
            addr,
        )
    }

    /* Getters */
    /// Returns the HTYPE (Hardware TYPE) field of the header
    pub fn get_htype(&self) -> HardwareType {
        self.header.with(|h| NE::read_u16(&h[HTYPE])).into()
    }

    /// Returns the PTYPE (Protocol TYPE) field of the header
    pub fn get_ptype(&self) -> ether::Type {
        self.header.with(|h| NE::read_u16(&h[PTYPE])).into()
    }

    /// Returns the HLEN (Hardware LENgth) field of the header
    pub fn get_hlen(&self) -> u8 {
        self.header.with(|h| h[HLEN])
    }

    /// Returns the PLEN (Protocol LENgth) field of the header
    pub fn get_plen(&self) -> u8 {
        self.header.with(|h| h[PLEN])
    }

    /// Returns the OPER (OPERation) field of the header
    pub fn get_oper(&self) -> Operation {
        self.header.with(|h| NE::read_u16(&h[OPER])).into()
    }

    /// Returns the SHA (Sender Hardware Address) field of the payload
    pub fn get_sha(&self) -> Vec<u8> {
        self.header.with(|h| h[self.sha()].to_vec())
    }

    /// Returns the SPA (Sender Protocol Address) field of the payload
    ///
    /// `None` if PLEN is not 4
    pub fn get_spa(&self) -> Option<Ipv4Addr> {
        self.ipv4_at(self.spa())
    }

    /// Returns the THA (Target Hardware Address) field of the payload
    pub fn get_tha(&self) -> Vec<u8> {
        self.header.with(|h| h[self.tha()].to_vec())
    }

    /// Returns the TPA (Target Protocol Address) field of the payload
    ///
    /// `None` if PLEN is not 4
    pub fn get_tpa(&self) -> Option<Ipv4Addr> {
        self.ipv4_at(self.tpa())
    }

    /// Is this an ARP probe?
    pub fn is_a_probe(&self) -> bool {
        self.get_spa() == Some(Ipv4Addr::UNSPECIFIED)
    }

    /* Setters */
    /// Sets the HTYPE (Hardware TYPE) field of the header
    pub fn set_htype(&mut self, htype: HardwareType) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[HTYPE], htype.into()))
    }

    /// Sets the PTYPE (Protocol TYPE) field of the header
    pub fn set_ptype(&mut self, ptype: ether::Type) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[PTYPE], ptype.into()))
    }

    /// Sets the OPER (OPERation) field of the header
    pub fn set_oper(&mut self, oper: Operation) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[OPER], oper.into()))
    }

    /// Sets the SHA (Sender Hardware Address) field of the payload
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the length of `sha` doesn't match the HLEN field
    pub fn set_sha(&mut self, sha: &[u8]) -> Result<()> {
        let range = self.sha();
        self.set_hardware_address(range, sha)
    }

    /// Sets the SPA (Sender Protocol Address) field of the payload
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if `spa` is not an IPv4 address or PLEN is not 4
    pub fn set_spa(&mut self, spa: IpAddr) -> Result<()> {
        let range = self.spa();
        self.set_protocol_address(range, spa)
    }

    /// Sets the THA (Target Hardware Address) field of the payload
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the length of `tha` doesn't match the HLEN field
    pub fn set_tha(&mut self, tha: &[u8]) -> Result<()> {
        let range = self.tha();
        self.set_hardware_address(range, tha)
    }

    /// Sets the TPA (Target Protocol Address) field of the payload
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if `tpa` is not an IPv4 address or PLEN is not 4
    pub fn set_tpa(&mut self, tpa: IpAddr) -> Result<()> {
        let range = self.tpa();
        self.set_protocol_address(range, tpa)
    }

    /* Private */
    fn sha(&self) -> Range<usize> {
        sha_at(self.get_hlen(), self.get_plen())
    }

    fn spa(&self) -> Range<usize> {
        spa_at(self.get_hlen(), self.get_plen())
    }

    fn tha(&self) -> Range<usize> {
        tha_at(self.get_hlen(), self.get_plen())
    }

    fn tpa(&self) -> Range<usize> {
        tpa_at(self.get_hlen(), self.get_plen())
    }

    fn ipv4_at(&self, range: Range<usize>) -> Option<Ipv4Addr> {
        if range.len() != 4 {
            return None;
        }

        let mut octets = [0; 4];
        self.header.with(|h| octets.copy_from_slice(&h[range]));
        Some(Ipv4Addr::from(octets))
    }

    fn set_hardware_address(&mut self, range: Range<usize>, addr: &[u8]) -> Result<()> {
        if addr.len() != range.len() {
            return Err(Error::invalid(format!(
                "expected a hardware address of {} bytes but got {} bytes",
                range.len(),
                addr.len()
            )));
        }

        self.header.with_mut(|h| h[range].copy_from_slice(addr));
        Ok(())
    }

    fn set_protocol_address(&mut self, range: Range<usize>, addr: IpAddr) -> Result<()> {
        let addr = match addr {
            IpAddr::V4(addr) => addr,
            IpAddr::V6(_) => {
                return Err(Error::invalid(
                    "family != IPv4; ARP is used for IPv4, NDP for IPv6",
                ))
            }
        };

        if range.len() != 4 {
            return Err(Error::invalid(format!(
                "PLEN is {}, not an IPv4 address",
                range.len()
            )));
        }

        self.header
            .with_mut(|h| h[range].copy_from_slice(&addr.octets()));
        Ok(())
    }
}

fn sha_at(hlen: u8, _plen: u8) -> Range<usize> {
    HEADER_SIZE..HEADER_SIZE + usize(hlen)
}

fn spa_at(hlen: u8, plen: u8) -> Range<usize> {
    let start = HEADER_SIZE + usize(hlen);
    start..start + usize(plen)
}

fn tha_at(hlen: u8, plen: u8) -> Range<usize> {
    let start = HEADER_SIZE + usize(hlen) + usize(plen);
    start..start + usize(hlen)
}

fn tpa_at(hlen: u8, plen: u8) -> Range<usize> {
    let start = HEADER_SIZE + 2 * usize(hlen) + usize(plen);
    start..start + usize(plen)
}

impl Dissect for Packet {
    fn parse(bytes: Buffer) -> Result<Self> {
        let hlen = bytes.read_u8(HLEN)?;
        let plen = bytes.read_u8(PLEN)?;

        // too small: the addresses don't fit
        let len = tpa_at(hlen, plen).end;
        Ok(Packet {
            header: bytes.slice(0, len)?,
        })
    }
}

impl Layer for Packet {
    fn name(&self) -> &'static str {
        "ARP"
    }

    fn header(&self) -> &Buffer {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Buffer {
        &mut self.header
    }

    fn header_len(&self) -> usize {
        let hlen = self.header.read_u8(HLEN).unwrap_or(6);
        let plen = self.header.read_u8(PLEN).unwrap_or(4);
        tpa_at(hlen, plen).end
    }

    // whatever follows is link layer padding
    fn payload_len(&self, _: usize) -> usize {
        0
    }

    fn ether_type(&self) -> Option<u16> {
        Some(ether::Type::Arp.into())
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("arp::Packet")
            .field("htype", &self.get_htype())
            .field("ptype", &self.get_ptype())
            .field("hlen", &self.get_hlen())
            .field("plen", &self.get_plen())
            .field("oper", &self.get_oper())
            .field("sha", &HexBytes(&self.get_sha()))
            .field("spa", &self.get_spa())
            .field("tha", &HexBytes(&self.get_tha()))
            .field("tpa", &self.get_tpa())
            .finish()
    }
}

full_range!(
    u16,
    /// Hardware type
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum HardwareType {
        /// Ethernet
        Ethernet = 1,
        /// IEEE 802 networks
        Ieee802 = 6,
    }
);

full_range!(
    u16,
    /// ARP operation
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum Operation {
        /// Request operation
        Request = 1,
        /// Reply operation
        Reply = 2,
        /// Reverse ARP request
        ReverseRequest = 3,
        /// Reverse ARP reply
        ReverseReply = 4,
    }
);
