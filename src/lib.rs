//! netdissect: dissect and build layered network packets
//!
//! There's no IO stuff in this crate; it doesn't capture nor read capture files. It turns the bytes
//! of a captured frame into a chain of typed protocol layers, and a chain of layers back into bytes.
//!
//! All the layers of a dissected packet are views into a single copy of the input (see
//! [`Buffer`]): reading a field reads the input bytes and writing a field writes them. Derived
//! fields (lengths, checksums, protocol numbers) are not kept in sync on every write; they are
//! recomputed when the packet is finalized, which [`Packet::bytes`] does before serializing.
//!
//! # Examples
//!
//! - Dissecting an UDP datagram
//!
//! ```
//! use netdissect::{udp, Discriminant, LinkType};
//!
//! let bytes = &[
//!     0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // eth: destination
//!     0x02, 0x00, 0x00, 0x00, 0x00, 0x01, // eth: source
//!     0x08, 0x00, // eth: type = IPv4
//!     0x45, 0x00, 0x00, 0x1e, // ipv4: version, IHL, DSCP, ECN & total length = 30
//!     0x00, 0x00, 0x40, 0x00, // ipv4: identification & DF
//!     0x40, 0x11, 0x00, 0x00, // ipv4: TTL, protocol = UDP & checksum (unchecked)
//!     0xc0, 0xa8, 0x01, 0x21, // ipv4: source
//!     0xc0, 0xa8, 0x01, 0x0b, // ipv4: destination
//!     0x04, 0xd2, 0x16, 0x2e, // udp: source & destination
//!     0x00, 0x0a, 0x00, 0x00, // udp: length & checksum (none)
//!     b'h', b'i', // udp: payload
//!     0x00, 0x00, 0x00, 0x00, // eth: padding
//! ];
//!
//! let packet = netdissect::parse(Discriminant::Link(LinkType::Ethernet), &bytes[..]).unwrap();
//! assert_eq!(packet.len(), 3);
//!
//! let udp = packet.extract::<udp::Packet>().unwrap();
//! assert_eq!(udp.get_source(), 1234);
//! assert_eq!(udp.get_destination(), 5678);
//!
//! // the padding is not part of the datagram
//! let id = packet.find::<udp::Packet>(packet.root()).unwrap();
//! assert_eq!(packet.raw_payload(id).unwrap().byte_copy(), b"hi");
//! ```
//!
//! - Building an UDP datagram
//!
//! Lengths, protocol numbers and checksums are filled in by `bytes`.
//!
//! ```
//! use std::net::Ipv4Addr;
//!
//! use netdissect::{ether, ipv4, mac, udp, Packet};
//!
//! let mut packet = Packet::new(ether::Frame::new(
//!     mac::Addr::BROADCAST,
//!     mac::Addr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
//! ));
//! packet.push(ipv4::Packet::new(
//!     Ipv4Addr::new(192, 168, 1, 33),
//!     Ipv4Addr::new(192, 168, 1, 11),
//! ));
//! let id = packet.push(udp::Packet::new(1234, 5678));
//! packet.set_payload(id, &b"hi"[..]).unwrap();
//!
//! let bytes = packet.bytes().unwrap();
//! assert_eq!(bytes.len(), 14 + 20 + 8 + 2);
//! assert_eq!(&bytes[12..14], &[0x08, 0x00]);
//! assert_eq!(packet.extract::<udp::Packet>().unwrap().get_length(), 10);
//! ```

#![deny(missing_docs)]
#![deny(rust_2018_compatibility)]
#![deny(rust_2018_idioms)]

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

#[macro_use]
mod macros;

mod fmt;
mod traits;

// Core
pub mod buf;
pub mod checksum;
pub mod dissect;
pub mod error;
pub mod packet;
pub mod tlv;

// Link layer
pub mod ether;
pub mod ieee80211;
pub mod lldp;
pub mod mac;
pub mod ppp;
pub mod sll;

pub mod arp;

// Network layer
pub mod ipv4;
pub mod ipv6;

// Transport layer
pub mod tcp;
pub mod udp;

// Tunneling
pub mod l2tp;

pub use crate::{
    buf::Buffer,
    dissect::{parse, Constructor, Discriminant, Dissect, Dissector, LinkType},
    error::{Error, Result},
    packet::{Context, Layer, NodeId, Packet, Payload, PayloadRef, State},
};
